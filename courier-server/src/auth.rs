//! Bearer-token authorization for queue routes.

use async_trait::async_trait;
use courier_core::{Error, HttpRequest};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Decides whether a bearer token may use the queue API.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> bool;
}

/// Accepts a fixed set of tokens. Only SHA-256 digests are kept in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    digests: HashSet<String>,
}

impl StaticTokenVerifier {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            digests: tokens
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .map(|t| digest(&t))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> bool {
        self.digests.contains(&digest(token))
    }
}

fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Reject the request unless it carries a token the verifier accepts.
pub async fn authorize(verifier: &dyn TokenVerifier, request: &HttpRequest) -> Result<(), Error> {
    let token = request
        .bearer_token()
        .ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))?;

    if verifier.verify(token).await {
        Ok(())
    } else {
        Err(Error::Unauthorized("invalid token".to_string()))
    }
}
