//! Polling consumer that delivers messages through a handler.

use crate::error::{QueueError, QueueResult};
use crate::message::Message;
use crate::queue::Queue;
use courier_log::{debug, error, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Delivery handler function type.
pub type MessageHandler =
    Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = QueueResult<()>> + Send>> + Send + Sync>;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent delivery loops
    pub concurrency: usize,

    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,

    /// A handler running longer than this counts as a failure
    pub handler_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// Pops messages, runs the handler, then acks on success or fails with
/// the error text so the queue applies backoff.
pub struct Worker {
    queue: Queue,
    handler: MessageHandler,
    config: WorkerConfig,
    running: Arc<RwLock<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Create a worker.
    ///
    /// ```no_run
    /// use courier_queue::*;
    /// use std::sync::Arc;
    ///
    /// # async fn example() -> QueueResult<()> {
    /// let queue = Queue::new(Arc::new(MemoryStore::new()));
    /// let mut worker = Worker::new(queue, |message| async move {
    ///     println!("delivering {}", message.id);
    ///     Ok(())
    /// });
    /// worker.start().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<F, Fut>(queue: Queue, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        Self::with_config(queue, handler, WorkerConfig::default())
    }

    pub fn with_config<F, Fut>(queue: Queue, handler: F, config: WorkerConfig) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        let handler: MessageHandler = Arc::new(
            move |message: Message| -> Pin<Box<dyn Future<Output = QueueResult<()>> + Send>> {
                Box::pin(handler(message))
            },
        );

        Self {
            queue,
            handler,
            config,
            running: Arc::new(RwLock::new(false)),
            handles: Vec::new(),
        }
    }

    /// Start the delivery loops.
    pub async fn start(&mut self) -> QueueResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(QueueError::WorkerAlreadyRunning);
        }
        *running = true;
        drop(running);

        info!("worker starting with concurrency {}", self.config.concurrency);

        for i in 0..self.config.concurrency.max(1) {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let running = self.running.clone();
            let poll_interval = self.config.poll_interval;
            let handler_timeout = self.config.handler_timeout;

            let handle = tokio::spawn(async move {
                while *running.read().await {
                    match queue.pop().await {
                        Ok(Some(message)) => {
                            deliver(i, &queue, &handler, handler_timeout, message).await;
                        }
                        Ok(None) => tokio::time::sleep(poll_interval).await,
                        Err(e) => {
                            error!("worker-{} could not pop: {}", i, e);
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                }

                debug!("worker-{} stopped", i);
            });

            self.handles.push(handle);
        }

        Ok(())
    }

    /// Stop polling and wait for in-flight deliveries to settle.
    pub async fn stop(&mut self) -> QueueResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(QueueError::WorkerNotRunning);
        }
        *running = false;
        drop(running);

        info!("worker stopping");

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("worker task ended abnormally: {}", e);
            }
        }

        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

async fn deliver(
    worker: usize,
    queue: &Queue,
    handler: &MessageHandler,
    handler_timeout: Duration,
    message: Message,
) {
    let id = message.id;
    let failure = match tokio::time::timeout(handler_timeout, handler(message)).await {
        Ok(Ok(())) => {
            if let Err(e) = queue.ack(id).await {
                error!("worker-{} could not ack {}: {}", worker, id, e);
            }
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("handler timed out after {}s", handler_timeout.as_secs()),
    };

    warn!("worker-{} delivery of {} failed: {}", worker, id, failure);
    if let Err(e) = queue.fail(id, Some(&failure)).await {
        error!("worker-{} could not record failure for {}: {}", worker, id, e);
    }
}
