use courier_log::{error, info};
use courier_server::{AppState, Settings, build_application};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    courier_log::install_log_bridge();
    courier_log::tracing_compat::install();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let state = AppState::from_settings(&settings).await;
    let app = build_application(Arc::new(state)).with_max_body_bytes(settings.max_body_bytes);

    info!("courier-server {} starting", env!("CARGO_PKG_VERSION"));
    if let Err(e) = app.listen(settings.bind).await {
        error!("server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("courier-server stopped");
    ExitCode::SUCCESS
}
