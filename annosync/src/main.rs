// annosync - flush annotations queued by a previous session
// Entry point: replays the persisted queue once and exits

use std::process::ExitCode;
use std::sync::Arc;

use annosync::config::{AppConfig, ENV_ACCESS_TOKEN, ENV_USER_ID};
use annosync::connectivity::NetworkStatus;
use annosync::identity::StaticIdentity;
use annosync::{logging, AnnotationsApp};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    tracing::info!("Starting annosync");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let identity = StaticIdentity::signed_out();
    if let Ok(user_id) = std::env::var(ENV_USER_ID) {
        identity.sign_in(user_id, std::env::var(ENV_ACCESS_TOKEN).ok());
    }

    let app = match AnnotationsApp::open(
        &config,
        Arc::new(identity),
        Arc::new(NetworkStatus::default()),
    )
    .await
    {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("Failed to open annotation engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let report = app.store().force_sync().await;
    tracing::info!("Sync finished: {:?}", report);

    let success = report.is_success();
    app.shutdown().await;

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
