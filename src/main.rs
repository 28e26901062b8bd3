use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use mohawk::{
    alerts,
    api::{self, handlers::VERSION, ServerContext},
    config::ServerConfig,
    logging,
    storage::open_backend,
    Result,
};

async fn run(config: ServerConfig) -> Result<()> {
    let backend = open_backend(&config.storage, &config.options)?;
    info!("Mohawk {} using {} storage", VERSION, backend.name());

    let (stop, shutdown) = watch::channel(false);
    let alert_tasks = if config.alerts.is_empty() {
        Vec::new()
    } else {
        alerts::start(
            backend.clone(),
            &config.alerts,
            config.alerts_webhook.clone(),
            shutdown,
        )?
    };

    let ctx = Arc::new(ServerContext::new(backend));
    let served = api::serve(&config, ctx, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Can't listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    })
    .await;

    let _ = stop.send(true);
    for task in alert_tasks {
        let _ = task.await;
    }
    served
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mohawk: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init_logger(config.verbose, config.quiet) {
        eprintln!("mohawk: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
