use livetape_server::{ServerConfig, app};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting livetape-server");

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        ws_addr = %config.ws_addr,
        symbol = %config.instrument.concatenated(),
        interval = %config.candle_interval,
        "configuration loaded"
    );

    if let Err(error) = app::run(config).await {
        error!(%error, "livetape-server terminated");
        std::process::exit(1);
    }
}

/// Initialize logging, switching to JSON lines when `LOG_FORMAT=json`.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
