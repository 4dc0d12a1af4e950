use anyhow::Result;

use branchboard::commands::AppState;
use branchboard::config::AppConfig;
use branchboard::server;
use branchboard::state::fs::ensure_dir;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env().map_err(anyhow::Error::msg)?;
    ensure_dir(&config.state_dir).map_err(anyhow::Error::msg)?;

    log::info!(
        "Starting branchboard (state dir: {:?}, skip_browser: {})",
        config.state_dir,
        config.skip_browser
    );

    let state = AppState::new(&config);
    server::run_server(config.port, state)
        .await
        .map_err(anyhow::Error::msg)
}
