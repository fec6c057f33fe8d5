use staking_wallet::api::server;
use staking_wallet::WalletConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize logger (set RUST_LOG=debug for verbose output, RUST_LOG=info for normal)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Environment first, then -key=value switches
    let config = WalletConfig::from_env().apply_args(std::env::args().skip(1));

    log::info!(
        "Starting staking wallet on {} ({})",
        config.bind_address,
        config.network
    );
    server::start_server(config).await?;
    Ok(())
}
