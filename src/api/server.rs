use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use super::handlers::{self, AppState};
use crate::chain::ChainIndexer;
use crate::config::WalletConfig;
use crate::manager::WalletManager;
use crate::storage::Storage;

/// Routes for the cold staking controller and the wallet queries.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Cold staking routes
        .route(
            "/api/coldstaking/cold-staking-address",
            get(handlers::get_cold_staking_address_handler),
        )
        .route(
            "/api/coldstaking/cold-staking-info",
            get(handlers::get_cold_staking_info_handler),
        )
        .route(
            "/api/coldstaking/cold-staking-account",
            post(handlers::create_cold_staking_account_handler),
        )
        .route(
            "/api/coldstaking/setup-cold-staking",
            post(handlers::setup_cold_staking_handler),
        )
        .route(
            "/api/coldstaking/cold-staking-withdrawal",
            post(handlers::cold_staking_withdrawal_handler),
        )
        // Wallet routes
        .route("/api/wallet/create", post(handlers::create_wallet_handler))
        .route("/api/wallet/load", post(handlers::load_wallet_handler))
        .route("/api/wallet/list", get(handlers::list_wallets_handler))
        .route(
            "/api/wallet/:name/balance",
            get(handlers::get_balance_handler),
        )
        .route(
            "/api/wallet/:name/history",
            get(handlers::get_history_handler),
        )
        .route(
            "/api/wallet/:name/history-slim",
            get(handlers::get_history_slim_handler),
        )
        .route(
            "/api/wallet/:name/spendable",
            get(handlers::get_spendable_handler),
        )
        .route(
            "/api/wallet/:name/unused-address",
            get(handlers::get_unused_address_handler),
        )
        .with_state(state)
}

pub async fn start_server(config: WalletConfig) -> anyhow::Result<()> {
    let addr = config.bind_address.clone();
    let save_interval = Duration::from_secs(config.save_interval_secs.max(1));

    let chain = Arc::new(ChainIndexer::new(config.network));
    let storage = Storage::new_with_base_dir(config.wallet_dir.clone());
    let wallet_manager = Arc::new(WalletManager::new(config, storage, chain));

    {
        let manager = wallet_manager.clone();
        tokio::task::spawn_blocking(move || manager.start()).await??;
    }

    let saver = tokio::spawn(periodic_save(wallet_manager.clone(), save_interval));

    let app = router(AppState::new(wallet_manager.clone())).layer(cors_layer());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    saver.abort();
    let manager = wallet_manager.clone();
    tokio::task::spawn_blocking(move || manager.stop()).await??;

    Ok(())
}

/// CORS from `ALLOWED_ORIGINS` (comma separated), or any origin when unset.
fn cors_layer() -> CorsLayer {
    match std::env::var("ALLOWED_ORIGINS") {
        Ok(origins) if !origins.is_empty() => {
            log::info!("CORS configured for origins: {}", origins);
            let origin_list: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| match s.trim().parse() {
                    Ok(origin) => Some(origin),
                    Err(_) => {
                        log::warn!("Ignoring invalid CORS origin '{}'", s.trim());
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origin_list)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => {
            log::warn!("CORS: Allowing all origins (development mode). Set ALLOWED_ORIGINS env var for production.");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

async fn periodic_save(manager: Arc<WalletManager>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // First tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let manager = manager.clone();
        match tokio::task::spawn_blocking(move || manager.save_wallets()).await {
            Ok(Ok(count)) => log::debug!("Periodic save wrote {} wallet(s)", count),
            Ok(Err(e)) => log::error!("Periodic save failed: {}", e),
            Err(e) => log::error!("Periodic save task failed: {}", e),
        }
    }
}

/// Handle graceful shutdown signals (Ctrl+C, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            log::info!("Received SIGTERM signal");
        },
    }

    log::info!("Shutdown signal received, saving wallets...");
}
