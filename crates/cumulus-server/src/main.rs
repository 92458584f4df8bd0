mod api;
mod config;
mod error;
mod object_store;
mod sse;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cumulus_events::store::UserStore;
use cumulus_events::EventHub;
use cumulus_store::{Database, SqliteEventStore, SqliteUserStore};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::object_store::ObjectStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cumulus_server=debug")),
        )
        .init();

    info!(
        "Starting Cumulus file-hosting backend v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let data_dir = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => directories::ProjectDirs::from("com", "cumulus", "cumulus")
            .ok_or_else(|| anyhow::anyhow!("could not determine application data directory"))?
            .data_dir()
            .to_path_buf(),
    };
    std::fs::create_dir_all(&data_dir)?;

    let database = Database::open_at(&data_dir.join("cumulus.db"))?;
    bootstrap_admin(&database, &config)?;

    let db = Arc::new(Mutex::new(database));
    let users: Arc<dyn UserStore> = Arc::new(SqliteUserStore::new(Arc::clone(&db)));
    let events_store = Arc::new(SqliteEventStore::new(Arc::clone(&db)));

    let hub = EventHub::new(Arc::clone(&users), events_store).await;

    let vault = config.master_key_vault()?;
    let objects = Arc::new(
        ObjectStore::new(data_dir.join("objects"), config.max_object_size).await?,
    );

    let http_addr = config.http_addr;
    let state = AppState {
        hub: Arc::clone(&hub),
        users,
        objects,
        vault,
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                hub.close().await;
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Disconnect every subscriber and stop the sweeper.
    hub.close().await;

    Ok(())
}

/// Create an admin account on first start so the API is reachable.
fn bootstrap_admin(db: &Database, config: &ServerConfig) -> anyhow::Result<()> {
    if db.count_users()? > 0 {
        return Ok(());
    }

    let token = config
        .bootstrap_token
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let user = db.insert_user("admin@localhost", Some("Administrator"), Some(&token))?;
    info!(user = user.id, token = %token, "Created bootstrap admin user");
    Ok(())
}
