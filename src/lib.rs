//! CMMS spare-parts stock control
//!
//! Inventory levels, FIFO cost batches, the stock ledger and per-location
//! quantities, kept consistent under concurrent worksheet usage.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

pub use db::{DbPool, UnitOfWork};
pub use errors::ServiceError;
pub use events::EventOutbox;
pub use services::AppServices;

/// Shared handles for a running process.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

/// Connects the pool, optionally migrates, and starts the event consumer.
/// The returned handle finishes once every clone of the state is dropped.
pub async fn bootstrap(
    cfg: config::AppConfig,
) -> Result<(AppState, JoinHandle<()>), ServiceError> {
    let pool = db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        db::run_migrations(&pool).await?;
    }
    let db = Arc::new(pool);

    let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = events::EventSender::new(tx);
    let consumer = tokio::spawn(events::process_events(rx));

    let services = AppServices::new(db.clone(), event_sender.clone(), cfg.stock.clone());
    info!(environment = %cfg.environment, "Stock services ready");

    Ok((
        AppState {
            db,
            config: cfg,
            event_sender,
            services,
        },
        consumer,
    ))
}
