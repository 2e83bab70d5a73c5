pub mod audit;
pub mod fifo;
pub mod parts;
pub mod reconciliation;
pub mod stock;
pub mod storage;
pub mod worksheets;

use crate::{config::StockConfig, db::DbPool, events::EventSender};
use std::sync::Arc;

/// Every service wired to one pool and one event channel.
#[derive(Clone)]
pub struct AppServices {
    pub parts: parts::PartsService,
    pub stock: stock::StockService,
    pub storage: storage::StorageService,
    pub reconciliation: reconciliation::ReconciliationService,
    pub worksheets: worksheets::WorksheetService,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, settings: StockConfig) -> Self {
        let stock = stock::StockService::new(db_pool.clone(), event_sender.clone(), settings);
        Self {
            parts: parts::PartsService::new(db_pool.clone(), event_sender.clone()),
            storage: storage::StorageService::new(db_pool.clone(), event_sender.clone()),
            reconciliation: reconciliation::ReconciliationService::new(
                db_pool.clone(),
                event_sender.clone(),
            ),
            worksheets: worksheets::WorksheetService::new(db_pool, event_sender, stock.clone()),
            stock,
        }
    }
}
