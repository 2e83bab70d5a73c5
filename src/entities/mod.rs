//! Database entities for the spare-parts stock engine.
//!
//! `inventory_level` is the per-part serialization point: every mutation of
//! batches, ledger rows or part locations happens while that row is locked.

pub mod audit_log;
pub mod inventory_level;
pub mod part;
pub mod part_location;
pub mod stock_batch;
pub mod stock_transaction;
pub mod storage_location;
pub mod supplier;
pub mod worksheet;
pub mod worksheet_part;
