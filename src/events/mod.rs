use crate::db::UnitOfWork;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort publish: stock mutations never fail because nobody is
    /// listening.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }

    /// Publishes an event raised by `uow` once its writes are durable. Owned
    /// work has committed by the time this runs; joined work parks the event
    /// in the caller's outbox until the outer commit.
    pub async fn dispatch(&self, uow: UnitOfWork<'_>, event: Event) {
        match uow {
            UnitOfWork::Owned => self.publish(event).await,
            UnitOfWork::Joined(_, outbox) => outbox.push(event).await,
        }
    }
}

/// Events raised by operations joined to a caller's transaction.
///
/// The caller flushes the outbox after its own commit. After a rollback the
/// outbox is dropped or cleared, so nothing is published for writes that
/// never became durable.
#[derive(Debug, Default)]
pub struct EventOutbox {
    pending: Mutex<Vec<Event>>,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, event: Event) {
        self.pending.lock().await.push(event);
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Drops everything held, e.g. after the outer transaction rolled back.
    pub async fn discard(&self) -> usize {
        let dropped = std::mem::take(&mut *self.pending.lock().await).len();
        if dropped > 0 {
            debug!(dropped, "Discarded events of rolled-back work");
        }
        dropped
    }

    /// Publishes everything held, in the order it was raised.
    pub async fn flush(&self, sender: &EventSender) -> usize {
        let events = std::mem::take(&mut *self.pending.lock().await);
        let count = events.len();
        for event in events {
            sender.publish(event).await;
        }
        count
    }
}

/// Why a part's location data needs manual reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftReason {
    /// An issuance named a location that holds no row for the part.
    MissingPartLocation,
    /// An issuance took more than the location held; the row was floored at 0.
    LocationShortfall { missing: i32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockReceived {
        part_id: i32,
        batch_id: i32,
        quantity: i32,
        unit_price: Decimal,
        storage_location_id: Option<i32>,
    },
    StockIssued {
        part_id: i32,
        transaction_id: i32,
        quantity: i32,
        batches_consumed: usize,
        reference_type: Option<String>,
        reference_id: Option<i32>,
    },
    /// Issuance that bypassed FIFO costing because the part had no batches.
    UntrackedIssue {
        part_id: i32,
        transaction_id: i32,
        quantity: i32,
    },
    ReconciliationNeeded {
        part_id: i32,
        storage_location_id: i32,
        reason: DriftReason,
        detected_at: DateTime<Utc>,
    },
    DiscrepancyDetected {
        part_id: i32,
        inventory_level: i32,
        total_in_locations: i64,
        difference: i64,
    },
    InventoryLevelRepaired {
        part_id: i32,
        old_quantity: i32,
        new_quantity: i32,
    },
    BatchesBackfilled {
        parts_migrated: usize,
    },
    WorksheetPartAdded {
        worksheet_id: i32,
        part_id: i32,
        quantity: i32,
        unit_cost: Decimal,
    },
}

/// Drains the event channel, logging each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ReconciliationNeeded {
                part_id,
                storage_location_id,
                reason,
                ..
            } => {
                warn!(
                    part_id,
                    storage_location_id,
                    ?reason,
                    "Part location drift needs reconciliation"
                );
            }
            Event::DiscrepancyDetected {
                part_id,
                difference,
                ..
            } => {
                warn!(part_id, difference, "Inventory level discrepancy detected");
            }
            Event::UntrackedIssue {
                part_id, quantity, ..
            } => {
                warn!(part_id, quantity, "Stock issued without FIFO batches");
            }
            other => info!("Received event: {:?}", other),
        }
    }

    info!("Event processing loop finished");
}
