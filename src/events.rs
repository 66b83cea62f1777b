use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Domain events emitted after state changes commit. Consumers must treat
/// delivery as at-most-once; a full channel drops the event with an error log
/// rather than blocking the request path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    InventorySold {
        variant_id: Uuid,
        quantity: u64,
    },
    InventoryRestocked {
        variant_id: Uuid,
        quantity: u64,
        new_count: u64,
    },
    PromotionApplied {
        promotion_id: Uuid,
        order_id: Uuid,
        discount: Decimal,
    },
    PromotionsDeactivated {
        count: u64,
        as_of: DateTime<Utc>,
    },
}

/// Cloneable handle for emitting events onto the shared channel.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Emit an event. Returns an error only when the channel is closed; a
    /// full channel is logged and swallowed so request handling never stalls
    /// on the event pipeline.
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                error!(?event, "Event channel full; dropping event");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(ServiceError::EventError("event channel closed".into()))
            }
        }
    }
}

/// Create a bounded event channel.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drain the event channel, logging each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                total_amount,
            } => {
                info!(%order_id, %user_id, %total_amount, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
            Event::InventorySold {
                variant_id,
                quantity,
            } => {
                debug!(%variant_id, quantity, "Inventory units sold");
            }
            Event::InventoryRestocked {
                variant_id,
                quantity,
                new_count,
            } => {
                info!(%variant_id, quantity, new_count, "Inventory restocked");
            }
            Event::PromotionApplied {
                promotion_id,
                order_id,
                discount,
            } => {
                info!(%promotion_id, %order_id, %discount, "Promotion applied");
            }
            Event::PromotionsDeactivated { count, as_of } => {
                info!(count, %as_of, "Expired promotions deactivated");
            }
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn send_delivers_event() {
        let (sender, mut rx) = event_channel(8);
        let event = Event::InventorySold {
            variant_id: Uuid::new_v4(),
            quantity: 3,
        };
        sender.send(event.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(event));
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sender, _rx) = event_channel(1);
        let event = Event::OrderCreated {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total_amount: dec!(10.00),
        };
        sender.send(event.clone()).await.unwrap();
        // Channel is now full; the second send must not error or block.
        sender.send(event).await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_reports_event_error() {
        let (sender, rx) = event_channel(1);
        drop(rx);
        let result = sender
            .send(Event::PromotionsDeactivated {
                count: 0,
                as_of: Utc::now(),
            })
            .await;
        assert!(result.is_err());
    }
}
