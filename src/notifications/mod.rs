pub mod email;
pub mod invoice;

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub use email::{EmailSender, LoggingEmailSender};
pub use invoice::{FileInvoiceGenerator, InvoiceGenerator};

/// Errors raised by post-commit collaborators. These never unwind a
/// committed order; callers log and move on.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invoice error: {0}")]
    Invoice(#[from] std::io::Error),

    #[error("email error: {0}")]
    Email(String),
}

/// The customer details that go on an invoice and confirmation email.
#[derive(Debug, Clone)]
pub struct Customer {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
}

/// One invoice line.
#[derive(Debug, Clone)]
pub struct SnapshotLine {
    pub name: String,
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Everything the notifier needs about a committed order, captured before
/// the transaction handle is gone.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub order_id: Uuid,
    pub customer: Customer,
    pub lines: Vec<SnapshotLine>,
    pub subtotal: Decimal,
    /// Promotion code and discount amount, when one was applied.
    pub discount: Option<(String, Decimal)>,
    pub total: Decimal,
}

/// Dispatches invoice generation and the confirmation email after an order
/// commits. Both are best effort: a failure is logged at warn and the order
/// stands.
pub struct OrderNotifier {
    invoice: Arc<dyn InvoiceGenerator>,
    email: Arc<dyn EmailSender>,
}

impl OrderNotifier {
    pub fn new(invoice: Arc<dyn InvoiceGenerator>, email: Arc<dyn EmailSender>) -> Self {
        Self { invoice, email }
    }

    pub async fn order_placed(&self, snapshot: &OrderSnapshot) {
        let invoice_path = match self.invoice.generate(snapshot).await {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(order_id = %snapshot.order_id, error = %err, "Invoice generation failed");
                None
            }
        };
        if let Err(err) = self
            .email
            .send_order_confirmation(snapshot, invoice_path.as_deref())
            .await
        {
            warn!(order_id = %snapshot.order_id, error = %err, "Confirmation email failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingInvoice;

    #[axum::async_trait]
    impl InvoiceGenerator for FailingInvoice {
        async fn generate(
            &self,
            _snapshot: &OrderSnapshot,
        ) -> Result<std::path::PathBuf, NotificationError> {
            Err(NotificationError::Invoice(std::io::Error::other(
                "disk full",
            )))
        }
    }

    struct CountingEmail {
        sent: AtomicUsize,
    }

    #[axum::async_trait]
    impl EmailSender for CountingEmail {
        async fn send_order_confirmation(
            &self,
            _snapshot: &OrderSnapshot,
            invoice_path: Option<&std::path::Path>,
        ) -> Result<(), NotificationError> {
            assert!(invoice_path.is_none());
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn snapshot() -> OrderSnapshot {
        OrderSnapshot {
            order_id: Uuid::new_v4(),
            customer: Customer {
                user_id: Uuid::new_v4(),
                username: "ada".into(),
                email: "ada@example.com".into(),
            },
            lines: vec![SnapshotLine {
                name: "Mug (Blue)".into(),
                sku: "MUG-BL".into(),
                quantity: 2,
                unit_price: dec!(9.99),
            }],
            subtotal: dec!(19.98),
            discount: None,
            total: dec!(19.98),
        }
    }

    #[tokio::test]
    async fn invoice_failure_does_not_stop_the_email() {
        let email = Arc::new(CountingEmail {
            sent: AtomicUsize::new(0),
        });
        let notifier = OrderNotifier::new(Arc::new(FailingInvoice), email.clone());
        notifier.order_placed(&snapshot()).await;
        assert_eq!(email.sent.load(Ordering::SeqCst), 1);
    }
}
