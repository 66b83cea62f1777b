use std::path::Path;

use tracing::info;

use super::{NotificationError, OrderSnapshot};

/// Sends the order confirmation, attaching the invoice when one was
/// produced. The real deployment fronts a mail provider; the bundled
/// implementation just logs the send.
#[axum::async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_order_confirmation(
        &self,
        snapshot: &OrderSnapshot,
        invoice_path: Option<&Path>,
    ) -> Result<(), NotificationError>;
}

/// Logs the confirmation instead of talking to a mail provider.
pub struct LoggingEmailSender;

#[axum::async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send_order_confirmation(
        &self,
        snapshot: &OrderSnapshot,
        invoice_path: Option<&Path>,
    ) -> Result<(), NotificationError> {
        info!(
            order_id = %snapshot.order_id,
            recipient = %snapshot.customer.email,
            total = %snapshot.total,
            invoice = ?invoice_path,
            "Order confirmation email sent"
        );
        Ok(())
    }
}
