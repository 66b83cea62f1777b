use std::path::PathBuf;

use rust_decimal::Decimal;
use tracing::info;

use super::{NotificationError, OrderSnapshot};

/// Produces an invoice document for a committed order and returns where it
/// was written.
#[axum::async_trait]
pub trait InvoiceGenerator: Send + Sync {
    async fn generate(&self, snapshot: &OrderSnapshot) -> Result<PathBuf, NotificationError>;
}

/// Writes a plain-text invoice to `<dir>/<order_id>.txt`.
pub struct FileInvoiceGenerator {
    dir: PathBuf,
}

impl FileInvoiceGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn render(snapshot: &OrderSnapshot) -> String {
        let mut out = String::new();
        out.push_str(&format!("INVOICE {}\n", snapshot.order_id));
        out.push_str(&format!(
            "Billed to: {} <{}>\n\n",
            snapshot.customer.username, snapshot.customer.email
        ));
        for line in &snapshot.lines {
            let line_total = line.unit_price * Decimal::from(line.quantity);
            out.push_str(&format!(
                "{:>4} x {} [{}] @ {} = {}\n",
                line.quantity, line.name, line.sku, line.unit_price, line_total
            ));
        }
        out.push_str(&format!("\nSubtotal: {}\n", snapshot.subtotal));
        if let Some((code, amount)) = &snapshot.discount {
            out.push_str(&format!("Discount ({}): -{}\n", code, amount));
        }
        out.push_str(&format!("Total: {}\n", snapshot.total));
        out
    }
}

#[axum::async_trait]
impl InvoiceGenerator for FileInvoiceGenerator {
    async fn generate(&self, snapshot: &OrderSnapshot) -> Result<PathBuf, NotificationError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.txt", snapshot.order_id));
        tokio::fs::write(&path, Self::render(snapshot)).await?;
        info!(order_id = %snapshot.order_id, path = %path.display(), "Invoice written");
        Ok(path)
    }
}
