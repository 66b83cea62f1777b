pub mod health;
pub mod inventory;
pub mod orders;
pub mod promotions;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::AppState;

/// All versioned API routes.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/history/:user_id", get(orders::order_history))
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/promotions/apply", post(promotions::apply_promotion))
        .route(
            "/promotions/deactivate-expired",
            post(promotions::deactivate_expired),
        )
        .route("/inventory/summary", get(inventory::summary))
        .route("/inventory/low-stock", get(inventory::low_stock))
        .route("/inventory/restock", post(inventory::restock))
}
