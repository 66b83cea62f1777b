pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod notifications;
pub mod services;

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::notifications::OrderNotifier;
use crate::services::{InventoryService, OrderService, PromotionService, StockLedgerService};

/// Envelope for successful API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Shared application state handed to every handler.
pub struct AppState {
    pub db: Arc<DbPool>,
    pub orders: OrderService,
    pub inventory: InventoryService,
    pub promotions: PromotionService,
    pub stock_ledger: StockLedgerService,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, notifier: Arc<OrderNotifier>) -> Self {
        Self {
            orders: OrderService::new(db.clone(), event_sender.clone(), notifier),
            inventory: InventoryService::new(db.clone(), event_sender.clone()),
            promotions: PromotionService::new(db.clone(), event_sender),
            stock_ledger: StockLedgerService::new(db.clone()),
            db,
        }
    }
}

/// CORS policy from configuration. Explicit origins when configured,
/// permissive otherwise (development).
pub fn build_cors(config: &AppConfig) -> CorsLayer {
    if let Some(raw) = &config.cors_allowed_origins {
        let origins: Vec<HeaderValue> = raw
            .split(',')
            .filter_map(|origin| {
                let trimmed = origin.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring malformed CORS origin: {}", trimmed);
                        None
                    }
                }
            })
            .collect();
        if !origins.is_empty() {
            return CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any);
        }
    }
    CorsLayer::permissive()
}

/// Build the full application router.
pub fn app(state: Arc<AppState>, config: &AppConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", handlers::api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(build_cors(config))
        .with_state(state)
}
