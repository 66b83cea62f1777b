use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::inventory::RestockRequest;
use crate::{ApiResponse, AppState};

const DEFAULT_LOW_STOCK_THRESHOLD: u64 = 5;

fn require_admin(user: &AuthUser) -> Result<(), ServiceError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "inventory endpoints require an administrator".into(),
        ))
    }
}

/// GET /api/v1/inventory/summary
pub async fn summary(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    require_admin(&user)?;
    let rows = state.stock_ledger.summary().await?;
    Ok(Json(ApiResponse::new(rows)))
}

#[derive(Debug, Deserialize)]
pub struct LowStockQuery {
    pub threshold: Option<u64>,
}

/// GET /api/v1/inventory/low-stock?threshold=
pub async fn low_stock(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<LowStockQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    require_admin(&user)?;
    let threshold = query.threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
    let variants = state.stock_ledger.low_stock(threshold).await?;
    Ok(Json(ApiResponse::new(variants)))
}

/// POST /api/v1/inventory/restock
pub async fn restock(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<RestockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    require_admin(&user)?;
    let outcome = state.inventory.restock(request).await?;
    Ok(Json(ApiResponse::new(outcome)))
}
