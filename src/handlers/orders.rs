use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::orders::CreateOrderRequest;
use crate::{ApiResponse, AppState};

/// POST /api/v1/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let placed = state.orders.place_order(user, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(placed))))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.orders.get_order(user, order_id).await?;
    Ok(Json(ApiResponse::new(order)))
}

/// GET /api/v1/orders/history/:user_id
pub async fn order_history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let history = state.orders.order_history(user, user_id).await?;
    Ok(Json(ApiResponse::new(history)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// PUT /api/v1/orders/:id/status
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let updated = state
        .orders
        .update_order_status(user, order_id, &request.status)
        .await?;
    Ok(Json(ApiResponse::new(updated)))
}
