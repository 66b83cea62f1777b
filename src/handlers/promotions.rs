use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::promotions::ApplyPromotionRequest;
use crate::{ApiResponse, AppState};

/// POST /api/v1/promotions/apply
///
/// Pre-checkout preview; uses the same evaluator as order placement.
pub async fn apply_promotion(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(request): Json<ApplyPromotionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let discount = state.promotions.apply_promotion(request).await?;
    Ok(Json(ApiResponse::new(discount)))
}

#[derive(Debug, Serialize)]
pub struct DeactivatedResponse {
    pub deactivated: u64,
}

/// POST /api/v1/promotions/deactivate-expired
pub async fn deactivate_expired(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "only administrators may run the expiry sweep".into(),
        ));
    }
    let deactivated = state.promotions.deactivate_expired().await?;
    Ok(Json(ApiResponse::new(DeactivatedResponse { deactivated })))
}
