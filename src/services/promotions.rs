use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::promotion::{self, Entity as Promotion, PromotionKind};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// A cart line as the promotion evaluator sees it. Prices are the snapshot
/// the order will be written with, not live catalog prices.
#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl CartItem {
    fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Outcome of evaluating a promotion against a cart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discount {
    pub promotion_id: Uuid,
    pub code: String,
    pub amount: Decimal,
    /// Products the discount actually touched. For buy-one-get-one this
    /// excludes lines without a complete pair.
    pub affected_product_ids: Vec<Uuid>,
}

fn cart_subtotal(items: &[CartItem]) -> Decimal {
    items.iter().map(CartItem::line_total).sum()
}

/// Both restriction sets must pass: an empty set admits everything, a
/// non-empty set admits only its members.
fn item_applies(promotion: &promotion::Model, item: &CartItem) -> bool {
    let products = promotion.product_set();
    let categories = promotion.category_set();

    let product_ok = products.is_empty() || products.contains(&item.product_id);
    let category_ok = categories.is_empty()
        || item
            .category_id
            .map(|cat| categories.contains(&cat))
            .unwrap_or(false);

    product_ok && category_ok
}

/// Compute the discount a promotion grants over a cart. Pure; the caller
/// supplies `now` so the same evaluation can be replayed in tests.
///
/// The `min_purchase` threshold is checked against the whole cart subtotal,
/// not just the applicable lines. Rounding to cents happens exactly once, on
/// the final amount.
pub fn evaluate(
    promotion: &promotion::Model,
    items: &[CartItem],
    now: DateTime<Utc>,
) -> Result<Discount, ServiceError> {
    if !promotion.is_active || now < promotion.start_date || now > promotion.end_date {
        return Err(ServiceError::ValidationError(format!(
            "promotion {} is not active",
            promotion.code
        )));
    }

    let subtotal = cart_subtotal(items);
    if let Some(min_purchase) = promotion.min_purchase {
        if subtotal < min_purchase {
            return Err(ServiceError::MinimumNotMet(format!(
                "promotion {} requires a minimum purchase of {}",
                promotion.code, min_purchase
            )));
        }
    }

    let applicable: Vec<&CartItem> = items
        .iter()
        .filter(|item| item_applies(promotion, item))
        .collect();
    let applicable_subtotal: Decimal = applicable.iter().map(|item| item.line_total()).sum();

    let (amount, affected_product_ids) = match promotion.kind {
        PromotionKind::Percentage => (
            applicable_subtotal * promotion.value / Decimal::from(100),
            applicable.iter().map(|item| item.product_id).collect(),
        ),
        PromotionKind::Fixed => {
            // The flat value is spread proportionally over the applicable
            // lines, so the shares always sum to the full value; with no
            // applicable lines it grants nothing. The order total clamps at
            // zero, so a value above the subtotal cannot charge negative.
            if applicable_subtotal.is_zero() {
                (Decimal::ZERO, Vec::new())
            } else {
                (
                    promotion.value,
                    applicable.iter().map(|item| item.product_id).collect(),
                )
            }
        }
        PromotionKind::Bogo => (
            applicable
                .iter()
                .map(|item| Decimal::from(item.quantity / 2) * item.unit_price)
                .sum(),
            applicable
                .iter()
                .filter(|item| item.quantity >= 2)
                .map(|item| item.product_id)
                .collect(),
        ),
    };

    let amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    Ok(Discount {
        promotion_id: promotion.id,
        code: promotion.code.clone(),
        amount,
        affected_product_ids,
    })
}

/// One cart line in an apply-promotion request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CartItemRequest {
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    #[validate(range(min = 1, max = 1_000))]
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Request to preview a promotion against a cart.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApplyPromotionRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 100))]
    pub items: Vec<CartItemRequest>,
}

/// Promotion lookup, preview and lifecycle maintenance.
#[derive(Clone)]
pub struct PromotionService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl PromotionService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Look up a promotion by code and check it is usable right now.
    #[instrument(skip(self))]
    pub async fn find_active_promotion(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<promotion::Model, ServiceError> {
        let model = Promotion::find()
            .filter(promotion::Column::Code.eq(code))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("unknown promotion code {}", code)))?;

        if !model.is_active || now < model.start_date || now > model.end_date {
            return Err(ServiceError::NotFound(format!(
                "promotion {} is expired or inactive",
                code
            )));
        }

        Ok(model)
    }

    /// Evaluate a promotion against a cart without placing an order.
    #[instrument(skip(self, request))]
    pub async fn apply_promotion(
        &self,
        request: ApplyPromotionRequest,
    ) -> Result<Discount, ServiceError> {
        request.validate()?;
        for line in &request.items {
            line.validate()?;
        }
        let now = Utc::now();
        let model = self.find_active_promotion(&request.code, now).await?;

        let items: Vec<CartItem> = request
            .items
            .into_iter()
            .map(|item| CartItem {
                product_id: item.product_id,
                category_id: item.category_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();

        evaluate(&model, &items, now)
    }

    /// Flip `is_active` off for every promotion whose window has closed.
    /// The evaluator re-checks the window itself, so this sweep is
    /// housekeeping rather than a correctness requirement.
    #[instrument(skip(self))]
    pub async fn deactivate_expired(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let result = Promotion::update_many()
            .col_expr(promotion::Column::IsActive, sea_orm::sea_query::Expr::value(false))
            .col_expr(promotion::Column::UpdatedAt, sea_orm::sea_query::Expr::value(now))
            .filter(promotion::Column::IsActive.eq(true))
            .filter(promotion::Column::EndDate.lt(now))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected > 0 {
            info!(count = result.rows_affected, "Deactivated expired promotions");
        }

        // The sweep already committed; do not fail it over a dead channel.
        if let Err(err) = self
            .event_sender
            .send(Event::PromotionsDeactivated {
                count: result.rows_affected,
                as_of: now,
            })
            .await
        {
            warn!(error = %err, "Failed to emit deactivation event");
        }

        Ok(result.rows_affected)
    }
}
