use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::{Expr, LockBehavior, LockType, Order, Query, UpdateStatement};
use sea_orm::{ConnectionTrait, DbBackend, EntityTrait, Set, TransactionTrait};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::inventory_unit::{self, Entity as InventoryUnit, UnitStatus};
use crate::entities::product_variant::Entity as ProductVariant;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::available_count;

/// Build the conditional claim UPDATE for a backend. The candidate subquery
/// orders by unit id so concurrent claimers walk the table in the same
/// direction; on Postgres it also takes row locks with SKIP LOCKED so two
/// transactions selecting the same candidate rows cannot both count them and
/// oversell. SQLite serializes writers, so the plain subquery is enough there.
fn claim_statement(
    backend: DbBackend,
    variant_id: Uuid,
    quantity: u64,
    to_status: UnitStatus,
) -> UpdateStatement {
    let mut candidates = Query::select();
    candidates
        .column(inventory_unit::Column::Id)
        .from(InventoryUnit)
        .and_where(Expr::col(inventory_unit::Column::VariantId).eq(variant_id))
        .and_where(Expr::col(inventory_unit::Column::Status).eq(UnitStatus::Available.as_str()))
        .order_by(inventory_unit::Column::Id, Order::Asc)
        .limit(quantity);
    if backend == DbBackend::Postgres {
        candidates.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked);
    }

    Query::update()
        .table(InventoryUnit)
        .value(inventory_unit::Column::Status, to_status.as_str())
        .value(inventory_unit::Column::UpdatedAt, Utc::now())
        .and_where(Expr::col(inventory_unit::Column::Status).eq(UnitStatus::Available.as_str()))
        .and_where(Expr::col(inventory_unit::Column::Id).in_subquery(candidates.to_owned()))
        .to_owned()
}

/// Flip `quantity` available units of a variant to `to_status` in a single
/// conditional UPDATE. The subquery picks candidate unit ids (locked with
/// SKIP LOCKED on Postgres) and the outer WHERE re-checks availability, so
/// two concurrent buyers can never claim the same unit. There is no separate
/// read step to race against.
///
/// If fewer than `quantity` rows were claimed this returns
/// `InsufficientStock`; the caller's enclosing transaction must roll back to
/// undo the partial claim.
pub async fn claim_units<C>(
    conn: &C,
    variant_id: Uuid,
    quantity: u64,
    to_status: UnitStatus,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if quantity == 0 {
        return Err(ServiceError::ValidationError(
            "quantity must be at least 1".into(),
        ));
    }

    let backend = conn.get_database_backend();
    let update = claim_statement(backend, variant_id, quantity, to_status);
    let result = conn.execute(backend.build(&update)).await?;

    if result.rows_affected() < quantity {
        return Err(ServiceError::InsufficientStock(format!(
            "requested {}, available {}",
            quantity,
            result.rows_affected()
        )));
    }

    Ok(())
}

/// Request to add new units for a variant.
#[derive(Debug, Clone, serde::Deserialize, Validate)]
pub struct RestockRequest {
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 10_000))]
    pub quantity: u32,
    #[validate(length(min = 1, max = 64))]
    pub condition: String,
    #[validate(length(max = 512))]
    pub notes: Option<String>,
}

/// Result of a restock, reporting the count before and after.
#[derive(Debug, Clone, Serialize)]
pub struct RestockOutcome {
    pub variant_id: Uuid,
    pub old_count: u64,
    pub new_count: u64,
}

/// Mutations on the unit ledger: claiming units during checkout and adding
/// new units on restock.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Insert `quantity` fresh available units for a variant.
    #[instrument(skip(self))]
    pub async fn restock(&self, request: RestockRequest) -> Result<RestockOutcome, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;

        ProductVariant::find_by_id(request.variant_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("variant {} not found", request.variant_id))
            })?;

        let old_count = available_count(&txn, request.variant_id).await?;

        let now = Utc::now();
        let units: Vec<inventory_unit::ActiveModel> = (0..request.quantity)
            .map(|_| inventory_unit::ActiveModel {
                id: Set(Uuid::new_v4()),
                variant_id: Set(request.variant_id),
                status: Set(UnitStatus::Available),
                condition: Set(request.condition.clone()),
                notes: Set(request.notes.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            })
            .collect();

        InventoryUnit::insert_many(units).exec(&txn).await?;

        let new_count = old_count + u64::from(request.quantity);
        txn.commit().await?;

        info!(
            variant_id = %request.variant_id,
            old_count,
            new_count,
            "Restocked inventory"
        );

        // The units are committed; a dead event channel must not turn a
        // successful restock into an error.
        if let Err(err) = self
            .event_sender
            .send(Event::InventoryRestocked {
                variant_id: request.variant_id,
                quantity: u64::from(request.quantity),
                new_count,
            })
            .await
        {
            warn!(variant_id = %request.variant_id, error = %err, "Failed to emit restock event");
        }

        Ok(RestockOutcome {
            variant_id: request.variant_id,
            old_count,
            new_count,
        })
    }
}
