use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_unit::{self, Entity as InventoryUnit, UnitStatus};
use crate::entities::product_variant::{self, Entity as ProductVariant};
use crate::errors::ServiceError;

/// Number of available units for one variant. This is the only stock figure
/// the system has; there is no counter column to drift out of sync.
pub async fn available_count<C>(conn: &C, variant_id: Uuid) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let count = InventoryUnit::find()
        .filter(inventory_unit::Column::VariantId.eq(variant_id))
        .filter(inventory_unit::Column::Status.eq(UnitStatus::Available))
        .count(conn)
        .await?;
    Ok(count)
}

/// One row of the per-variant stock summary.
#[derive(Debug, Clone, Serialize, FromQueryResult)]
pub struct StockCount {
    pub variant_id: Uuid,
    pub status: UnitStatus,
    pub count: i64,
}

/// A variant whose available stock sits at or below a threshold.
#[derive(Debug, Clone, Serialize)]
pub struct LowStockVariant {
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub sku: String,
    pub available: u64,
}

/// Read-only queries over the unit ledger.
#[derive(Clone)]
pub struct StockLedgerService {
    db_pool: Arc<DbPool>,
}

impl StockLedgerService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Available unit count for a single variant.
    #[instrument(skip(self))]
    pub async fn available(&self, variant_id: Uuid) -> Result<u64, ServiceError> {
        available_count(&*self.db_pool, variant_id).await
    }

    /// Unit counts grouped by variant and status. Variants with no unit rows
    /// at all do not appear here.
    #[instrument(skip(self))]
    pub async fn summary(&self) -> Result<Vec<StockCount>, ServiceError> {
        let rows = InventoryUnit::find()
            .select_only()
            .column(inventory_unit::Column::VariantId)
            .column(inventory_unit::Column::Status)
            .column_as(inventory_unit::Column::Id.count(), "count")
            .group_by(inventory_unit::Column::VariantId)
            .group_by(inventory_unit::Column::Status)
            .order_by_asc(inventory_unit::Column::VariantId)
            .into_model::<StockCount>()
            .all(&*self.db_pool)
            .await?;
        Ok(rows)
    }

    /// Active variants whose available count is at or below `threshold`.
    /// Variants with zero available units are included.
    #[instrument(skip(self))]
    pub async fn low_stock(&self, threshold: u64) -> Result<Vec<LowStockVariant>, ServiceError> {
        let available_by_variant: HashMap<Uuid, i64> = InventoryUnit::find()
            .select_only()
            .column(inventory_unit::Column::VariantId)
            .column(inventory_unit::Column::Status)
            .column_as(inventory_unit::Column::Id.count(), "count")
            .filter(inventory_unit::Column::Status.eq(UnitStatus::Available))
            .group_by(inventory_unit::Column::VariantId)
            .group_by(inventory_unit::Column::Status)
            .into_model::<StockCount>()
            .all(&*self.db_pool)
            .await?
            .into_iter()
            .map(|row| (row.variant_id, row.count))
            .collect();

        let variants = ProductVariant::find()
            .filter(product_variant::Column::IsActive.eq(true))
            .order_by_asc(product_variant::Column::Sku)
            .all(&*self.db_pool)
            .await?;

        let low = variants
            .into_iter()
            .filter_map(|variant| {
                let available = available_by_variant
                    .get(&variant.id)
                    .copied()
                    .unwrap_or(0)
                    .max(0) as u64;
                (available <= threshold).then_some(LowStockVariant {
                    variant_id: variant.id,
                    product_id: variant.product_id,
                    name: variant.name,
                    sku: variant.sku,
                    available,
                })
            })
            .collect();

        Ok(low)
    }

    /// Available counts for a set of variants in one grouped query.
    /// Variants with no available units come back as zero.
    #[instrument(skip(self))]
    pub async fn available_counts(
        &self,
        variant_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, u64>, ServiceError> {
        let mut counts: HashMap<Uuid, u64> = variant_ids.iter().map(|id| (*id, 0)).collect();
        if variant_ids.is_empty() {
            return Ok(counts);
        }

        let rows = InventoryUnit::find()
            .select_only()
            .column(inventory_unit::Column::VariantId)
            .column(inventory_unit::Column::Status)
            .column_as(inventory_unit::Column::Id.count(), "count")
            .filter(inventory_unit::Column::VariantId.is_in(variant_ids.to_vec()))
            .filter(inventory_unit::Column::Status.eq(UnitStatus::Available))
            .group_by(inventory_unit::Column::VariantId)
            .group_by(inventory_unit::Column::Status)
            .into_model::<StockCount>()
            .all(&*self.db_pool)
            .await?;
        for row in rows {
            counts.insert(row.variant_id, row.count.max(0) as u64);
        }
        Ok(counts)
    }
}
