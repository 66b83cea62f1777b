use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PromotionKind {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
    #[sea_orm(string_value = "bogo")]
    Bogo,
}

/// A discount campaign. The applicability sets are stored as JSON arrays of
/// UUIDs; an empty set means the promotion applies to every product or
/// category. The expiry sweep flipping `is_active` is advisory only: the
/// evaluator re-checks the validity window and flag itself.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: PromotionKind,
    pub value: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub applicable_products: Json,
    pub applicable_categories: Json,
    pub min_purchase: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Product IDs this promotion is restricted to; empty means all products.
    pub fn product_set(&self) -> Vec<Uuid> {
        serde_json::from_value(self.applicable_products.clone()).unwrap_or_default()
    }

    /// Category IDs this promotion is restricted to; empty means all categories.
    pub fn category_set(&self) -> Vec<Uuid> {
        serde_json::from_value(self.applicable_categories.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
