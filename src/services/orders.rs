use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::db::DbPool;
use crate::entities::inventory_unit::UnitStatus;
use crate::entities::order::{self, Entity as Order, ALLOWED_STATUSES};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::entities::product::{self, Entity as Product};
use crate::entities::product_variant::{self, Entity as ProductVariant};
use crate::entities::promotion::{self, Entity as Promotion};
use crate::entities::user::Entity as User;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::notifications::{Customer, OrderNotifier, OrderSnapshot, SnapshotLine};
use crate::services::inventory::claim_units;
use crate::services::promotions::{self, CartItem, Discount};

/// One requested line of a new order. When `variant_id` is omitted the
/// product must have exactly one active variant.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 1_000))]
    pub quantity: u32,
}

/// Checkout request body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 100))]
    pub items: Vec<PlaceOrderItem>,
    #[validate(length(min = 1, max = 255))]
    pub street_address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 20))]
    pub zip_code: String,
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 32))]
    pub payment_method: String,
    #[validate(length(min = 1, max = 64))]
    pub promotion_code: Option<String>,
}

/// A committed order together with its lines and any discount applied.
#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub subtotal: Decimal,
    pub discount: Option<Discount>,
}

/// An order with its lines, as returned by read endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

struct ResolvedLine {
    product: product::Model,
    variant: product_variant::Model,
    quantity: u32,
}

/// Coordinates the checkout transaction and the order read/update paths.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    notifier: Arc<OrderNotifier>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        notifier: Arc<OrderNotifier>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            notifier,
        }
    }

    /// Place an order. All stock claims and inserts happen in one database
    /// transaction; if any line cannot be satisfied the whole order rolls
    /// back and no unit changes hands. Invoice and email dispatch run after
    /// the commit and never fail the order.
    #[instrument(skip(self, request), fields(user_id = %user.user_id))]
    pub async fn place_order(
        &self,
        user: AuthUser,
        request: CreateOrderRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        // Administrators manage orders, they do not place them.
        if user.is_admin() {
            return Err(ServiceError::Forbidden(
                "administrators cannot place customer orders".into(),
            ));
        }

        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }

        let txn = self.db_pool.begin().await?;
        let (placed, snapshot) = match self.place_order_in_txn(&txn, user, &request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Surface the business error, not a secondary rollback
                // failure; the connection is dropped either way.
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed after aborted checkout");
                }
                return Err(err);
            }
        };
        txn.commit().await?;

        info!(
            order_id = %placed.order.id,
            total = %placed.order.total_amount,
            "Order placed"
        );

        // The order is committed from here on; a dead event channel is an
        // observability gap, not a checkout failure.
        if let Err(err) = self
            .event_sender
            .send(Event::OrderCreated {
                order_id: placed.order.id,
                user_id: placed.order.user_id,
                total_amount: placed.order.total_amount,
            })
            .await
        {
            warn!(order_id = %placed.order.id, error = %err, "Failed to emit order event");
        }
        for item in &placed.items {
            if let Err(err) = self
                .event_sender
                .send(Event::InventorySold {
                    variant_id: item.variant_id,
                    quantity: item.quantity as u64,
                })
                .await
            {
                warn!(variant_id = %item.variant_id, error = %err, "Failed to emit sale event");
            }
        }
        if let Some(discount) = &placed.discount {
            if let Err(err) = self
                .event_sender
                .send(Event::PromotionApplied {
                    promotion_id: discount.promotion_id,
                    order_id: placed.order.id,
                    discount: discount.amount,
                })
                .await
            {
                warn!(order_id = %placed.order.id, error = %err, "Failed to emit promotion event");
            }
        }

        // Best effort; failures are logged inside the notifier.
        self.notifier.order_placed(&snapshot).await;

        Ok(placed)
    }

    async fn place_order_in_txn<C>(
        &self,
        txn: &C,
        user: AuthUser,
        request: &CreateOrderRequest,
    ) -> Result<(PlacedOrder, OrderSnapshot), ServiceError>
    where
        C: ConnectionTrait,
    {
        let account = User::find_by_id(user.user_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {} not found", user.user_id)))?;

        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let line = self.resolve_line(txn, item).await?;
            claim_units(txn, line.variant.id, item.quantity as u64, UnitStatus::Sold)
                .await
                .map_err(|err| match err {
                    ServiceError::InsufficientStock(detail) => ServiceError::InsufficientStock(
                        format!("insufficient stock for {}: {}", line.product.name, detail),
                    ),
                    other => other,
                })?;
            lines.push(line);
        }

        let cart: Vec<CartItem> = lines
            .iter()
            .map(|line| CartItem {
                product_id: line.product.id,
                category_id: line.product.category_id,
                quantity: line.quantity,
                unit_price: line.variant.price,
            })
            .collect();
        let subtotal: Decimal = cart
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();

        let now = Utc::now();
        let discount = match &request.promotion_code {
            Some(code) => {
                let model = Promotion::find()
                    .filter(promotion::Column::Code.eq(code.as_str()))
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("unknown promotion code {}", code))
                    })?;
                if !model.is_active || now < model.start_date || now > model.end_date {
                    return Err(ServiceError::NotFound(format!(
                        "promotion {} is expired or inactive",
                        code
                    )));
                }
                Some(promotions::evaluate(&model, &cart, now)?)
            }
            None => None,
        };

        let discount_amount = discount
            .as_ref()
            .map(|d| d.amount)
            .unwrap_or(Decimal::ZERO);
        let total_amount = (subtotal - discount_amount).max(Decimal::ZERO);

        let order_id = Uuid::new_v4();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user.user_id),
            order_date: Set(now),
            status: Set("Pending".to_string()),
            total_amount: Set(total_amount),
            street_address: Set(request.street_address.clone()),
            city: Set(request.city.clone()),
            zip_code: Set(request.zip_code.clone()),
            phone: Set(request.phone.clone()),
            payment_method: Set(request.payment_method.clone()),
            promotion_id: Set(discount.as_ref().map(|d| d.promotion_id)),
            created_at: Set(now),
        };
        let order = Order::insert(order_model)
            .exec_with_returning(txn)
            .await?;

        let item_models: Vec<order_item::ActiveModel> = lines
            .iter()
            .map(|line| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                variant_id: Set(line.variant.id),
                quantity: Set(line.quantity as i32),
                unit_price: Set(line.variant.price),
                created_at: Set(now),
            })
            .collect();
        OrderItem::insert_many(item_models).exec(txn).await?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;

        let snapshot = OrderSnapshot {
            order_id,
            customer: Customer {
                user_id: account.id,
                username: account.username,
                email: account.email,
            },
            lines: lines
                .iter()
                .map(|line| SnapshotLine {
                    name: format!("{} ({})", line.product.name, line.variant.name),
                    sku: line.variant.sku.clone(),
                    quantity: line.quantity,
                    unit_price: line.variant.price,
                })
                .collect(),
            subtotal,
            discount: discount.as_ref().map(|d| (d.code.clone(), d.amount)),
            total: total_amount,
        };

        Ok((
            PlacedOrder {
                order,
                items,
                subtotal,
                discount,
            },
            snapshot,
        ))
    }

    /// Resolve a request line to a concrete active product and variant.
    async fn resolve_line<C>(
        &self,
        txn: &C,
        item: &PlaceOrderItem,
    ) -> Result<ResolvedLine, ServiceError>
    where
        C: ConnectionTrait,
    {
        let product = Product::find_by_id(item.product_id)
            .one(txn)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                ServiceError::ProductNotFound(format!("product {} not found", item.product_id))
            })?;

        let variant = match item.variant_id {
            Some(variant_id) => ProductVariant::find_by_id(variant_id)
                .one(txn)
                .await?
                .filter(|v| v.product_id == product.id && v.is_active)
                .ok_or_else(|| {
                    ServiceError::ProductNotFound(format!(
                        "variant {} not found for product {}",
                        variant_id, product.id
                    ))
                })?,
            None => {
                let mut variants = ProductVariant::find()
                    .filter(product_variant::Column::ProductId.eq(product.id))
                    .filter(product_variant::Column::IsActive.eq(true))
                    .all(txn)
                    .await?;
                if variants.len() != 1 {
                    return Err(ServiceError::ProductNotFound(format!(
                        "product {} requires an explicit variant",
                        product.id
                    )));
                }
                variants.remove(0)
            }
        };

        Ok(ResolvedLine {
            product,
            variant,
            quantity: item.quantity,
        })
    }

    /// Fetch one order with its lines. Customers may only read their own.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        caller: AuthUser,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;

        if !caller.can_access_user(order.user_id) {
            return Err(ServiceError::Forbidden(
                "cannot access another user's order".into(),
            ));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db_pool)
            .await?;

        Ok(OrderWithItems { order, items })
    }

    /// All orders for a user, newest first, each with its lines.
    #[instrument(skip(self))]
    pub async fn order_history(
        &self,
        caller: AuthUser,
        user_id: Uuid,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        if !caller.can_access_user(user_id) {
            return Err(ServiceError::Forbidden(
                "cannot access another user's order history".into(),
            ));
        }

        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::OrderDate)
            .all(&*self.db_pool)
            .await?;

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: std::collections::HashMap<Uuid, Vec<order_item::Model>> =
            std::collections::HashMap::new();
        if !order_ids.is_empty() {
            let items = OrderItem::find()
                .filter(order_item::Column::OrderId.is_in(order_ids))
                .all(&*self.db_pool)
                .await?;
            for item in items {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                OrderWithItems { order, items }
            })
            .collect())
    }

    /// Administrator action: move an order to a new status.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        caller: AuthUser,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<order::Model, ServiceError> {
        if !caller.is_admin() {
            return Err(ServiceError::Forbidden(
                "only administrators may change order status".into(),
            ));
        }

        if !ALLOWED_STATUSES.contains(&new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "'{}' is not one of {:?}",
                new_status, ALLOWED_STATUSES
            )));
        }

        let order = Order::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;

        let old_status = order.status.clone();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status.to_string());
        let updated = sea_orm::ActiveModelTrait::update(active, &*self.db_pool).await?;

        if let Err(err) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: new_status.to_string(),
            })
            .await
        {
            warn!(order_id = %order_id, error = %err, "Failed to emit status event");
        }

        Ok(updated)
    }
}
