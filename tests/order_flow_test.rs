use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ConnectOptions, Database, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use tempfile::TempDir;
use uuid::Uuid;

use storefront_api::auth::{AuthUser, Role};
use storefront_api::db::DbPool;
use storefront_api::entities::inventory_unit::{self, UnitStatus};
use storefront_api::entities::order::Entity as Order;
use storefront_api::entities::{product, product_variant, promotion, user};
use storefront_api::errors::ServiceError;
use storefront_api::events::event_channel;
use storefront_api::migrator::Migrator;
use storefront_api::notifications::{FileInvoiceGenerator, LoggingEmailSender, OrderNotifier};
use storefront_api::services::inventory::RestockRequest;
use storefront_api::services::orders::{CreateOrderRequest, PlaceOrderItem};
use storefront_api::services::promotions::{ApplyPromotionRequest, CartItemRequest};
use storefront_api::services::{
    InventoryService, OrderService, PromotionService, StockLedgerService,
};

struct TestApp {
    db: Arc<DbPool>,
    orders: OrderService,
    inventory: InventoryService,
    promotions: PromotionService,
    stock_ledger: StockLedgerService,
    // Held so the database file and invoice directory outlive the test
    _dir: TempDir,
}

async fn setup() -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("storefront-test.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let mut opt = ConnectOptions::new(url);
    // A single connection keeps SQLite happy under transactional tests
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");

    let db = Arc::new(db);
    let (event_sender, mut event_rx) = event_channel(256);
    // Drain events so the bounded channel never fills during a test
    tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

    let notifier = Arc::new(OrderNotifier::new(
        Arc::new(FileInvoiceGenerator::new(dir.path().join("invoices"))),
        Arc::new(LoggingEmailSender),
    ));

    TestApp {
        orders: OrderService::new(db.clone(), event_sender.clone(), notifier),
        inventory: InventoryService::new(db.clone(), event_sender.clone()),
        promotions: PromotionService::new(db.clone(), event_sender),
        stock_ledger: StockLedgerService::new(db.clone()),
        db,
        _dir: dir,
    }
}

async fn seed_user(app: &TestApp, role: &str) -> AuthUser {
    let id = Uuid::new_v4();
    user::Entity::insert(user::ActiveModel {
        id: Set(id),
        username: Set(format!("user-{}", id)),
        email: Set(format!("{}@example.com", id)),
        role: Set(role.to_string()),
        created_at: Set(Utc::now()),
    })
    .exec(&*app.db)
    .await
    .expect("insert user");

    AuthUser {
        user_id: id,
        role: Role::parse(role).expect("role"),
    }
}

async fn seed_product(app: &TestApp, price: Decimal) -> (Uuid, Uuid) {
    let product_id = Uuid::new_v4();
    product::Entity::insert(product::ActiveModel {
        id: Set(product_id),
        name: Set("Ceramic Mug".into()),
        description: Set(None),
        category_id: Set(None),
        price: Set(price),
        is_active: Set(true),
        created_at: Set(Utc::now()),
    })
    .exec(&*app.db)
    .await
    .expect("insert product");

    let variant_id = Uuid::new_v4();
    product_variant::Entity::insert(product_variant::ActiveModel {
        id: Set(variant_id),
        product_id: Set(product_id),
        name: Set("Blue".into()),
        sku: Set(format!("MUG-{}", &variant_id.to_string()[..8])),
        price: Set(price),
        is_active: Set(true),
        created_at: Set(Utc::now()),
    })
    .exec(&*app.db)
    .await
    .expect("insert variant");

    (product_id, variant_id)
}

async fn seed_units(app: &TestApp, variant_id: Uuid, count: u32) {
    let now = Utc::now();
    let units: Vec<inventory_unit::ActiveModel> = (0..count)
        .map(|_| inventory_unit::ActiveModel {
            id: Set(Uuid::new_v4()),
            variant_id: Set(variant_id),
            status: Set(UnitStatus::Available),
            condition: Set("new".into()),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        })
        .collect();
    inventory_unit::Entity::insert_many(units)
        .exec(&*app.db)
        .await
        .expect("insert units");
}

async fn seed_percentage_promotion(app: &TestApp, code: &str, percent: Decimal) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    promotion::Entity::insert(promotion::ActiveModel {
        id: Set(id),
        code: Set(code.to_string()),
        name: Set("Test promo".into()),
        description: Set(None),
        kind: Set(promotion::PromotionKind::Percentage),
        value: Set(percent),
        start_date: Set(now - Duration::days(1)),
        end_date: Set(now + Duration::days(1)),
        is_active: Set(true),
        applicable_products: Set(serde_json::json!([])),
        applicable_categories: Set(serde_json::json!([])),
        min_purchase: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    })
    .exec(&*app.db)
    .await
    .expect("insert promotion");
    id
}

async fn seed_fixed_promotion(app: &TestApp, code: &str, value: Decimal) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    promotion::Entity::insert(promotion::ActiveModel {
        id: Set(id),
        code: Set(code.to_string()),
        name: Set("Flat promo".into()),
        description: Set(None),
        kind: Set(promotion::PromotionKind::Fixed),
        value: Set(value),
        start_date: Set(now - Duration::days(1)),
        end_date: Set(now + Duration::days(1)),
        is_active: Set(true),
        applicable_products: Set(serde_json::json!([])),
        applicable_categories: Set(serde_json::json!([])),
        min_purchase: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    })
    .exec(&*app.db)
    .await
    .expect("insert promotion");
    id
}

fn order_request(product_id: Uuid, quantity: u32) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![PlaceOrderItem {
            product_id,
            variant_id: None,
            quantity,
        }],
        street_address: "1 Main St".into(),
        city: "Springfield".into(),
        zip_code: "12345".into(),
        phone: "555-0100".into(),
        payment_method: "card".into(),
        promotion_code: None,
    }
}

#[tokio::test]
async fn placing_an_order_sells_units_and_snapshots_prices() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let (product_id, variant_id) = seed_product(&app, dec!(9.99)).await;
    seed_units(&app, variant_id, 5).await;

    let placed = app
        .orders
        .place_order(buyer, order_request(product_id, 2))
        .await
        .expect("place order");

    assert_eq!(placed.order.status, "Pending");
    assert_eq!(placed.order.total_amount, dec!(19.98));
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].quantity, 2);
    assert_eq!(placed.items[0].unit_price, dec!(9.99));

    let remaining = app.stock_ledger.available(variant_id).await.unwrap();
    assert_eq!(remaining, 3);
}

#[tokio::test]
async fn buying_the_exact_available_count_succeeds_and_empties_the_shelf() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let (product_id, variant_id) = seed_product(&app, dec!(4.00)).await;
    seed_units(&app, variant_id, 3).await;

    let placed = app
        .orders
        .place_order(buyer, order_request(product_id, 3))
        .await
        .expect("exact-count order");
    assert_eq!(placed.items[0].quantity, 3);
    assert_eq!(app.stock_ledger.available(variant_id).await.unwrap(), 0);

    // The shelf is empty now, so even a single unit is too many
    let result = app.orders.place_order(buyer, order_request(product_id, 1)).await;
    assert!(matches!(result, Err(ServiceError::InsufficientStock(_))));
}

#[tokio::test]
async fn insufficient_stock_rolls_back_the_whole_order() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let (cheap_product, cheap_variant) = seed_product(&app, dec!(5.00)).await;
    seed_units(&app, cheap_variant, 10).await;
    let (scarce_product, scarce_variant) = seed_product(&app, dec!(50.00)).await;
    seed_units(&app, scarce_variant, 1).await;

    let mut request = order_request(cheap_product, 3);
    request.items.push(PlaceOrderItem {
        product_id: scarce_product,
        variant_id: None,
        quantity: 2,
    });

    let result = app.orders.place_order(buyer, request).await;
    assert!(matches!(result, Err(ServiceError::InsufficientStock(_))));

    // The first line's claim must have been rolled back with the rest
    assert_eq!(app.stock_ledger.available(cheap_variant).await.unwrap(), 10);
    assert_eq!(app.stock_ledger.available(scarce_variant).await.unwrap(), 1);
    assert_eq!(Order::find().all(&*app.db).await.unwrap().len(), 0);
}

#[tokio::test]
async fn promotion_reduces_the_order_total() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let (product_id, variant_id) = seed_product(&app, dec!(20.00)).await;
    seed_units(&app, variant_id, 4).await;
    let promotion_id = seed_percentage_promotion(&app, "SAVE10", dec!(10)).await;

    let mut request = order_request(product_id, 2);
    request.promotion_code = Some("SAVE10".into());

    let placed = app.orders.place_order(buyer, request).await.unwrap();
    assert_eq!(placed.subtotal, dec!(40.00));
    assert_eq!(placed.order.total_amount, dec!(36.00));
    assert_eq!(placed.order.promotion_id, Some(promotion_id));
    let discount = placed.discount.expect("discount");
    assert_eq!(discount.amount, dec!(4.00));
}

#[tokio::test]
async fn fixed_promotion_takes_its_full_value_off_a_multi_line_order() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let (first_product, first_variant) = seed_product(&app, dec!(100.00)).await;
    seed_units(&app, first_variant, 1).await;
    let (second_product, second_variant) = seed_product(&app, dec!(50.00)).await;
    seed_units(&app, second_variant, 1).await;
    seed_fixed_promotion(&app, "FLAT15", dec!(15.00)).await;

    let mut request = order_request(first_product, 1);
    request.items.push(PlaceOrderItem {
        product_id: second_product,
        variant_id: None,
        quantity: 1,
    });
    request.promotion_code = Some("FLAT15".into());

    let placed = app.orders.place_order(buyer, request).await.unwrap();
    assert_eq!(placed.subtotal, dec!(150.00));
    let discount = placed.discount.expect("discount");
    // The flat value comes off in full, however it spreads across lines
    assert_eq!(discount.amount, dec!(15.00));
    assert_eq!(placed.order.total_amount, dec!(135.00));
}

#[tokio::test]
async fn unknown_promotion_code_fails_the_checkout() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let (product_id, variant_id) = seed_product(&app, dec!(10.00)).await;
    seed_units(&app, variant_id, 2).await;

    let mut request = order_request(product_id, 1);
    request.promotion_code = Some("NOPE".into());

    let result = app.orders.place_order(buyer, request).await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
    // Nothing was sold
    assert_eq!(app.stock_ledger.available(variant_id).await.unwrap(), 2);
}

#[tokio::test]
async fn admins_cannot_place_customer_orders() {
    let app = setup().await;
    let admin = seed_user(&app, "admin").await;
    let (product_id, variant_id) = seed_product(&app, dec!(10.00)).await;
    seed_units(&app, variant_id, 2).await;

    let result = app.orders.place_order(admin, order_request(product_id, 1)).await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    assert_eq!(app.stock_ledger.available(variant_id).await.unwrap(), 2);
}

#[tokio::test]
async fn restock_reports_old_and_new_counts() {
    let app = setup().await;
    let (_, variant_id) = seed_product(&app, dec!(7.00)).await;
    seed_units(&app, variant_id, 2).await;

    let outcome = app
        .inventory
        .restock(RestockRequest {
            variant_id,
            quantity: 3,
            condition: "new".into(),
            notes: Some("weekly delivery".into()),
        })
        .await
        .unwrap();

    assert_eq!(outcome.old_count, 2);
    assert_eq!(outcome.new_count, 5);
    assert_eq!(app.stock_ledger.available(variant_id).await.unwrap(), 5);
}

#[tokio::test]
async fn restock_of_unknown_variant_is_not_found() {
    let app = setup().await;
    let result = app
        .inventory
        .restock(RestockRequest {
            variant_id: Uuid::new_v4(),
            quantity: 1,
            condition: "new".into(),
            notes: None,
        })
        .await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn customers_cannot_read_other_peoples_orders() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let stranger = seed_user(&app, "customer").await;
    let admin = seed_user(&app, "admin").await;
    let (product_id, variant_id) = seed_product(&app, dec!(9.99)).await;
    seed_units(&app, variant_id, 2).await;

    let placed = app
        .orders
        .place_order(buyer, order_request(product_id, 1))
        .await
        .unwrap();

    let denied = app.orders.get_order(stranger, placed.order.id).await;
    assert!(matches!(denied, Err(ServiceError::Forbidden(_))));

    let own = app.orders.get_order(buyer, placed.order.id).await.unwrap();
    assert_eq!(own.order.id, placed.order.id);

    let as_admin = app.orders.get_order(admin, placed.order.id).await.unwrap();
    assert_eq!(as_admin.items.len(), 1);
}

#[tokio::test]
async fn order_history_is_newest_first_and_owner_gated() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let stranger = seed_user(&app, "customer").await;
    let (product_id, variant_id) = seed_product(&app, dec!(3.50)).await;
    seed_units(&app, variant_id, 10).await;

    for _ in 0..3 {
        app.orders
            .place_order(buyer, order_request(product_id, 1))
            .await
            .unwrap();
    }

    let history = app.orders.order_history(buyer, buyer.user_id).await.unwrap();
    assert_eq!(history.len(), 3);
    for window in history.windows(2) {
        assert!(window[0].order.order_date >= window[1].order.order_date);
    }
    assert!(history.iter().all(|entry| entry.items.len() == 1));

    let denied = app.orders.order_history(stranger, buyer.user_id).await;
    assert!(matches!(denied, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn status_updates_are_admin_only_and_validated() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let admin = seed_user(&app, "admin").await;
    let (product_id, variant_id) = seed_product(&app, dec!(9.99)).await;
    seed_units(&app, variant_id, 2).await;

    let placed = app
        .orders
        .place_order(buyer, order_request(product_id, 1))
        .await
        .unwrap();

    let denied = app
        .orders
        .update_order_status(buyer, placed.order.id, "Shipped")
        .await;
    assert!(matches!(denied, Err(ServiceError::Forbidden(_))));

    let bogus = app
        .orders
        .update_order_status(admin, placed.order.id, "Teleported")
        .await;
    assert!(matches!(bogus, Err(ServiceError::InvalidStatus(_))));

    let updated = app
        .orders
        .update_order_status(admin, placed.order.id, "Shipped")
        .await
        .unwrap();
    assert_eq!(updated.status, "Shipped");
}

#[tokio::test]
async fn committed_writes_survive_a_closed_event_channel() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let admin = seed_user(&app, "admin").await;
    let (product_id, variant_id) = seed_product(&app, dec!(9.99)).await;
    seed_units(&app, variant_id, 2).await;

    // No drain task here; dropping the receiver closes the channel, so
    // every post-commit send fails
    let (dead_sender, dead_rx) = event_channel(8);
    drop(dead_rx);
    let notifier = Arc::new(OrderNotifier::new(
        Arc::new(FileInvoiceGenerator::new(app._dir.path().join("invoices"))),
        Arc::new(LoggingEmailSender),
    ));
    let orders = OrderService::new(app.db.clone(), dead_sender.clone(), notifier);
    let inventory = InventoryService::new(app.db.clone(), dead_sender);

    let placed = orders
        .place_order(buyer, order_request(product_id, 1))
        .await
        .expect("order stands without observers");
    assert_eq!(Order::find().all(&*app.db).await.unwrap().len(), 1);
    assert_eq!(app.stock_ledger.available(variant_id).await.unwrap(), 1);

    let outcome = inventory
        .restock(RestockRequest {
            variant_id,
            quantity: 2,
            condition: "new".into(),
            notes: None,
        })
        .await
        .expect("restock stands without observers");
    assert_eq!(outcome.new_count, 3);

    let updated = orders
        .update_order_status(admin, placed.order.id, "Shipped")
        .await
        .expect("status update stands without observers");
    assert_eq!(updated.status, "Shipped");
}

#[tokio::test]
async fn apply_promotion_previews_without_touching_stock() {
    let app = setup().await;
    let (product_id, variant_id) = seed_product(&app, dec!(20.00)).await;
    seed_units(&app, variant_id, 2).await;
    seed_percentage_promotion(&app, "PREVIEW", dec!(25)).await;

    let discount = app
        .promotions
        .apply_promotion(ApplyPromotionRequest {
            code: "PREVIEW".into(),
            items: vec![CartItemRequest {
                product_id,
                category_id: None,
                quantity: 2,
                unit_price: dec!(20.00),
            }],
        })
        .await
        .unwrap();

    assert_eq!(discount.amount, dec!(10.00));
    assert_eq!(app.stock_ledger.available(variant_id).await.unwrap(), 2);
}

#[tokio::test]
async fn expiry_sweep_deactivates_only_past_promotions() {
    let app = setup().await;
    let live = seed_percentage_promotion(&app, "LIVE", dec!(10)).await;
    let expired_id = Uuid::new_v4();
    let now = Utc::now();
    promotion::Entity::insert(promotion::ActiveModel {
        id: Set(expired_id),
        code: Set("BYGONE".into()),
        name: Set("Old promo".into()),
        description: Set(None),
        kind: Set(promotion::PromotionKind::Fixed),
        value: Set(dec!(5.00)),
        start_date: Set(now - Duration::days(10)),
        end_date: Set(now - Duration::days(1)),
        is_active: Set(true),
        applicable_products: Set(serde_json::json!([])),
        applicable_categories: Set(serde_json::json!([])),
        min_purchase: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    })
    .exec(&*app.db)
    .await
    .unwrap();

    let count = app.promotions.deactivate_expired().await.unwrap();
    assert_eq!(count, 1);

    let expired = promotion::Entity::find_by_id(expired_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert!(!expired.is_active);

    let live = promotion::Entity::find_by_id(live)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert!(live.is_active);
}

#[tokio::test]
async fn summary_and_low_stock_reflect_the_ledger() {
    let app = setup().await;
    let buyer = seed_user(&app, "customer").await;
    let (product_id, variant_id) = seed_product(&app, dec!(9.99)).await;
    seed_units(&app, variant_id, 4).await;
    let (_, empty_variant) = seed_product(&app, dec!(1.00)).await;

    app.orders
        .place_order(buyer, order_request(product_id, 1))
        .await
        .unwrap();

    let summary = app.stock_ledger.summary().await.unwrap();
    let available = summary
        .iter()
        .find(|row| row.variant_id == variant_id && row.status == UnitStatus::Available)
        .expect("available row");
    assert_eq!(available.count, 3);
    let sold = summary
        .iter()
        .find(|row| row.variant_id == variant_id && row.status == UnitStatus::Sold)
        .expect("sold row");
    assert_eq!(sold.count, 1);

    let low = app.stock_ledger.low_stock(3).await.unwrap();
    assert!(low.iter().any(|v| v.variant_id == variant_id));
    // A variant with no unit rows at all still shows up at zero
    assert!(low
        .iter()
        .any(|v| v.variant_id == empty_variant && v.available == 0));

    let counts = app
        .stock_ledger
        .available_counts(&[variant_id, empty_variant])
        .await
        .unwrap();
    assert_eq!(counts.get(&variant_id), Some(&3));
    assert_eq!(counts.get(&empty_variant), Some(&0));
}
