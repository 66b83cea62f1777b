pub mod inventory_unit;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_variant;
pub mod promotion;
pub mod user;
