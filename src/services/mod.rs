pub mod inventory;
pub mod orders;
pub mod promotions;
pub mod stock_ledger;

pub use inventory::InventoryService;
pub use orders::OrderService;
pub use promotions::PromotionService;
pub use stock_ledger::StockLedgerService;
