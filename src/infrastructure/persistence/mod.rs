pub mod bot_store;
pub mod database;

pub use bot_store::SqliteBotStore;
pub use database::Database;
