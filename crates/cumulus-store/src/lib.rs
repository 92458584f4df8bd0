pub mod database;
pub mod fs_events;
pub mod migrations;
pub mod stores;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use stores::{SqliteEventStore, SqliteUserStore};
