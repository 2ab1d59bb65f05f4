pub mod gateway;
pub mod models;
pub mod sqlite;

pub use gateway::Gateway;
pub use sqlite::SqliteGateway;
