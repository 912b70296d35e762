pub mod config;
pub mod driver;
pub mod error;
pub mod memory_driver;
pub mod model;
pub mod orm;
pub mod query_builder;
pub mod record;
pub mod registry;
pub mod schema;
pub mod sqlx_driver;

// Re-export them for easier access from lib.rs
pub use config::*;
pub use driver::*;
pub use error::*;
pub use memory_driver::*;
pub use model::*;
pub use orm::*;
pub use query_builder::*;
pub use record::RecordInstance;
pub use registry::*;
pub use schema::*;
pub use sqlx_driver::*;
