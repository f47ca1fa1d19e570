pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::*;
pub use sqlite::{DeletedRows, SqliteIndex};
