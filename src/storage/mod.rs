//! SQLite-backed feed store.
//!
//! Feed CRUD lives in `feeds`, article queries and retention in `articles`,
//! and the transactional deduplicating importer in `import`.

mod articles;
mod feeds;
mod import;
mod schema;
mod types;

pub use schema::Database;
pub use types::{Article, DatabaseError, Feed};
