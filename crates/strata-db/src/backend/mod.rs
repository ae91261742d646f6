//! Object store backend implementations.
//!
//! ## Available Backends
//!
//! - `sqlite` (default): SQLite with WAL journaling, on disk or in memory

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteStore;

use crate::error::DbResult;
use crate::traits::{ObjectStoreBackend, StoreConfig};

/// Open an object store with the given configuration.
///
/// This is the main factory function for creating object store backends.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrated.
#[cfg(feature = "sqlite")]
pub fn open_store(config: &StoreConfig) -> DbResult<Box<dyn ObjectStoreBackend>> {
    let store = SqliteStore::open(config)?;
    Ok(Box::new(store))
}
