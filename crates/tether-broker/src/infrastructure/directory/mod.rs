//! Session Directory backends.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use crate::application::directory::SessionDirectory;
use crate::domain::DirectoryBackend;

pub use memory::MemoryDirectory;
pub use sqlite::SqliteDirectory;

/// Builds the configured backend.  Nothing is opened until `provision`.
pub fn build(backend: &DirectoryBackend) -> Arc<dyn SessionDirectory> {
    match backend {
        DirectoryBackend::Memory => Arc::new(MemoryDirectory::new()),
        DirectoryBackend::Sqlite { path } => Arc::new(SqliteDirectory::new(path.clone())),
    }
}
