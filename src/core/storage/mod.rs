pub mod models;
pub mod repository;

pub use models::{Source, SourceId, SourceRecord};
pub use repository::{SourceRepository, StorageError};
