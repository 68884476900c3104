use crate::config::ConfigError;
use crate::core::cache::CacheError;
use crate::core::feed::DecodeError;
use crate::core::importer::ImportError;
use crate::core::registry::RegistryError;
use crate::core::storage::StorageError;
use crate::core::subscription::LifecycleError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
