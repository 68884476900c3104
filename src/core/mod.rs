pub mod cache;
pub mod events;
pub mod feed;
pub mod importer;
pub mod registry;
pub mod storage;
pub mod subscription;
pub mod sync;
