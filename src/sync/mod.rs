//! Remote folder synchronization

pub mod synchronizer;

pub use synchronizer::FolderSynchronizer;
