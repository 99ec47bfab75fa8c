//! Session storage backends.

pub mod file;
pub mod object_store;

pub use file::FileStorage;
pub use object_store::ObjectStoreStorage;
