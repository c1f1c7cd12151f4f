pub mod routes;
pub mod store;

pub use store::{BlobError, BlobStore};
