// src/fetch/mod.rs
//! Getting remote datasets: resolving where they live, the HTTP transfer
//! itself, and the on-disk blob cache built on both.

pub mod blob;
pub mod resolve;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_server;

pub use blob::BlobCache;
pub use resolve::{CatalogResolver, LocationResolver, TemplateResolver};
pub use transfer::{open_stream, BodyStream, Confirmation, Fetched, HttpTransfer, Transfer};
