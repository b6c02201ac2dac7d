pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod gallery;
pub mod index;
mod metrics;
pub mod persist;
pub mod provider;
pub mod retriever;
pub mod store;
pub mod utils;

pub use catalog::{Catalog, StalePolicy};
pub use config::Opts;
pub use error::{Error, ProviderError, Result};
pub use retriever::{MultiVectorRetriever, QueryResult, RetrieverBuilder};
