// Adapters layer: concrete implementations of the domain ports.

pub mod bigquery;
pub mod storage;

pub use bigquery::{BigQueryClient, TokenSource};
pub use storage::LocalStorage;
