//! External API clients for the exchange.
//!
//! The CLOB client stays crate-private and is owned exclusively by the
//! guarded executor; every other component reads through the data client.

pub(crate) mod clob_client;
pub mod data_client;
pub mod types;

pub use data_client::DataClient;
