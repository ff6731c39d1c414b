pub mod config;
pub mod embedding;
pub mod errors;
pub mod logging;
pub mod search;
pub mod service;
pub mod store;
pub mod vault;

pub use errors::VaultError;
pub use service::VaultSearch;
