pub mod auth;
pub mod block_store;
pub mod client;
pub mod flat_store;
pub mod namespace;
