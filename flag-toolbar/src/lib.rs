pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod metrics_consts;
pub mod server;
pub mod state;
pub mod storage;
pub mod toolbar;

// Public so integration tests under tests/ can share the mocks.
pub mod test_utils;
