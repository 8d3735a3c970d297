pub mod client;
pub mod lock_table;
pub mod orchestrator;
pub mod server;
pub mod storage;
pub mod tracker_client;
