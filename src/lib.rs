pub mod console;
pub mod core;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod peer;
pub mod protocol;
pub mod stores;
pub mod tracker;
pub mod utils;
