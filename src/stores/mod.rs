pub mod directory;
pub mod download_log;
