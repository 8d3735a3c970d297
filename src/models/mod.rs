pub mod candidate;
pub mod download;
pub mod peer;
