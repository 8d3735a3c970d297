pub mod control;
pub mod transfer;
