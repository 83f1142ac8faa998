pub mod channel;
pub mod classifier;
pub mod config;
pub mod error;
pub mod freeze;
pub mod query;
pub mod status;
pub mod terminal;
