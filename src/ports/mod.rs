//! Port traits the domain talks to; adapters implement them.

pub mod config_port;
pub mod price_store;
pub mod fund_source;
