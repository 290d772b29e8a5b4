//! Core domain types and logic.

pub mod error;
pub mod fund_series;
pub mod config;
pub mod config_validation;
pub mod covariance;
pub mod returns;
pub mod constraints;
pub mod qp;
pub mod hrp;
pub mod allocation;
pub mod performance;
pub mod frontier;
pub mod discrete;
pub mod pipeline;
pub mod universe;
