//! TIDEWATCH: autonomous on-chain momentum trading agent
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod data;
pub mod engine;
pub mod notify;
pub mod storage;
pub mod strategy;
pub mod swap;
pub mod types;
pub mod vault;
