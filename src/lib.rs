//! ROTOR — wallet-rotation trading cycle orchestrator
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod notify;
pub mod storage;
pub mod swap;
pub mod types;
