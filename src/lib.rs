//! VELVET ARC — Autonomous Cross-Chain Liquidity Agent
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market;
pub mod strategy;
pub mod chain;
pub mod bridge;
pub mod engine;
pub mod dashboard;
