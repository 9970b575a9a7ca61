//! poly-maker: maker-rebate market making bot for Polymarket CLOB markets
//!
//! This library provides the core components for:
//! - Two-sided quoting on short-lived crypto markets
//! - Inventory-aware risk limits with a session stop-loss
//! - Order lifecycle management with an explicit state machine
//! - Real (signing) and sandbox (simulated fill) trading backends
//! - Dual-channel fill reconciliation (WebSocket push + REST poll)
//! - A fixed-interval cancel/replace control loop

pub mod config;
pub mod engine;
pub mod exec;
pub mod lifecycle;
pub mod market;
pub mod quote;
pub mod reconcile;
pub mod risk;
pub mod telemetry;
pub mod ws;
