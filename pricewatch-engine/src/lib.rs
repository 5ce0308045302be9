//! Pricewatch engine
//!
//! Resource-managed price crawling under tight memory and browser budgets.
//!
//! Architecture:
//! - Session pool: bounded WebDriver sessions with health-based recycling
//! - Memory monitor: samples RSS and shrinks the pool under pressure
//! - Resilience: retry with backoff and jitter, per-site circuit breakers
//! - Adapters: selector-driven site adapters resolved by name or domain
//! - Orchestrator: batches, bounded workers, progress and cancellation
//!
//! [`engine::Engine`] wires one of each together.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod process;
pub mod resilience;
pub mod session;
pub mod sink;
pub mod source;
pub mod store;

pub use engine::Engine;
pub use error::{CrawlError, CrawlResult, EngineError, ErrorKind};
