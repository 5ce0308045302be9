//! Core domain types
//!
//! This module contains the core domain structures used across Pricewatch crates.
//! These types represent the fundamental business entities and are shared between
//! the engine (which mutates them while crawling) and the server (which persists them).

pub mod item;
pub mod job;
pub mod log;
pub mod price;
