//! Pricewatch Core
//!
//! Core types shared by the Pricewatch crawling engine, server and CLI.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, WorkItem, PriceResult, etc.)
//! - DTOs: Data transfer objects for the HTTP API and status reporting

pub mod domain;
pub mod dto;
