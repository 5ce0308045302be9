//! Data Transfer Objects
//!
//! DTOs exchanged between the engine, the HTTP server and the CLI. They are
//! lightweight views over engine state optimized for JSON transfer.

pub mod job;
pub mod system;
