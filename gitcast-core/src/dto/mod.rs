//! Data Transfer Objects
//!
//! Request and response bodies of the orchestrator HTTP API.

pub mod job;
