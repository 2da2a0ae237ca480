//! Core domain types
//!
//! The business entities shared between the orchestrator (which persists and
//! advances them) and its clients (which read them back).

pub mod cache;
pub mod identity;
pub mod job;
pub mod options;
pub mod stage;
pub mod state;
