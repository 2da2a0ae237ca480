//! Gitcast Core
//!
//! Core types and abstractions for the gitcast repository-to-video pipeline.
//!
//! This crate contains:
//! - Domain types: jobs, stages, the pipeline state machine, options, cache entries
//! - DTOs: request/response bodies of the orchestrator API

pub mod domain;
pub mod dto;
