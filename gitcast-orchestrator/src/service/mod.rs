//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP API and the repositories/scheduler and own
//! admission rules, cancellation and status queries.

pub mod cache;
pub mod job;
pub mod rate_limit;
pub mod status;

use std::sync::Arc;

use crate::repository::JobRepository;
use crate::scheduler::Scheduler;
use rate_limit::RateLimiter;

// Re-export for convenience
pub use job as job_service;
pub use status as status_service;

/// Everything the request-facing services need
#[derive(Clone)]
pub struct Orchestrator {
    pub jobs: Arc<dyn JobRepository>,
    pub scheduler: Arc<Scheduler>,
    pub rate_limiter: Arc<RateLimiter>,
    pub estimated_job_seconds: u64,
}
