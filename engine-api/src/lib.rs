// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Lifecycle contract for engines that own background tasks.
//!
//! `start` spawns the engine's tasks on the caller's Tokio runtime and returns
//! immediately; `stop` cancels them. Health is a cheap snapshot callers can poll.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

pub trait Engine: Send + Sync {
    fn start(&self) -> EngineResult<()>;
    fn stop(&self) -> EngineResult<()>;
    fn health(&self) -> EngineHealth;

    fn is_running(&self) -> bool {
        !matches!(self.health().status, HealthStatus::Stopped)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    /// Started, waiting for the upstream to acknowledge.
    Starting,
    Ready,
    /// Running, but the last upstream interaction failed.
    Degraded,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl EngineHealth {
    pub fn new(status: HealthStatus, detail: Option<String>) -> Self {
        Self { status, detail }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, Some(detail.into()))
    }
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self::new(HealthStatus::Stopped, None)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error("engine must be started from within a Tokio runtime")]
    NoRuntime,
    #[error("engine encountered an error: {source}")]
    Failure {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
