// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

/// Broad classes of failure.
///
/// Out-of-date and suboptimal chains are not errors at all: they come back as
/// [`AcquireOutcome`](crate::AcquireOutcome) / [`PresentOutcome`](crate::PresentOutcome)
/// values and are handled by the coordinator. Of the kinds below only
/// `ResourceExhaustion` is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Enumeration,
    Negotiation,
    Device,
    ResourceExhaustion,
    Configuration,
    Backend,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no GPU adapters found")]
    NoAdapters,
    #[error("none of the {candidates} adapter(s) satisfies the requirements")]
    NoEligibleAdapter { candidates: usize },
    #[error("surface negotiation failed: {0}")]
    Negotiation(&'static str),
    #[error("presentation surface lost")]
    SurfaceLost,
    #[error("failed to create presentation chain: {0}")]
    ChainCreation(String),
    #[error("presentation chain rebuild failed after {attempts} attempt(s)")]
    RebuildExhausted {
        attempts: u32,
        #[source]
        source: Box<RenderError>,
    },
    #[error("timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        after: Duration,
    },
    #[error("device lost")]
    DeviceLost,
    #[error("queue submission failed: {0}")]
    Submission(String),
    #[error("invalid render configuration: {0}")]
    InvalidConfig(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::NoAdapters | RenderError::NoEligibleAdapter { .. } => {
                ErrorKind::Enumeration
            }
            RenderError::Negotiation(_) => ErrorKind::Negotiation,
            RenderError::ChainCreation(_) => ErrorKind::ResourceExhaustion,
            RenderError::SurfaceLost
            | RenderError::RebuildExhausted { .. }
            | RenderError::Timeout { .. }
            | RenderError::DeviceLost
            | RenderError::Submission(_) => ErrorKind::Device,
            RenderError::InvalidConfig(_) => ErrorKind::Configuration,
            RenderError::Backend(_) => ErrorKind::Backend,
        }
    }

    /// True for errors the coordinator may retry locally.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::ResourceExhaustion
    }
}
