// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Fatal renderer failures. A stale surface is not an error; it is reported
/// through [`crate::FrameStatus::NeedsRecreate`].
#[derive(Debug, Error)]
pub enum RenderError {
    /// Missing queue family, extension, feature, format or usage.
    #[error("unsupported: {0}")]
    Capability(String),

    #[error("{call} failed: {reason}")]
    Platform { call: &'static str, reason: String },

    /// Host/device memory or a pool ran out.
    #[error("{call} ran out of resources: {reason}")]
    Exhausted { call: &'static str, reason: String },

    #[error("shader: {0}")]
    Shader(String),

    #[error("frame protocol: expected {expected}, found {found}")]
    OutOfOrder {
        expected: &'static str,
        found: &'static str,
    },

    /// Loader, window handle or other environment failures.
    #[error("loader: {0}")]
    Loader(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    pub fn platform(call: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Platform {
            call,
            reason: reason.to_string(),
        }
    }
}
