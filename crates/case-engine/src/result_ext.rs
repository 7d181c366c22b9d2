//! Logging helpers for `Result` and `Option`.
//!
//! Service entry points log a failed command once, with the caller location,
//! before handing the error back. Caller mistakes and state guard violations
//! are expected traffic and go out at `warn`; engine and store failures at
//! `error`.

use std::fmt::Display;
use std::panic::Location;

use tracing::{error, warn};

use crate::error::EngineError;

fn at(location: &Location<'_>) -> String {
    format!("{}:{}", location.file(), location.line())
}

pub trait ResultExt<T, E> {
    /// Log an `Err` at `error` and return the result unchanged.
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            error!(
                target: "case_engine",
                error = %e,
                at = %at(Location::caller()),
                context = %context.to_string(),
                "Case engine operation failed"
            );
        }
        self
    }
}

pub trait EngineResultExt<T> {
    /// Log a rejected command at `warn`, anything else through [`ResultExt::log`].
    fn log_rejection<S: ToString>(self, context: S) -> Result<T, EngineError>;
}

impl<T> EngineResultExt<T> for Result<T, EngineError> {
    #[track_caller]
    fn log_rejection<S: ToString>(self, context: S) -> Result<T, EngineError> {
        match &self {
            Err(
                e @ (EngineError::NotFound(_)
                | EngineError::NotValid(_)
                | EngineError::NotAllowed(_)
                | EngineError::Conflict { .. }),
            ) => {
                warn!(
                    target: "case_engine",
                    error = %e,
                    kind = e.kind(),
                    context = %context.to_string(),
                    "Command rejected"
                );
                self
            }
            _ => self.log(context),
        }
    }
}

pub trait OptionResultExt<T> {
    /// Warn when a record that should exist is gone.
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            warn!(
                target: "case_engine",
                at = %at(Location::caller()),
                missing = %context.to_string(),
                "Referenced record no longer exists"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_passes_result_through() {
        let ok: Result<u32, EngineError> = Ok(3);
        assert_eq!(ok.log("counting executions").unwrap(), 3);

        let err: Result<u32, EngineError> = Err(EngineError::Internal("store offline".to_string()));
        assert!(matches!(err.log("saving tree"), Err(EngineError::Internal(_))));
    }

    #[test]
    fn test_log_rejection_keeps_error() {
        let result: Result<(), EngineError> = Err(EngineError::NotValid("bad".to_string()));
        let logged = result.log_rejection("starting case execution");
        assert!(matches!(logged, Err(EngineError::NotValid(_))));

        let result: Result<(), EngineError> = Err(EngineError::ExternalService("down".to_string()));
        assert!(result.log_rejection("starting process").is_err());
    }

    #[test]
    fn test_log_none_passes_option_through() {
        assert!(None::<String>.log_none("embedded case instance 'x'").is_none());
        assert_eq!(Some(1).log_none("case instance 'y'"), Some(1));
    }
}
