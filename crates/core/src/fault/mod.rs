//! Fault containment between independent effect sinks.
//!
//! A sink may fail by returning an error or by panicking. Either way the
//! failure is turned into a value here so the caller can log it and carry on
//! with the next sink.

use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
};

use crate::{KeysmashError, Result};

/// Why a contained action did not complete.
#[derive(Debug)]
pub enum SinkFailure {
    Error(KeysmashError),
    Panic(String),
}

impl fmt::Display for SinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{err}"),
            Self::Panic(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Runs `action`, converting both `Err` results and panics into a
/// [`SinkFailure`].
pub fn contain<T>(action: impl FnOnce() -> Result<T>) -> std::result::Result<T, SinkFailure> {
    match catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(SinkFailure::Error(err)),
        Err(payload) => Err(SinkFailure::Panic(panic_message(payload.as_ref()))),
    }
}

/// Like [`contain`], but logs the failure under `sink` and discards it.
pub fn isolate<T>(sink: &'static str, action: impl FnOnce() -> Result<T>) -> Option<T> {
    match contain(action) {
        Ok(value) => Some(value),
        Err(failure) => {
            tracing::warn!(sink, %failure, "sink action failed");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_values_through() {
        assert_eq!(isolate("test", || Ok(3)), Some(3));
    }

    #[test]
    fn contains_errors() {
        let failure = contain(|| -> Result<()> { Err("boom".into()) }).unwrap_err();
        assert!(matches!(failure, SinkFailure::Error(_)));
        assert_eq!(failure.to_string(), "boom");
    }

    #[test]
    fn contains_panics() {
        let failure = contain(|| -> Result<()> { panic!("synth exploded") }).unwrap_err();
        assert_eq!(failure.to_string(), "panicked: synth exploded");
        assert_eq!(isolate("tone", || -> Result<()> { panic!("again") }), None);
    }
}
