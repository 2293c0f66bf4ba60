//! Result extension trait for logging errors with their call site.

use std::fmt::Display;
use tracing::error;

/// Adds `log` to `Result` so an error can be recorded where it surfaces
/// and still be propagated with `?`.
pub trait ResultExt<T, E> {
    /// Log the error with `context` if this is an `Err`. Returns `self`
    /// unchanged.
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "querydeck_server",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ext_ok() {
        let result: Result<i32, &str> = Ok(42);
        assert_eq!(result.log("reading table").unwrap(), 42);
    }

    #[test]
    fn test_result_ext_err() {
        let result: Result<i32, &str> = Err("store down");
        assert!(result.log("reading table").is_err());
    }
}
