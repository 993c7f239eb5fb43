//! Catch-all error handling for application-level code.
//!
//! Library crates in this workspace expose precise error enums. Once an error crosses into code that only needs to
//! report it (bootstrap, the server binary, configuration plumbing), it gets erased into [`GenericError`].
use std::fmt::Display;

/// An opaque error with an optional chain of causes.
pub type GenericError = anyhow::Error;

/// Builds a [`GenericError`].
///
/// Accepts a string literal, a format string followed by its arguments, or any value implementing `Debug` and
/// `Display`. If the value is itself an error, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
    impl<T> Sealed for Option<T> {}
}

/// Attaches human-readable context to a failure while converting it into a [`GenericError`].
///
/// This mirrors `anyhow::Context` under a different method name, so it can be imported alongside `snafu::ResultExt`
/// without the two colliding.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the failure with `context`.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the failure with the context produced by `f`, which only runs if there is a failure.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        anyhow::Context::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        anyhow::Context::with_context(self, f)
    }
}

impl<T> ErrorContext<T, std::convert::Infallible> for Option<T> {
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        anyhow::Context::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        anyhow::Context::with_context(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_result_error() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk on fire"));
        let err = result.error_context("failed to write output").unwrap_err();

        assert_eq!(err.to_string(), "failed to write output");
        assert_eq!(err.root_cause().to_string(), "disk on fire");
    }

    #[test]
    fn context_wraps_missing_option() {
        let value: Option<u32> = None;
        let err = value.with_error_context(|| format!("no value for {}", "port")).unwrap_err();
        assert_eq!(err.to_string(), "no value for port");

        assert_eq!(Some(7).error_context("unused").unwrap(), 7);
    }

    #[test]
    fn macro_forms() {
        let port = 8125;
        assert_eq!(generic_error!("plain").to_string(), "plain");
        assert_eq!(generic_error!("bad port {}", port).to_string(), "bad port 8125");
    }
}
