//! Error primitives shared across the span stats crates.
//!
//! Modules with a narrow, well-understood failure surface define their own error enums with `snafu`. Everything that
//! only needs to bubble an error up to a process boundary (the agent binary, test harnesses) uses [`GenericError`].
#![deny(warnings)]
#![deny(missing_docs)]

use std::fmt::Display;

/// An opaque error type that can hold any error, along with a chain of context messages.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments (as `format!` does), or any value implementing both
/// `Debug` and `Display`. When given a value implementing `std::error::Error`, its source chain is preserved.
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
}

/// Extension methods for attaching context to fallible results.
///
/// This mirrors `anyhow::Context` under different method names so it can be imported alongside `snafu::ResultExt`
/// without the two sets of extension methods colliding.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with additional context, which is only built if an error actually occurred.
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
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_context_wraps_source() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk on fire"));
        let err = result.error_context("Failed to read bucket snapshot.").unwrap_err();

        assert_eq!(err.to_string(), "Failed to read bucket snapshot.");
        assert_eq!(err.root_cause().to_string(), "disk on fire");
    }

    #[test]
    fn with_error_context_is_lazy() {
        let mut evaluated = false;
        let result: Result<u32, std::io::Error> = Ok(7);
        let value = result
            .with_error_context(|| {
                evaluated = true;
                "never shown"
            })
            .unwrap();

        assert_eq!(value, 7);
        assert!(!evaluated);
    }

    #[test]
    fn generic_error_macro_formats() {
        let err = generic_error!("bucket width {} is invalid", 0);
        assert_eq!(err.to_string(), "bucket width 0 is invalid");
    }
}
