// src/context.rs
//! Context extension traits + macros for error handling.
//!
//! - anyhow-like `.context()` / `.with_context()` on `Result` and `Option`.
//! - `bail!`, `ensure!`, `ensure_eq!` for configuration validation.
//! - Zero cost on the `Ok` path; closures only run on error.

use crate::error::{Error, Result};

/// Extension trait giving you `.context()` / `.with_context()` on any `Result`.
pub trait Context<T, E> {
    /// Add context eagerly.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    /// Add context lazily (closure only runs on error path).
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    #[inline(always)]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| err.into().context(context))
    }

    #[inline(always)]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| err.into().context(f()))
    }
}

/// Extension trait for `Option<T>` → `Result<T, Error>` with context.
pub trait OptionContext<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> OptionContext<T> for Option<T> {
    #[inline(always)]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.ok_or_else(|| Error::custom(context))
    }

    #[inline(always)]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.ok_or_else(|| Error::custom(f()))
    }
}

// ====================== CONVENIENCE MACROS ======================

/// Early return with a configuration error: `bail!("msg")` or formatted.
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::error::Error::config($msg))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::Error::config(format!($fmt, $($arg)*)))
    };
}

/// Ensure a condition is true, else `bail!`.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !($cond) {
            $crate::bail!($msg);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($fmt, $($arg)*);
        }
    };
}

/// Assert two values are equal, else a configuration error with both values.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    $crate::bail!(
                        "`{} == {}` failed (left: `{:?}`, right: `{:?}`)",
                        stringify!($left),
                        stringify!($right),
                        left_val,
                        right_val
                    );
                }
            }
        }
    }};
}

pub use crate::{bail, ensure, ensure_eq};

#[cfg(test)]
mod tests {
    use super::*;

    fn positive(value: f64) -> Result<f64> {
        ensure!(value > 0.0, "value must be positive, got {}", value);
        Ok(value)
    }

    fn same_len(a: &[f64], b: &[f64]) -> Result<()> {
        ensure_eq!(a.len(), b.len());
        Ok(())
    }

    #[test]
    fn ensure_reports_config_error() {
        assert!(positive(1.0).is_ok());
        let err = positive(-2.0).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("-2"));
    }

    #[test]
    fn ensure_eq_reports_both_sides() {
        let err = same_len(&[1.0], &[1.0, 2.0]).unwrap_err();
        assert!(err.to_string().contains("left: `1`"));
    }

    #[test]
    fn option_context() {
        let missing: Option<u32> = None;
        let err = missing.context("no such body").unwrap_err();
        assert_eq!(err.to_string(), "no such body");
    }
}
