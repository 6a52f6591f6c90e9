// src/error.rs
//! Error handling for the entire crate.
//!
//! - **Configuration errors** surface synchronously from the constructor that
//!   rejected them (compound assembly, solver/world config validation).
//! - **View errors** replace the unchecked indexing of raw matrix storage with a
//!   recoverable `OutOfBounds` / `ShapeMismatch` at the call site.
//! - Convergence shortfalls are *not* errors; see `solver::SolverReport`.

use thiserror::Error;

/// Main error type. Send + Sync + 'static so it crosses the stepping/server threads.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Rejected configuration (empty compound, non-positive shape parameter,
    /// negative friction, ...).
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Index outside a matrix view or contact list.
    #[error("index {index} out of bounds (len={len})")]
    OutOfBounds { index: usize, len: usize },

    /// Expression and destination view disagree on element count.
    #[error("shape mismatch: expected {expected} elements, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    /// Body index does not exist in the world.
    #[error("body index {index} out of range (count={count})")]
    InvalidBody { index: usize, count: usize },

    /// I/O errors (stream sockets).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of configs and snapshots.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn config<S: Into<String>>(reason: S) -> Self {
        Self::Config { reason: reason.into() }
    }

    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Add context to any error (chainable, like `.context()` in anyhow).
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    /// True for configuration errors, looking through any context layers.
    #[inline]
    pub fn is_config(&self) -> bool {
        match self {
            Error::Config { .. } => true,
            Error::WithContext { source, .. } => source.is_config(),
            _ => false,
        }
    }

    #[inline]
    pub fn is_out_of_bounds(&self) -> bool {
        match self {
            Error::OutOfBounds { .. } => true,
            Error::WithContext { source, .. } => source.is_out_of_bounds(),
            _ => false,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
