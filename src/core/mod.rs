//! Core types shared across refit: the error type and its user-facing context.

pub mod error;

pub use error::{ErrorContext, RefitError, user_friendly_error};
