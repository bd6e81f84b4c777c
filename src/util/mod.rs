//! Utility modules: retry, timeout, identifiers, text previews.

pub mod id;
pub mod retry;
pub mod text;
pub mod timeout;
