//! Utility functions and helpers for the gateway.
//!
//! Cross-cutting concerns: structured logging with token sanitization, and
//! retry logic that respects upstream retry hints.

pub mod logging;
pub mod retry;
