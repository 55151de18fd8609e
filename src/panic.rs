//! Utilities for working with panic payloads.
//!
//! Dispatched handlers run on their own tasks; when one panics the payload is
//! logged through [`format_panic`] and the read loop carries on.

use std::{any::Any, fmt};

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible; any
/// other payload is shown as a fixed placeholder.
///
/// ```
/// use wirelane::panic::format_panic;
/// assert_eq!(format_panic(&"boom").to_string(), "boom");
/// assert_eq!(format_panic(&String::from("boom")).to_string(), "boom");
/// assert_eq!(format_panic(&5_u32).to_string(), "non-string panic payload");
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage<'a>(&'a (dyn Any + Send));

impl fmt::Display for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            f.write_str("non-string panic payload")
        }
    }
}

/// Create a [`PanicMessage`] borrowing the given payload.
///
/// Pass the payload itself (`&*boxed`), not a reference to its `Box`.
pub fn format_panic(panic: &(dyn Any + Send)) -> PanicMessage<'_> { PanicMessage(panic) }
