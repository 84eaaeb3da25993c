//! Readable panic payloads.
//!
//! Work items and handlers run under `catch_unwind`. The caught payload is
//! reported back to the peer as an error message, so only its text matters.

use std::{any::Any, fmt};

/// Payload caught from a panicking work item or handler.
///
/// ```
/// use rpcwire::panic::format_panic;
///
/// let caught = std::panic::catch_unwind(|| panic!("disk {} gone", 3)).unwrap_err();
/// assert_eq!(format_panic(caught).text(), Some("disk 3 gone"));
/// assert_eq!(format_panic(Box::new(5_u32)).to_string(), "opaque panic payload");
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    /// Message text, when the panic was raised with one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.0
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.0.downcast_ref::<&'static str>().copied())
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text().unwrap_or("opaque panic payload"))
    }
}

/// Wrap a payload caught by `catch_unwind`.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }
