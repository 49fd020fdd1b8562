//! Panic reporting
//!
//! The session task catches its own panics and ends in `Failed` (see
//! `panic_message`). The hook installed here makes every panic, caught or
//! not, show up in the structured log with the thread that raised it. Under
//! `panic = "abort"` that record is the last line the process writes.
//!
//! ```no_run
//! use feedline_core::resilience::install_panic_handler;
//!
//! install_panic_handler();
//! ```

use std::any::Any;
use std::panic;
use std::sync::Once;
use tracing::error;

static INSTALL: Once = Once::new();

/// Route panic reports through tracing, then to the previous hook.
///
/// Only the first call installs anything.
pub fn install_panic_handler() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            let location = info
                .location()
                .map(|loc| loc.to_string())
                .unwrap_or_else(|| "<unknown location>".to_string());

            error!(
                thread = thread.name().unwrap_or("<unnamed>"),
                location = %location,
                message = %panic_message(info.payload()),
                "panic"
            );

            previous(info);
        }));
    });
}

/// Text carried by a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"static text"), "static text");
        assert_eq!(panic_message(&String::from("owned text")), "owned text");
        assert_eq!(panic_message(&42u32), "<non-string panic payload>");
    }

    #[test]
    fn test_install_twice_keeps_panics_catchable() {
        install_panic_handler();
        install_panic_handler();

        let caught = panic::catch_unwind(|| panic!("decoder bug in slot {}", 7));
        let payload = caught.err().unwrap();
        assert_eq!(panic_message(payload.as_ref()), "decoder bug in slot 7");
    }
}
