//! Replacing a session after a configuration change
//!
//! A running session's parameters are never edited. The replacement is a
//! brand-new `Session`; the old one is stopped completely (its task has
//! exited and its subscription is cancelled) before the new one starts.

use super::{MessageStream, Session};
use crate::core::SessionError;
use tracing::info;

/// Stop `old`, then start `new`. Returns the new session and its messages.
pub async fn restart(old: Session, new: Session) -> Result<(Session, MessageStream), SessionError> {
    let previous = old.state();
    old.stop().await;
    let terminal = old.wait_terminal().await;
    debug_assert!(terminal.is_terminal());
    drop(old);

    info!(
        previous = %previous,
        old_terminal = %terminal,
        "previous session released, starting replacement"
    );

    let messages = new.start()?;
    Ok((new, messages))
}
