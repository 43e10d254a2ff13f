//! The receive loop: one frame in, every resulting message out, repeat.

use std::time::Duration;

use crate::protocol::parse_message;
use crate::session::{Session, SessionState};
use crate::transport::{Received, Transport};

/// Pause after a failed receive before trying again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// `exit` arrived after `shutdown`.
    Exited,
    /// The client closed its end of the transport.
    Closed,
}

/// Drive `session` over `transport` until exit or end of input.
///
/// Malformed frames, unparseable messages, and transient receive or send
/// failures are logged and skipped.
pub async fn serve(transport: &mut Transport, session: &mut Session) -> ServeExit {
    let name = transport.name();
    tracing::info!("{name}: starting new session");

    loop {
        let frame = match transport.receive().await {
            Ok(Received::Frame(frame)) => frame,
            Ok(Received::Malformed(err)) => {
                tracing::warn!("{name}: discarding frame: {err}");
                continue;
            }
            Ok(Received::Closed) => {
                if session.state() != SessionState::Exited {
                    tracing::info!(state = %session.state(), "{name}: input closed");
                }
                return ServeExit::Closed;
            }
            Err(err) => {
                tracing::warn!("{name}: receive failed: {err}");
                tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                continue;
            }
        };

        tracing::debug!("{name}: REQ: {}", String::from_utf8_lossy(frame.payload()));

        match parse_message(frame.payload()) {
            Ok(message) => session.handle(message).await,
            Err(err) => {
                tracing::warn!(code = err.code(), "{name}: discarding message: {err}");
            }
        }

        for outgoing in session.drain_outgoing() {
            let bytes = match outgoing.to_bytes() {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::error!("{name}: failed to serialize reply: {err}");
                    continue;
                }
            };
            tracing::debug!("{name}: ACK: {}", String::from_utf8_lossy(&bytes));
            if let Err(err) = transport.send(&bytes).await {
                tracing::warn!("{name}: send failed: {err}");
            }
        }

        if session.state() == SessionState::Exited {
            tracing::info!("{name}: session exited");
            return ServeExit::Exited;
        }
    }
}
