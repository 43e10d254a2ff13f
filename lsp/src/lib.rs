//! Editor protocol daemon core: transports, framing, session, and the
//! bridge from pipeline log items to diagnostics.

pub mod analysis;
pub mod codec;
pub mod diagnostics;
pub mod documents;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod version;

pub use analysis::{Analysis, analyze};
pub use diagnostics::DiagnosticFormatter;
pub use documents::{DocumentError, DocumentStore};
pub use server::{ServeExit, serve};
pub use session::{Capabilities, Session, SessionOptions, SessionState};
pub use transport::{Endpoint, Received, Transport, TransportError};
