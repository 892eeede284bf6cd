//! Non-blocking [**Rustls**] adapter for event-driven socket layers
//!
//! This lets a single-threaded, readiness-driven socket layer carry
//! TLS connections with minimal change to the code around it.  The
//! socket layer keeps its own readiness dispatch and output queues;
//! this crate takes care of the parts where TLS does not behave like
//! a plain byte stream:
//!
//! - Building and hot-reloading the server and client contexts
//!   ([`ContextManager`])
//! - Driving a handshake incrementally from readiness events, for
//!   both accepted and outbound connections ([`PendingAccept`],
//!   [`connect_step`], [`TlsSocket`])
//! - Mapping every TLS library outcome onto succeeded / blocked /
//!   fatal ([`classify`])
//! - Non-blocking receive and vectored send ([`recv`], [`sendv`])
//! - Keeping a listener's pending-connection count exact whichever
//!   way an inbound handshake ends ([`ListenerRef`])
//! - Reporting the negotiated cipher and the peer certificate
//!   fingerprint ([`TlsSession::cipher`],
//!   [`TlsSession::peer_fingerprint`])
//!
//! Nothing here ever blocks.  Any call that cannot complete reports
//! "blocked", and the caller re-arms readiness and calls again later
//! with exactly the same arguments.  Since TLS multiplexes both
//! directions over one transport, a read may need the socket to be
//! writable and vice versa, so callers should normally re-arm for
//! both directions.
//!
//! # Versioning
//!
//! This crate follows the major/minor version number of the
//! [**Rustls**] crate it wraps.  Rustls is re-exported as
//! `evsock_tls::rustls`.
//!
//! # Selecting the crypto provider
//!
//! The `ring` feature is on by default.  To use `aws-lc-rs` instead:
//!
//! ```ignore
//! [dependencies]
//! evsock_tls = { version = "0.23", default-features = false, features = ["aws_lc_rs"] }
//! ```
//!
//! [**Rustls**]: https://crates.io/crates/rustls

#![forbid(unsafe_code)]

pub use rustls;

#[cfg(all(not(feature = "ring"), not(feature = "aws_lc_rs")))]
compile_error!("Select a crate feature: either `ring` or `aws_lc_rs`");

mod classify;
mod context;
mod event;
mod handshake;
mod introspect;
mod io;
mod session;

#[cfg(test)]
mod testing;

pub use classify::{classify, Classified, TlsStatus};
pub use context::{ClientCertPolicy, ContextManager, Contexts, Role, TlsSettings};
pub use event::{Disposition, Interest, SocketEvent, SocketHandler};
pub use handshake::{
    connect_step, AcceptStep, ConnectStep, HandshakeState, Listener, ListenerRef, PendingAccept,
    TlsSocket, ACCEPT_ERROR_LINE,
};
pub use introspect::{describe_cipher, Fingerprint};
pub use io::{recv, sendv, IoOutcome, SendQueue, Sendv, MAX_IOV};
pub use session::{TlsIo, TlsSession, Transport};

use std::path::PathBuf;

/// Failure to build a TLS context
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    #[error("cannot build {role} context: {source}")]
    Rustls { role: Role, source: rustls::Error },
}

/// Failure of a single TLS session
///
/// Only the affected session is torn down.  Contexts and listeners
/// are never affected.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("TLS protocol error: {0}")]
    Protocol(#[from] rustls::Error),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// The peer sent `close_notify`
    #[error("peer closed the TLS session")]
    PeerClosed,
    #[error("transport closed without close_notify")]
    UnexpectedEof,
    /// The socket layer reported an error or hangup on the descriptor
    #[error("socket disconnected")]
    Disconnected,
}

impl SessionError {
    /// True for an orderly `close_notify` from the peer.  This is not
    /// an anomaly, but the session still cannot be used again.
    pub fn is_peer_close(&self) -> bool {
        matches!(self, SessionError::PeerClosed)
    }
}
