use crate::SessionError;

/// Readiness set to wait for before calling again
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };
}

/// Notification delivered by the socket layer for one descriptor
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    Readable,
    Writable,
    /// Error condition reported on the descriptor
    Error,
    /// End of stream on the descriptor
    Eof,
    /// The socket layer is discarding the registration
    Destroy,
}

/// What the socket layer should do with the registration after an
/// event has been handled
#[derive(Debug)]
pub enum Disposition {
    /// Still handshaking.  Wait for this readiness and deliver the
    /// next event.
    Rearm(Interest),
    /// The handshake is complete.  An inbound session has already
    /// been handed to its listener; an outbound one can be taken with
    /// [`TlsSocket::take_session`].  Either way this registration is
    /// done with TLS setup.
    ///
    /// With `readable_now` set, decrypted data is already waiting in
    /// the session and the transport may have nothing more to
    /// announce.  The caller must call [`recv`] straight away rather
    /// than wait for a readable event.
    ///
    /// [`TlsSocket::take_session`]: crate::TlsSocket::take_session
    /// [`recv`]: crate::recv
    Established { readable_now: bool },
    /// The session and transport have been released.  Carries the
    /// cause, or `None` for a `Destroy` notification.
    Closed(Option<SessionError>),
}

/// Callback interface the socket layer invokes for each event on a
/// registered descriptor.  Must tolerate being invoked repeatedly
/// with no new data.
pub trait SocketHandler {
    fn on_event(&mut self, event: SocketEvent) -> Disposition;
}
