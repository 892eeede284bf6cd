use crate::{
    classify, Classified, Disposition, Interest, SessionError, SocketEvent, SocketHandler, TlsIo,
};
use std::cell::Cell;
use std::rc::Rc;

/// Progress of a session's handshake
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// Created, no handshake step attempted yet
    Idle,
    Handshaking,
    /// Terminal: handshake complete
    Established,
    /// Terminal: handshake failed
    Aborted,
}

/// Sent in the clear to a peer whose inbound handshake failed.  The
/// peer may not be able to make sense of it, so whether it arrives
/// does not matter.
pub const ACCEPT_ERROR_LINE: &[u8] = b"ERROR :SSL connection error\r\n";

/// Listener registry as seen from an inbound handshake
///
/// All calls happen on the single event-loop thread.
pub trait Listener {
    /// Session type handed over on promotion
    type Session: TlsIo;

    /// Count of inbound connections still handshaking.  While it is
    /// non-zero the registry must not tear the listener down.
    fn pending(&self) -> &Cell<usize>;

    /// Take over an inbound session whose handshake has completed,
    /// as a normal connection of this listener
    fn add_connection(&self, session: Self::Session);
}

/// Pin on a listener held by an inbound handshake
///
/// Creating one increments the listener's pending count and dropping
/// it decrements the count, so it changes exactly once each way no
/// matter how the handshake ends.
pub struct ListenerRef<L: Listener> {
    listener: Rc<L>,
}

impl<L: Listener> ListenerRef<L> {
    pub fn new(listener: Rc<L>) -> Self {
        let pending = listener.pending();
        pending.set(pending.get() + 1);
        Self { listener }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }
}

impl<L: Listener> Drop for ListenerRef<L> {
    fn drop(&mut self) {
        let pending = self.listener.pending();
        pending.set(pending.get().saturating_sub(1));
    }
}

/// Inbound connection whose server-side handshake is in progress
///
/// Holds the session and one pin on the listener that accepted it.
/// The pin is released exactly once, when the record is consumed by
/// promotion, by abort, or by being dropped.
pub struct PendingAccept<L: Listener> {
    session: L::Session,
    listener: ListenerRef<L>,
}

/// Result of one inbound handshake step
pub enum AcceptStep<L: Listener> {
    /// Not finished.  Wait for this readiness and step again.
    Pending(PendingAccept<L>, Interest),
    /// Handshake complete; the session now belongs to the listener.
    /// If `readable_now` is set, the peer's first data arrived along
    /// with the end of the handshake and is already decrypted, so the
    /// new connection must be read without waiting for readiness.
    Promoted { readable_now: bool },
    /// Handshake failed; session and transport have been released
    Aborted(SessionError),
}

impl<L: Listener> PendingAccept<L> {
    pub fn new(listener: Rc<L>, session: L::Session) -> Self {
        Self {
            session,
            listener: ListenerRef::new(listener),
        }
    }

    pub fn session(&self) -> &L::Session {
        &self.session
    }

    /// Attempt the next handshake step.  Safe to call any number of
    /// times while blocked: the TLS library keeps the partial
    /// handshake in its own buffers.
    ///
    /// A blocked step reports the direction the TLS library is
    /// waiting on, or both directions after a transient transport
    /// error.
    pub fn step(mut self) -> AcceptStep<L> {
        match classify(self.session.tls_handshake()) {
            Classified::Succeeded(_) => {
                let readable_now = self.session.has_buffered_plaintext();
                let PendingAccept { session, listener } = self;
                listener.listener().add_connection(session);
                log::debug!("TLS accept complete, connection promoted");
                drop(listener);
                AcceptStep::Promoted { readable_now }
            }
            Classified::Blocked(interest) => AcceptStep::Pending(self, interest),
            Classified::Fatal(err) => {
                log::debug!("TLS accept failed: {err}");
                self.session.write_plain(ACCEPT_ERROR_LINE);
                self.abort();
                AcceptStep::Aborted(err)
            }
        }
    }

    /// Tear down: close the transport, release the session and the
    /// listener pin
    pub fn abort(self) {
        let PendingAccept {
            mut session,
            listener,
        } = self;
        log::trace!("TLS accept aborted");
        session.tls_close();
        drop(session);
        drop(listener);
    }
}

/// Result of one outbound handshake step
#[derive(Debug)]
pub enum ConnectStep {
    /// Wait for the indicated readiness, then call again
    Pending(Interest),
    /// Complete.  `readable_now` as for [`AcceptStep::Promoted`].
    Established { readable_now: bool },
    /// Fatal; the caller tears the connection down
    Aborted(SessionError),
}

/// Attempt the next client-side handshake step
pub fn connect_step<S: TlsIo + ?Sized>(session: &mut S) -> ConnectStep {
    match classify(session.tls_handshake()) {
        Classified::Succeeded(_) => ConnectStep::Established {
            readable_now: session.has_buffered_plaintext(),
        },
        Classified::Blocked(interest) => ConnectStep::Pending(interest),
        Classified::Fatal(err) => {
            log::debug!("TLS connect failed: {err}");
            ConnectStep::Aborted(err)
        }
    }
}

/// Socket-layer payload for a descriptor carrying TLS
///
/// One variant per role the descriptor can be in, dispatched by
/// [`SocketHandler::on_event`].
pub enum TlsSocket<L: Listener> {
    /// Inbound, handshaking
    Accepting(PendingAccept<L>),
    /// Outbound, handshaking
    Connecting(L::Session),
    /// Outbound, established and not yet taken by the caller
    Connected(L::Session),
    /// Promoted, taken or torn down
    Detached,
}

impl<L: Listener> TlsSocket<L> {
    /// Start an inbound handshake, pinning the listener
    pub fn accept(listener: Rc<L>, session: L::Session) -> Self {
        TlsSocket::Accepting(PendingAccept::new(listener, session))
    }

    /// Start an outbound handshake
    pub fn connect(session: L::Session) -> Self {
        TlsSocket::Connecting(session)
    }

    /// Take an established outbound session
    pub fn take_session(&mut self) -> Option<L::Session> {
        match std::mem::replace(self, TlsSocket::Detached) {
            TlsSocket::Connected(session) => Some(session),
            other => {
                *self = other;
                None
            }
        }
    }
}

impl<L: Listener> SocketHandler for TlsSocket<L> {
    fn on_event(&mut self, event: SocketEvent) -> Disposition {
        let this = std::mem::replace(self, TlsSocket::Detached);
        match (this, event) {
            (TlsSocket::Detached, _) => Disposition::Closed(None),
            (TlsSocket::Accepting(pending), SocketEvent::Destroy) => {
                drop(pending);
                Disposition::Closed(None)
            }
            (TlsSocket::Accepting(pending), SocketEvent::Error | SocketEvent::Eof) => {
                pending.abort();
                Disposition::Closed(Some(SessionError::Disconnected))
            }
            (TlsSocket::Accepting(pending), SocketEvent::Readable | SocketEvent::Writable) => {
                match pending.step() {
                    AcceptStep::Pending(pending, interest) => {
                        *self = TlsSocket::Accepting(pending);
                        Disposition::Rearm(interest)
                    }
                    AcceptStep::Promoted { readable_now } => {
                        Disposition::Established { readable_now }
                    }
                    AcceptStep::Aborted(err) => Disposition::Closed(Some(err)),
                }
            }
            (
                TlsSocket::Connecting(session) | TlsSocket::Connected(session),
                SocketEvent::Destroy,
            ) => {
                drop(session);
                Disposition::Closed(None)
            }
            (
                TlsSocket::Connecting(mut session) | TlsSocket::Connected(mut session),
                SocketEvent::Error | SocketEvent::Eof,
            ) => {
                session.tls_close();
                Disposition::Closed(Some(SessionError::Disconnected))
            }
            (TlsSocket::Connecting(mut session), _) => match connect_step(&mut session) {
                ConnectStep::Pending(interest) => {
                    *self = TlsSocket::Connecting(session);
                    Disposition::Rearm(interest)
                }
                ConnectStep::Established { readable_now } => {
                    *self = TlsSocket::Connected(session);
                    Disposition::Established { readable_now }
                }
                ConnectStep::Aborted(err) => {
                    session.tls_close();
                    Disposition::Closed(Some(err))
                }
            },
            (TlsSocket::Connected(session), _) => {
                let readable_now = session.has_buffered_plaintext();
                *self = TlsSocket::Connected(session);
                Disposition::Established { readable_now }
            }
        }
    }
}
