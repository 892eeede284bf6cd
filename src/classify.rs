use crate::{Interest, SessionError};
use std::io::ErrorKind;

/// Raw outcome of one TLS library step, before classification
#[derive(Debug)]
pub enum TlsStatus {
    /// Step completed.  For reads and writes this carries the byte
    /// count; for a handshake step it means the handshake is complete.
    Done(usize),
    /// TLS needs more bytes from the transport
    WantRead,
    /// TLS needs to flush bytes to the transport
    WantWrite,
    /// The transport call failed
    Syscall(std::io::Error),
    /// The peer sent `close_notify`
    ZeroReturn,
    /// The transport reached end-of-file without a `close_notify`
    Eof,
    /// The TLS library rejected what the peer sent
    Protocol(rustls::Error),
}

/// Outcome in the socket layer's vocabulary
#[derive(Debug)]
pub enum Classified {
    Succeeded(usize),
    /// Retry the identical call after this readiness
    Blocked(Interest),
    Fatal(SessionError),
}

/// Classify a raw TLS status.
///
/// This does not care whether the caller was reading or writing.  TLS
/// multiplexes both directions over one transport, so either kind of
/// readiness can hold up either kind of operation.
///
/// A [`SessionError::PeerClosed`] result requires the caller to send
/// its own `close_notify` before closing the transport.
pub fn classify(status: TlsStatus) -> Classified {
    match status {
        TlsStatus::Done(n) => Classified::Succeeded(n),
        TlsStatus::WantRead => Classified::Blocked(Interest::READ),
        TlsStatus::WantWrite => Classified::Blocked(Interest::WRITE),
        TlsStatus::Syscall(e) => match e.kind() {
            // An interrupted system call is retried just like one
            // that would block
            ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::ResourceBusy => {
                Classified::Blocked(Interest::BOTH)
            }
            _ => Classified::Fatal(SessionError::Transport(e)),
        },
        TlsStatus::ZeroReturn => Classified::Fatal(SessionError::PeerClosed),
        TlsStatus::Eof => Classified::Fatal(SessionError::UnexpectedEof),
        TlsStatus::Protocol(e) => Classified::Fatal(SessionError::Protocol(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn blocked(status: TlsStatus) -> Option<Interest> {
        match classify(status) {
            Classified::Blocked(interest) => Some(interest),
            _ => None,
        }
    }

    #[test]
    fn done_carries_count() {
        assert!(matches!(
            classify(TlsStatus::Done(17)),
            Classified::Succeeded(17)
        ));
    }

    #[test]
    fn wants_map_to_direction() {
        assert_eq!(blocked(TlsStatus::WantRead), Some(Interest::READ));
        assert_eq!(blocked(TlsStatus::WantWrite), Some(Interest::WRITE));
    }

    #[test]
    fn transient_transport_errors_block() {
        for kind in [
            ErrorKind::WouldBlock,
            ErrorKind::Interrupted,
            ErrorKind::ResourceBusy,
        ] {
            let status = TlsStatus::Syscall(io::Error::from(kind));
            assert_eq!(blocked(status), Some(Interest::BOTH), "{kind:?}");
        }
    }

    #[test]
    fn other_transport_errors_are_fatal() {
        let status = TlsStatus::Syscall(io::Error::from(ErrorKind::ConnectionReset));
        match classify(status) {
            Classified::Fatal(SessionError::Transport(e)) => {
                assert_eq!(e.kind(), ErrorKind::ConnectionReset)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn close_notify_is_fatal_peer_close() {
        match classify(TlsStatus::ZeroReturn) {
            Classified::Fatal(e) => assert!(e.is_peer_close()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn eof_and_protocol_are_fatal() {
        assert!(matches!(
            classify(TlsStatus::Eof),
            Classified::Fatal(SessionError::UnexpectedEof)
        ));
        let e = rustls::Error::DecryptError;
        match classify(TlsStatus::Protocol(e)) {
            Classified::Fatal(e) => assert!(!e.is_peer_close()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
