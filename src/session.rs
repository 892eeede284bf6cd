use crate::handshake::HandshakeState;
use crate::{describe_cipher, Fingerprint, TlsStatus};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConnection, ProtocolVersion, ServerConnection};
use std::io::{self, ErrorKind, Read, Write};

/// Raw byte transport a session runs over, typically a connected
/// socket in non-blocking mode
pub trait Transport: Read + Write {
    /// Put the transport into non-blocking mode
    fn set_nonblocking(&self) -> io::Result<()> {
        Ok(())
    }

    /// Close the transport.  Later reads and writes fail.
    fn close(&mut self);
}

impl Transport for std::net::TcpStream {
    fn set_nonblocking(&self) -> io::Result<()> {
        std::net::TcpStream::set_nonblocking(self, true)
    }

    fn close(&mut self) {
        let _ = self.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn set_nonblocking(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_nonblocking(self, true)
    }

    fn close(&mut self) {
        let _ = self.shutdown(std::net::Shutdown::Both);
    }
}

/// The TLS primitives the handshake state machine and the I/O
/// adapter are built on.  [`TlsSession`] implements this over Rustls.
///
/// Every call is non-blocking.  A call that reports `WantRead`,
/// `WantWrite` or a transient `Syscall` error must be repeated later
/// with identical arguments.
pub trait TlsIo {
    /// Advance the handshake as far as the transport allows.  Returns
    /// `Done(0)` once the handshake has completed and all of its
    /// output has been flushed; repeated calls then keep returning
    /// `Done(0)`.
    fn tls_handshake(&mut self) -> TlsStatus;

    /// Decrypt into `buf`.  Returns `ZeroReturn` after the peer's
    /// `close_notify`.
    fn tls_read(&mut self, buf: &mut [u8]) -> TlsStatus;

    /// Encrypt from `buf`.  `Done(n)` may accept fewer than
    /// `buf.len()` bytes; bytes not accepted were not consumed.
    fn tls_write(&mut self, buf: &[u8]) -> TlsStatus;

    /// Write out TLS records the library is still holding.  `Done(0)`
    /// once nothing is left, `WantWrite` if the transport filled up.
    fn tls_flush(&mut self) -> TlsStatus;

    /// Queue our own `close_notify` and try to flush it
    fn tls_shutdown(&mut self);

    /// Write bytes directly on the transport, bypassing TLS.  Best
    /// effort: the result is ignored.
    fn write_plain(&mut self, bytes: &[u8]);

    /// Close the underlying transport
    fn tls_close(&mut self);

    /// True if decrypted data is already waiting inside the session.
    /// No readiness event will announce it, since its records have
    /// already been taken off the transport.
    fn has_buffered_plaintext(&self) -> bool;
}

enum Conn {
    Server(ServerConnection),
    Client(ClientConnection),
}

// Both connection types share their API through `Deref` to
// `ConnectionCommon`, but not through a trait
macro_rules! conn {
    ($conn:expr, $c:ident => $e:expr) => {
        match $conn {
            Conn::Server($c) => $e,
            Conn::Client($c) => $e,
        }
    };
}

/// One connection's TLS state, bound to the transport it runs over
///
/// Owns both the Rustls connection and the transport.  Dropping the
/// session releases both, so the graceful-close and abort paths can
/// never leak or double-free it.
pub struct TlsSession<T: Transport> {
    conn: Conn,
    transport: T,
    state: HandshakeState,
    // Decrypted bytes held by Rustls, as of the last read
    buffered: usize,
}

impl<T: Transport> TlsSession<T> {
    /// Wrap an accepted transport with a server-role connection
    pub fn server(conn: ServerConnection, transport: T) -> Self {
        Self::new(Conn::Server(conn), transport)
    }

    /// Wrap an outbound transport with a client-role connection
    pub fn client(conn: ClientConnection, transport: T) -> Self {
        Self::new(Conn::Client(conn), transport)
    }

    fn new(mut conn: Conn, transport: T) -> Self {
        conn!(&mut conn, c => c.set_buffer_limit(Some(SEND_BUFFER_LIMIT)));
        Self {
            conn,
            transport,
            state: HandshakeState::Idle,
            buffered: 0,
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self.conn, Conn::Server(_))
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Negotiated protocol version, once known
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        conn!(&self.conn, c => c.protocol_version())
    }

    /// Negotiated cipher as `VERSION-CIPHERNAME-NNNbits`, or `None`
    /// before the handshake has got that far
    pub fn cipher(&self) -> Option<String> {
        let version = self.protocol_version()?;
        let suite = conn!(&self.conn, c => c.negotiated_cipher_suite())?;
        Some(describe_cipher(version, suite.suite()))
    }

    /// End-entity certificate presented by the peer, if any
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        conn!(&self.conn, c => c.peer_certificates())?.first()
    }

    /// Fingerprint of the peer's certificate.  A peer that presented
    /// no certificate has no fingerprint; that is not an error.
    pub fn peer_fingerprint(&self) -> Option<Fingerprint> {
        self.peer_certificate().map(|der| Fingerprint::of_der(der.as_ref()))
    }

    /// Send a final message and close.  The message is encrypted if
    /// the handshake has completed, otherwise it goes out as
    /// plaintext.  Either way the result is ignored.
    pub fn close_with_notice(mut self, msg: &[u8]) {
        if !self.is_handshaking() {
            let _ = self.tls_write(msg);
            self.tls_shutdown();
        } else {
            self.write_plain(msg);
        }
        self.tls_close();
    }

    /// Write queued TLS records to the transport.  `Ok(true)` if
    /// nothing is left queued, `Ok(false)` if the transport would
    /// block.
    fn flush_tls(&mut self) -> Result<bool, TlsStatus> {
        conn!(&mut self.conn, c => {
            while c.wants_write() {
                match c.write_tls(&mut self.transport) {
                    Ok(0) => return Ok(false),
                    Ok(_) => (),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                    Err(e) => return Err(TlsStatus::Syscall(e)),
                }
            }
            Ok(true)
        })
    }

    /// Read TLS records from the transport and process them
    fn fill_tls(&mut self) -> Result<(), TlsStatus> {
        let processed = conn!(&mut self.conn, c => match c.read_tls(&mut self.transport) {
            Ok(0) => return Err(TlsStatus::Eof),
            Ok(_) => c.process_new_packets(),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(TlsStatus::WantRead),
            Err(e) => return Err(TlsStatus::Syscall(e)),
        });
        match processed {
            Ok(io) => {
                self.buffered = io.plaintext_bytes_to_read();
                Ok(())
            }
            Err(e) => {
                // Rustls has queued an alert describing the failure
                let _ = self.flush_tls();
                Err(TlsStatus::Protocol(e))
            }
        }
    }

    /// Catch up with a handshake that completed inside a read or write
    fn sync_state(&mut self) {
        if matches!(self.state, HandshakeState::Idle | HandshakeState::Handshaking)
            && !self.is_handshaking()
        {
            self.state = HandshakeState::Established;
        }
    }

    fn is_handshaking(&self) -> bool {
        conn!(&self.conn, c => c.is_handshaking())
    }

    fn wants_read(&self) -> bool {
        conn!(&self.conn, c => c.wants_read())
    }

    fn handshake_inner(&mut self) -> TlsStatus {
        loop {
            let drained = match self.flush_tls() {
                Ok(drained) => drained,
                Err(status) => return status,
            };
            if !drained {
                return TlsStatus::WantWrite;
            }
            if !self.is_handshaking() {
                return TlsStatus::Done(0);
            }
            if !self.wants_read() {
                return TlsStatus::WantRead;
            }
            if let Err(status) = self.fill_tls() {
                return status;
            }
        }
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> TlsStatus {
        loop {
            match conn!(&mut self.conn, c => c.reader().read(buf)) {
                // Rustls only returns 0 for a non-empty buffer once
                // `close_notify` has been received
                Ok(0) => {
                    self.buffered = 0;
                    return TlsStatus::ZeroReturn;
                }
                Ok(n) => {
                    self.buffered = self.buffered.saturating_sub(n);
                    return TlsStatus::Done(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => self.buffered = 0,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return TlsStatus::Eof,
                Err(e) => return TlsStatus::Syscall(e),
            }
            // Outstanding handshake or alert records must go out
            // before the peer will send anything more
            if let Err(status) = self.flush_tls() {
                return status;
            }
            if let Err(status) = self.fill_tls() {
                return status;
            }
        }
    }

    fn write_inner(&mut self, buf: &[u8]) -> TlsStatus {
        if self.is_handshaking() {
            match self.tls_handshake() {
                TlsStatus::Done(_) => (),
                status => return status,
            }
        }
        if let Err(status) = self.flush_tls() {
            return status;
        }
        let accepted = match conn!(&mut self.conn, c => c.writer().write(buf)) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(e) => return TlsStatus::Syscall(e),
        };
        // Accepted bytes now belong to Rustls.  A flush failure here
        // will be reported by the next call.
        let _ = self.flush_tls();
        if accepted == 0 {
            TlsStatus::WantWrite
        } else {
            TlsStatus::Done(accepted)
        }
    }
}

/// Cap on plaintext and TLS bytes Rustls buffers for sending.  Once
/// reached, writes are refused until the transport drains.
const SEND_BUFFER_LIMIT: usize = 64 * 1024;

impl<T: Transport> TlsIo for TlsSession<T> {
    fn tls_handshake(&mut self) -> TlsStatus {
        if self.state == HandshakeState::Idle {
            self.state = HandshakeState::Handshaking;
        }
        let status = self.handshake_inner();
        match status {
            TlsStatus::Done(_) => self.state = HandshakeState::Established,
            TlsStatus::WantRead | TlsStatus::WantWrite => (),
            TlsStatus::Syscall(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::ResourceBusy
                ) => {}
            _ => self.state = HandshakeState::Aborted,
        }
        status
    }

    fn tls_read(&mut self, buf: &mut [u8]) -> TlsStatus {
        if buf.is_empty() {
            return TlsStatus::Done(0);
        }
        let status = self.read_inner(buf);
        self.sync_state();
        status
    }

    fn tls_write(&mut self, buf: &[u8]) -> TlsStatus {
        if buf.is_empty() {
            return TlsStatus::Done(0);
        }
        let status = self.write_inner(buf);
        self.sync_state();
        status
    }


    fn tls_flush(&mut self) -> TlsStatus {
        match self.flush_tls() {
            Ok(true) => TlsStatus::Done(0),
            Ok(false) => TlsStatus::WantWrite,
            Err(status) => status,
        }
    }

    fn tls_shutdown(&mut self) {
        conn!(&mut self.conn, c => c.send_close_notify());
        let _ = self.flush_tls();
    }

    fn write_plain(&mut self, bytes: &[u8]) {
        let _ = self.transport.write(bytes);
    }

    fn tls_close(&mut self) {
        self.transport.close();
    }

    fn has_buffered_plaintext(&self) -> bool {
        self.buffered > 0
    }
}
