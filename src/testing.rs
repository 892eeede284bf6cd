//! Scripted stand-ins for the TLS library and the listener registry

use crate::{Listener, TlsIo, TlsStatus};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// What a [`Scripted`] session was asked to do.  Shared so it can be
/// inspected after the session has been consumed.
#[derive(Default, Debug)]
pub struct ScriptLog {
    /// Bytes accepted by `tls_write`
    pub written: Vec<u8>,
    /// Bytes sent with `write_plain`
    pub plain: Vec<u8>,
    pub shutdowns: usize,
    pub closed: bool,
}

/// Session that returns pre-recorded statuses in order.  An exhausted
/// handshake or read script reports `WantRead`; an exhausted write
/// script accepts everything and an exhausted flush script has
/// nothing left to send.
#[derive(Default)]
pub struct Scripted {
    pub handshake: VecDeque<TlsStatus>,
    pub reads: VecDeque<TlsStatus>,
    pub writes: VecDeque<TlsStatus>,
    pub flushes: VecDeque<TlsStatus>,
    /// Reported by `has_buffered_plaintext`
    pub buffered: bool,
    pub log: Rc<RefCell<ScriptLog>>,
}

impl TlsIo for Scripted {
    fn tls_handshake(&mut self) -> TlsStatus {
        self.handshake.pop_front().unwrap_or(TlsStatus::WantRead)
    }

    fn tls_read(&mut self, buf: &mut [u8]) -> TlsStatus {
        match self.reads.pop_front() {
            Some(TlsStatus::Done(n)) => {
                let n = n.min(buf.len());
                buf[..n].fill(b'r');
                TlsStatus::Done(n)
            }
            Some(status) => status,
            None => TlsStatus::WantRead,
        }
    }

    fn tls_write(&mut self, buf: &[u8]) -> TlsStatus {
        let n = match self.writes.pop_front() {
            Some(TlsStatus::Done(n)) => n.min(buf.len()),
            Some(status) => return status,
            None => buf.len(),
        };
        self.log.borrow_mut().written.extend_from_slice(&buf[..n]);
        TlsStatus::Done(n)
    }

    fn tls_flush(&mut self) -> TlsStatus {
        self.flushes.pop_front().unwrap_or(TlsStatus::Done(0))
    }

    fn tls_shutdown(&mut self) {
        self.log.borrow_mut().shutdowns += 1;
    }

    fn write_plain(&mut self, bytes: &[u8]) {
        self.log.borrow_mut().plain.extend_from_slice(bytes);
    }

    fn tls_close(&mut self) {
        self.log.borrow_mut().closed = true;
    }

    fn has_buffered_plaintext(&self) -> bool {
        self.buffered
    }
}

#[derive(Default)]
pub struct TestListener {
    pub pending: Cell<usize>,
    pub promoted: RefCell<Vec<Scripted>>,
}

impl Listener for TestListener {
    type Session = Scripted;

    fn pending(&self) -> &Cell<usize> {
        &self.pending
    }

    fn add_connection(&self, session: Scripted) {
        self.promoted.borrow_mut().push(session);
    }
}
