use crate::{classify, Classified, SessionError, TlsIo};
use std::collections::VecDeque;

/// Most ranges attempted by one [`sendv`] call, matching the usual
/// `IOV_MAX`
pub const MAX_IOV: usize = 1024;

/// Outcome of a non-blocking I/O attempt
///
/// Callers must rely on this tag alone to tell "blocked" apart from
/// progress.
#[derive(Debug)]
pub enum IoOutcome {
    Success(usize),
    /// Nothing more could be done without transport readiness.  Retry
    /// later with identical buffers, after re-arming for both
    /// readability and writability.
    Blocked,
    /// The session cannot be used again
    Failure(SessionError),
}

impl IoOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, IoOutcome::Blocked)
    }
}

/// Ordered queue of pending output, owned by the socket layer
pub trait SendQueue {
    /// Append up to `max` non-empty byte ranges to `iov` in send
    /// order, returning the total number of bytes mapped
    fn map_iov<'a>(&'a self, iov: &mut Vec<&'a [u8]>, max: usize) -> usize;
}

impl<B: AsRef<[u8]>> SendQueue for VecDeque<B> {
    fn map_iov<'a>(&'a self, iov: &mut Vec<&'a [u8]>, max: usize) -> usize {
        map_ranges(self.iter().map(|b| b.as_ref()), iov, max)
    }
}

impl<B: AsRef<[u8]>> SendQueue for [B] {
    fn map_iov<'a>(&'a self, iov: &mut Vec<&'a [u8]>, max: usize) -> usize {
        map_ranges(self.iter().map(|b| b.as_ref()), iov, max)
    }
}

fn map_ranges<'a>(
    ranges: impl Iterator<Item = &'a [u8]>,
    iov: &mut Vec<&'a [u8]>,
    max: usize,
) -> usize {
    let mut total = 0;
    for range in ranges.filter(|r| !r.is_empty()).take(max) {
        total += range.len();
        iov.push(range);
    }
    total
}

/// Result of a vectored send
#[derive(Debug)]
pub struct Sendv {
    /// Bytes mapped from the queue for this attempt
    pub offered: usize,
    /// Bytes accepted, counted from the head of the queue.  The caller
    /// drops exactly this many bytes from its queue, even when
    /// `outcome` is `Blocked`.
    pub written: usize,
    /// `Success(written)` if everything offered was accepted and sent,
    /// `Blocked` if the attempt stopped early or encrypted output is
    /// still waiting for the transport, or `Failure`
    pub outcome: IoOutcome,
}

/// Non-blocking receive into `buf`
///
/// Call repeatedly until `Blocked` is returned.  The session may hold
/// more decrypted data than fits in `buf`, and that data will not
/// raise another readable event.
///
/// On the peer's `close_notify` our own `close_notify` is sent before
/// `Failure(PeerClosed)` is returned.  An empty `buf` returns
/// `Success(0)` without touching the session.
pub fn recv<S: TlsIo + ?Sized>(session: &mut S, buf: &mut [u8]) -> IoOutcome {
    if buf.is_empty() {
        return IoOutcome::Success(0);
    }
    match classify(session.tls_read(buf)) {
        Classified::Succeeded(n) => IoOutcome::Success(n),
        Classified::Blocked(_) => {
            log::trace!("TLS read blocked, retrying later");
            IoOutcome::Blocked
        }
        Classified::Fatal(err) => fail(session, "read", err),
    }
}

/// Non-blocking vectored send of the head of `queue`
///
/// Ranges are attempted in order.  A blocked or partially accepted
/// range stops the attempt; whatever was accepted before that point
/// is still reported in [`Sendv::written`].  The queue itself is not
/// modified.
///
/// Accepted bytes may sit encrypted in the session until the
/// transport drains.  While they do, the outcome is `Blocked` even if
/// the whole queue was accepted, and a later call (with an empty queue
/// if need be) pushes them out.
pub fn sendv<S, Q>(session: &mut S, queue: &Q) -> Sendv
where
    S: TlsIo + ?Sized,
    Q: SendQueue + ?Sized,
{
    let mut iov = Vec::new();
    let offered = queue.map_iov(&mut iov, MAX_IOV);
    let mut written = 0;

    for range in iov {
        match classify(session.tls_write(range)) {
            Classified::Succeeded(n) => {
                written += n;
                if n < range.len() {
                    log::trace!("TLS write accepted {n} of {} bytes", range.len());
                    return Sendv {
                        offered,
                        written,
                        outcome: IoOutcome::Blocked,
                    };
                }
            }
            Classified::Blocked(_) => {
                log::trace!("TLS write blocked after {written} bytes, retrying later");
                return Sendv {
                    offered,
                    written,
                    outcome: IoOutcome::Blocked,
                };
            }
            Classified::Fatal(err) => {
                return Sendv {
                    offered,
                    written,
                    outcome: fail(session, "write", err),
                };
            }
        }
    }

    let outcome = match classify(session.tls_flush()) {
        Classified::Succeeded(_) => IoOutcome::Success(written),
        Classified::Blocked(_) => {
            log::trace!("TLS output still queued after {written} bytes");
            IoOutcome::Blocked
        }
        Classified::Fatal(err) => fail(session, "write", err),
    };
    Sendv {
        offered,
        written,
        outcome,
    }
}

fn fail<S: TlsIo + ?Sized>(session: &mut S, op: &str, err: SessionError) -> IoOutcome {
    if err.is_peer_close() {
        log::debug!("TLS {op}: peer sent close_notify, acknowledging");
        session.tls_shutdown();
    } else {
        log::warn!("TLS {op} failed: {err}");
    }
    IoOutcome::Failure(err)
}
