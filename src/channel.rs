//! The channel collaborator: one local descriptor, one direction, one ring
//! buffer.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use log::debug;

use crate::ringbuf::Ringbuf;

/// Bookkeeping direction of a channel, fixed at creation.
///
/// For ordinary user channels this also determines the physical I/O role
/// (see [`IoRole`]); for the two special channels the physical role is
/// inverted relative to `dir` — see the crate-level design notes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dir {
    /// Bytes flow from the local fd into `rb`, awaiting transmission to the peer.
    FromFd,
    /// Bytes flow from `rb` to the local fd, having arrived from the peer.
    ToFd,
}

/// The physical role of a channel's `poll_step`: which direction it actually
/// moves bytes between its fd and its ring buffer. Independent of `dir` so
/// that the special transport channels can have `dir` values chosen for
/// bookkeeping uniformity while still doing the opposite I/O.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum IoRole {
    /// `poll_step` reads the fd into `rb`.
    Source,
    /// `poll_step` writes `rb` to the fd.
    Sink,
}

/// What a channel wants polled, and on which fd.
pub struct PollRequest {
    pub fd: RawFd,
    pub events: libc::c_short,
}

pub struct Channel {
    dir: Dir,
    io_role: IoRole,
    fdh: Option<File>,
    rb: Ringbuf,
    /// Bytes of outbound credit from the peer. Meaningful only for `FromFd`.
    window: usize,
    /// Bytes delivered to the local fd since the last WINDOW was sent.
    /// Meaningful only for `ToFd`.
    bytes_written: usize,
    sent_eof: bool,
    pending_close: bool,
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl Channel {
    fn new(dir: Dir, io_role: IoRole, fd: File, ring_capacity: usize) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Channel {
            dir,
            io_role,
            fdh: Some(fd),
            rb: Ringbuf::with_capacity(ring_capacity),
            window: 0,
            bytes_written: 0,
            sent_eof: false,
            pending_close: false,
        })
    }

    /// An ordinary user channel: I/O role follows `dir` directly.
    pub fn new_user(dir: Dir, fd: File, ring_capacity: usize) -> io::Result<Self> {
        let io_role = match dir {
            Dir::FromFd => IoRole::Source,
            Dir::ToFd => IoRole::Sink,
        };
        Self::new(dir, io_role, fd, ring_capacity)
    }

    /// The special `FROM_PEER` channel: bookkeeping `dir = ToFd`, but
    /// physically reads the transport into its ring buffer.
    pub fn new_transport_reader(fd: File, ring_capacity: usize) -> io::Result<Self> {
        Self::new(Dir::ToFd, IoRole::Source, fd, ring_capacity)
    }

    /// The special `TO_PEER` channel: bookkeeping `dir = FromFd`, but
    /// physically writes its ring buffer to the transport.
    pub fn new_transport_writer(fd: File, ring_capacity: usize) -> io::Result<Self> {
        Self::new(Dir::FromFd, IoRole::Sink, fd, ring_capacity)
    }

    pub fn dir(&self) -> Dir {
        self.dir
    }

    pub fn rb(&self) -> &Ringbuf {
        &self.rb
    }

    pub fn rb_mut(&mut self) -> &mut Ringbuf {
        &mut self.rb
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn take_bytes_written(&mut self) -> usize {
        std::mem::replace(&mut self.bytes_written, 0)
    }

    pub fn sent_eof(&self) -> bool {
        self.sent_eof
    }

    pub fn set_sent_eof(&mut self) {
        self.sent_eof = true;
    }

    pub fn has_fd(&self) -> bool {
        self.fdh.is_some()
    }

    pub fn pending_close(&self) -> bool {
        self.pending_close
    }

    /// Requests that this channel be closed once its ring buffer is fully
    /// drained. Used for `ToFd` channels with bytes still in flight.
    pub fn request_close_when_drained(&mut self) {
        self.pending_close = true;
    }

    /// Grants `delta` bytes of additional outbound credit. `Err` on overflow.
    pub fn grant_window(&mut self, delta: u32) -> Result<(), ()> {
        match self.window.checked_add(delta as usize) {
            Some(w) => {
                self.window = w;
                Ok(())
            }
            None => Err(()),
        }
    }

    /// Consumes `n` bytes of outbound credit. Caller must have already
    /// confirmed `n <= window()`.
    pub fn consume_window(&mut self, n: usize) {
        debug_assert!(n <= self.window);
        self.window -= n;
    }

    /// Appends bytes to `rb`. Caller must not exceed `rb.room()`.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.rb.write(data)
    }

    /// Releases the fd. Idempotent.
    pub fn close(&mut self) {
        if self.fdh.take().is_some() {
            debug!("channel closed, dir={:?}", self.dir);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_window_for_test(&mut self, w: usize) {
        self.window = w;
    }

    pub fn poll_request(&self) -> Option<PollRequest> {
        let fd = self.fdh.as_ref()?.as_raw_fd();
        let events = match self.io_role {
            IoRole::Source if self.rb.room() > 0 => libc::POLLIN,
            IoRole::Sink if self.rb.size() > 0 => libc::POLLOUT,
            _ => return None,
        };
        Some(PollRequest { fd, events: events as libc::c_short })
    }

    /// Performs the actual fd read/write once poll reports readiness.
    /// Returns `Ok(())` always; fd exhaustion or a broken pipe close the
    /// channel rather than propagating as an error (matching the channel
    /// contract: closure is a state transition, not a shell-fatal event).
    pub fn poll_step(&mut self) -> io::Result<()> {
        match self.io_role {
            IoRole::Source => {
                let file = match self.fdh.as_mut() {
                    Some(f) => f,
                    None => return Ok(()),
                };
                match self.rb.fill_from(file) {
                    Ok(outcome) if outcome.eof => self.close(),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
            IoRole::Sink => {
                let file = match self.fdh.as_mut() {
                    Some(f) => f,
                    None => return Ok(()),
                };
                match self.rb.drain_to(file) {
                    Ok(n) => {
                        if self.dir == Dir::ToFd {
                            self.bytes_written += n;
                        }
                        if self.pending_close && self.rb.size() == 0 {
                            self.close();
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    fn unix_to_file(s: UnixStream) -> File {
        use std::os::unix::io::{FromRawFd, IntoRawFd};
        unsafe { File::from_raw_fd(s.into_raw_fd()) }
    }

    #[test]
    fn source_channel_reads_into_ring() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut ch = Channel::new_user(Dir::FromFd, unix_to_file(b), 64).unwrap();
        let mut a = a;
        a.write_all(b"hi there").unwrap();
        // Give the kernel a moment; UnixStream::pair is a local socketpair so
        // this should already be visible.
        ch.poll_step().unwrap();
        assert_eq!(ch.rb().size(), 8);
    }

    #[test]
    fn sink_channel_writes_from_ring() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut ch = Channel::new_user(Dir::ToFd, unix_to_file(b), 64).unwrap();
        ch.write(b"out");
        ch.poll_step().unwrap();
        let mut got = [0u8; 3];
        use std::io::Read;
        let mut a = a;
        a.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"out");
        assert_eq!(ch.take_bytes_written(), 3);
    }

    #[test]
    fn repeated_max_grants_do_not_overflow_on_64_bit() {
        // usize is wider than u32 on the platforms this crate targets, so two
        // consecutive u32::MAX grants land well short of usize::MAX.
        let (_a, b) = UnixStream::pair().unwrap();
        let mut ch = Channel::new_user(Dir::FromFd, unix_to_file(b), 64).unwrap();
        ch.grant_window(u32::MAX).unwrap();
        assert!(ch.grant_window(u32::MAX).is_ok());
    }

    #[test]
    fn grant_window_detects_overflow() {
        let (_a, b) = UnixStream::pair().unwrap();
        let mut ch = Channel::new_user(Dir::FromFd, unix_to_file(b), 64).unwrap();
        ch.set_window_for_test(usize::MAX - 10);
        assert_eq!(ch.grant_window(20), Err(()));
        assert_eq!(ch.window(), usize::MAX - 10, "window must be unchanged on overflow");
    }
}
