//! A finite, in-process FIFO of bytes with scatter/gather views.
//!
//! Unlike the shared-memory ring in the rest of this crate's ancestry, this
//! buffer has exactly one owner, lives on one thread, and is never touched
//! concurrently — a [`crate::shell::Shell`] owns one per channel. There are no
//! atomics, no memfd, no cross-process visibility: just index arithmetic over
//! a boxed slice.

use std::cmp::min;
use std::io::{self, Read, Write};

/// A scatter/gather view of up to two contiguous segments of unread bytes.
///
/// The second segment is non-empty only when the requested range wraps
/// around the end of the backing storage.
/// Result of [`Ringbuf::fill_from`].
#[derive(Debug, Clone, Copy)]
pub struct FillOutcome {
    pub n: usize,
    pub eof: bool,
}

#[derive(Debug)]
pub struct RingIoVec<'a> {
    pub first: &'a [u8],
    pub second: &'a [u8],
}

impl<'a> RingIoVec<'a> {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fixed-capacity circular byte buffer.
pub struct Ringbuf {
    buf: Box<[u8]>,
    /// Index of the first unread byte.
    start: usize,
    /// Number of unread bytes currently stored.
    len: usize,
}

impl Ringbuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Ringbuf {
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently held, unread.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Free space available for writing.
    pub fn room(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Copies the first `n` unread bytes into `dst` without consuming them.
    ///
    /// `n` must be `<= size()` and `dst` must be at least `n` bytes long.
    pub fn copy_out(&self, dst: &mut [u8], n: usize) {
        assert!(n <= self.len, "copy_out: n exceeds available bytes");
        assert!(dst.len() >= n, "copy_out: dst too small");
        let v = self.iov(n);
        dst[..v.first.len()].copy_from_slice(v.first);
        dst[v.first.len()..n].copy_from_slice(v.second);
    }

    /// Advances the read cursor past `n` bytes, which must already have been
    /// consumed (via `copy_out` or `iov`).
    pub fn note_removed(&mut self, n: usize) {
        assert!(n <= self.len, "note_removed: n exceeds available bytes");
        let cap = self.buf.len();
        if cap > 0 {
            self.start = (self.start + n) % cap;
        }
        self.len -= n;
    }

    /// A non-destructive scatter view of exactly `n` unread bytes, split
    /// across up to two segments at the point where the buffer wraps.
    pub fn iov(&self, n: usize) -> RingIoVec<'_> {
        assert!(n <= self.len, "iov: n exceeds available bytes");
        let cap = self.buf.len();
        let first_len = min(n, cap - self.start);
        RingIoVec {
            first: &self.buf[self.start..self.start + first_len],
            second: &self.buf[..n - first_len],
        }
    }

    /// Appends as many bytes of `src` as fit in the remaining room, returning
    /// the number actually written.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = min(src.len(), self.room());
        self.fill_with(|a, b| {
            a[..min(n, a.len())].copy_from_slice(&src[..min(n, a.len())]);
            if n > a.len() {
                b[..n - a.len()].copy_from_slice(&src[a.len()..n]);
            }
            n
        })
    }

    /// Gives a closure direct mutable access to up to `room()` bytes of free
    /// space, split across up to two segments; the closure returns how many
    /// bytes it actually filled (`<=` the segments' combined length), which
    /// is then committed.
    pub fn fill_with<F>(&mut self, f: F) -> usize
    where
        F: FnOnce(&mut [u8], &mut [u8]) -> usize,
    {
        let room = self.room();
        if room == 0 {
            return 0;
        }
        let cap = self.buf.len();
        let write_pos = (self.start + self.len) % cap;
        let first_len = min(room, cap - write_pos);
        let (head, tail) = self.buf.split_at_mut(write_pos);
        let (a, b) = if first_len == room {
            (&mut tail[..first_len], &mut head[..0])
        } else {
            (&mut tail[..first_len], &mut head[..room - first_len])
        };
        let n = f(a, b);
        assert!(n <= room, "fill_with: closure reported more bytes than room");
        self.len += n;
        n
    }

    /// Gives a closure direct immutable access to the unread bytes, split
    /// across up to two segments, then consumes whatever length it reports
    /// having used.
    pub fn drain_with<F>(&mut self, f: F) -> usize
    where
        F: FnOnce(&[u8], &[u8]) -> usize,
    {
        let n = {
            let v = self.iov(self.len);
            f(v.first, v.second)
        };
        self.note_removed(n);
        n
    }

    /// Reads from `r` directly into free space, growing `size()` by however
    /// many bytes were actually read. `eof` is set when `r` itself reported
    /// end-of-stream (a genuine `Ok(0)` from the underlying reader, not a
    /// would-block); callers distinguish real EOF from "no progress this
    /// time" via that flag rather than via the byte count, since room could
    /// also legitimately be zero.
    pub fn fill_from<R: Read>(&mut self, r: &mut R) -> io::Result<FillOutcome> {
        let mut outcome: io::Result<()> = Ok(());
        let mut eof = false;
        let room = self.room();
        let n = self.fill_with(|a, b| {
            let mut total = 0;
            if a.is_empty() {
                return 0;
            }
            match r.read(a) {
                Ok(0) => eof = true,
                Ok(k) => {
                    total += k;
                    if k == a.len() && !b.is_empty() {
                        match r.read(b) {
                            Ok(0) => eof = true,
                            Ok(k2) => total += k2,
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                            Err(e) => outcome = Err(e),
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => outcome = Err(e),
            }
            total
        });
        outcome?;
        if room == 0 {
            eof = false;
        }
        Ok(FillOutcome { n, eof })
    }

    /// Writes as much of the unread contents as `w` will accept, shrinking
    /// `size()` accordingly.
    pub fn drain_to<W: Write>(&mut self, w: &mut W) -> io::Result<usize> {
        let mut outcome: io::Result<()> = Ok(());
        let n = self.drain_with(|a, b| {
            let mut total = 0;
            match w.write(a) {
                Ok(k) => {
                    total += k;
                    if k == a.len() && !b.is_empty() {
                        match w.write(b) {
                            Ok(k2) => total += k2,
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                            Err(e) => outcome = Err(e),
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => outcome = Err(e),
            }
            total
        });
        outcome?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_write_read() {
        let mut rb = Ringbuf::with_capacity(8);
        assert_eq!(rb.room(), 8);
        assert_eq!(rb.write(b"hello"), 5);
        assert_eq!(rb.size(), 5);
        assert_eq!(rb.room(), 3);
        let mut out = [0u8; 5];
        rb.copy_out(&mut out, 5);
        assert_eq!(&out, b"hello");
        rb.note_removed(5);
        assert_eq!(rb.size(), 0);
        assert_eq!(rb.room(), 8);
    }

    #[test]
    fn wraparound() {
        let mut rb = Ringbuf::with_capacity(4);
        assert_eq!(rb.write(b"ab"), 2);
        rb.note_removed(2);
        // start is now 2; writing 4 bytes wraps.
        assert_eq!(rb.write(b"wxyz"), 4);
        let v = rb.iov(4);
        assert_eq!(v.first.len() + v.second.len(), 4);
        let mut out = [0u8; 4];
        rb.copy_out(&mut out, 4);
        assert_eq!(&out, b"wxyz");
    }

    #[test]
    fn full_buffer_rejects_excess() {
        let mut rb = Ringbuf::with_capacity(4);
        assert_eq!(rb.write(b"abcdef"), 4);
        assert_eq!(rb.room(), 0);
        assert_eq!(rb.write(b"z"), 0);
    }

    #[test]
    fn fill_from_and_drain_to_sockets() {
        use std::io::{Read, Write};
        use std::os::unix::net::UnixStream;

        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(b"0123456789").unwrap();
        drop(a);

        let mut rb = Ringbuf::with_capacity(32);
        // fill_from attempts one read; loop until the peer's EOF (Ok(0)
        // inner read) stops draining more.
        let mut total = 0;
        loop {
            let outcome = rb.fill_from(&mut b).unwrap();
            total += outcome.n;
            if outcome.eof || outcome.n == 0 {
                break;
            }
        }
        assert_eq!(total, 10);

        let (mut w, mut r) = UnixStream::pair().unwrap();
        w.set_nonblocking(true).unwrap();
        let written = rb.drain_to(&mut w).unwrap();
        assert_eq!(written, 10);
        let mut got = vec![0u8; 10];
        r.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"0123456789");
    }
}
