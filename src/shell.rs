//! The shell: the event loop, frame dispatcher, and per-channel flow-control
//! bookkeeping that this crate exists to implement.

use std::fs::File;
use std::io;

use log::{debug, trace, warn};

use crate::channel::{Channel, Dir};
use crate::error::{Error, Result};
use crate::wire::{
    self, decode_channel, decode_window_delta, Header, CLOSE_LEN, DATA_FIXED_LEN, HEADER_LEN,
    KIND_CLOSE, KIND_DATA, KIND_WINDOW, WINDOW_LEN,
};

/// Index of the channel fed by the transport (receive-only).
pub const FROM_PEER: usize = 0;
/// Index of the channel draining to the transport (send-only).
pub const TO_PEER: usize = 1;
/// Number of reserved special indices.
pub const NR_SPECIAL_CH: usize = 2;

/// Extension point for message types outside the three core variants.
///
/// The default implementation reports the fatal "unrecognized command"
/// protocol error that `io_loop_1` would otherwise produce on its own; an
/// implementor that wants to support additional frame kinds overrides
/// `dispatch` to recognize them and falls back to the default for anything
/// else.
///
/// Taken as a parameter rather than stored on `Shell` so that a handler can
/// itself hold a `&mut Shell` without aliasing — see DESIGN.md.
pub trait MessageHandler {
    fn dispatch(&mut self, _shell: &mut Shell, header: Header, _body: &[u8]) -> Result<()> {
        Err(Error::protocol(format!("unrecognized command {}", header.kind)))
    }
}

/// The handler installed when a caller has no extension frames to support.
pub struct DefaultHandler;
impl MessageHandler for DefaultHandler {}

pub struct Shell {
    ch: Vec<Channel>,
    max_outgoing_msg: usize,
}

impl Shell {
    /// Builds a shell with only the two special channels populated.
    pub fn new(
        max_outgoing_msg: usize,
        transport_in: File,
        transport_out: File,
        ring_capacity: usize,
    ) -> io::Result<Self> {
        let from_peer = Channel::new_transport_reader(transport_in, ring_capacity)?;
        let to_peer = Channel::new_transport_writer(transport_out, ring_capacity)?;
        Ok(Shell {
            ch: vec![from_peer, to_peer],
            max_outgoing_msg,
        })
    }

    /// Appends a new user channel, returning its index.
    pub fn add_channel(&mut self, dir: Dir, fd: File, ring_capacity: usize) -> io::Result<usize> {
        let ch = Channel::new_user(dir, fd, ring_capacity)?;
        self.ch.push(ch);
        Ok(self.ch.len() - 1)
    }

    pub fn nrch(&self) -> usize {
        self.ch.len()
    }

    pub fn channel(&self, idx: usize) -> &Channel {
        &self.ch[idx]
    }

    pub fn channel_mut(&mut self, idx: usize) -> &mut Channel {
        &mut self.ch[idx]
    }

    fn is_user_channel(&self, id: usize) -> bool {
        id >= NR_SPECIAL_CH && id < self.ch.len()
    }

    /// §4.3: the maximum payload the shell may emit right now.
    fn outgoing_budget(&self) -> usize {
        std::cmp::min(self.max_outgoing_msg, self.ch[TO_PEER].rb().room())
    }

    // ---- §4.1 frame detector ---------------------------------------------

    /// Peeks the next frame header in `ch[FROM_PEER]`'s ring buffer, if a
    /// complete frame is already buffered. Never consumes bytes.
    fn detect_frame(&self) -> Option<Header> {
        let rb = self.ch[FROM_PEER].rb();
        if rb.size() < HEADER_LEN {
            return None;
        }
        let mut hdr_buf = [0u8; HEADER_LEN];
        rb.copy_out(&mut hdr_buf, HEADER_LEN);
        let header = Header::decode(&hdr_buf);
        if (header.size as usize) <= rb.size() {
            Some(header)
        } else {
            None
        }
    }

    // ---- §4.2 dispatcher ---------------------------------------------------

    /// Drains and dispatches every complete frame currently buffered in
    /// `ch[FROM_PEER]`.
    fn dispatch_all(&mut self, handler: &mut impl MessageHandler) -> Result<()> {
        while let Some(header) = self.detect_frame() {
            self.dispatch_one(header, handler)?;
        }
        Ok(())
    }

    fn dispatch_one(&mut self, header: Header, handler: &mut impl MessageHandler) -> Result<()> {
        let frame_len = header.size as usize;
        if frame_len < HEADER_LEN {
            return Err(Error::protocol(format!(
                "frame size {} smaller than header size {}",
                frame_len, HEADER_LEN
            )));
        }

        // Copy the whole frame out before consuming it, so the match arms
        // below can read fixed fields without juggling a live borrow of
        // ch[FROM_PEER]'s ring buffer while also touching other channels.
        let mut frame = vec![0u8; frame_len];
        self.ch[FROM_PEER].rb().copy_out(&mut frame, frame_len);

        let result = match header.kind {
            KIND_DATA => self.handle_data(&header, &frame),
            KIND_WINDOW => self.handle_window(&header, &frame),
            KIND_CLOSE => self.handle_close(&header, &frame),
            _ => {
                self.ch[FROM_PEER].rb_mut().note_removed(frame_len);
                return handler.dispatch(self, header, &frame[HEADER_LEN.min(frame_len)..]);
            }
        };

        self.ch[FROM_PEER].rb_mut().note_removed(frame_len);
        result
    }

    fn handle_data(&mut self, header: &Header, frame: &[u8]) -> Result<()> {
        if frame.len() < DATA_FIXED_LEN {
            return Err(Error::protocol(format!(
                "DATA frame size {} smaller than fixed part {}",
                header.size, DATA_FIXED_LEN
            )));
        }
        let channel = decode_channel(&frame[HEADER_LEN..]) as usize;
        if !self.is_user_channel(channel) {
            return Err(Error::protocol(format!("invalid channel {}", channel)));
        }
        if self.ch[channel].dir() != Dir::ToFd {
            return Err(Error::protocol(format!(
                "DATA addressed to non-ToFd channel {}",
                channel
            )));
        }
        if !self.ch[channel].has_fd() {
            warn!("dropping DATA for closed channel {}", channel);
            return Ok(());
        }
        let payload = &frame[DATA_FIXED_LEN..];
        if payload.len() > self.ch[channel].rb().room() {
            return Err(Error::protocol(format!(
                "window desync: channel {} has room {} but received {} bytes",
                channel,
                self.ch[channel].rb().room(),
                payload.len()
            )));
        }
        let written = self.ch[channel].write(payload);
        debug_assert_eq!(written, payload.len());
        Ok(())
    }

    fn handle_window(&mut self, header: &Header, frame: &[u8]) -> Result<()> {
        if frame.len() != WINDOW_LEN {
            return Err(Error::protocol(format!(
                "WINDOW frame size {} does not match fixed size {}",
                header.size, WINDOW_LEN
            )));
        }
        let channel = decode_channel(&frame[HEADER_LEN..]) as usize;
        if !self.is_user_channel(channel) {
            return Err(Error::protocol(format!("invalid channel {}", channel)));
        }
        if self.ch[channel].dir() != Dir::FromFd {
            return Err(Error::protocol(format!(
                "WINDOW addressed to non-FromFd channel {}",
                channel
            )));
        }
        if !self.ch[channel].has_fd() {
            warn!("dropping WINDOW for closed channel {}", channel);
            return Ok(());
        }
        let delta = decode_window_delta(&frame[HEADER_LEN..]);
        self.ch[channel]
            .grant_window(delta)
            .map_err(|()| Error::protocol(format!("window overflow on channel {}", channel)))
    }

    fn handle_close(&mut self, header: &Header, frame: &[u8]) -> Result<()> {
        if frame.len() != CLOSE_LEN {
            return Err(Error::protocol(format!(
                "CLOSE frame size {} does not match fixed size {}",
                header.size, CLOSE_LEN
            )));
        }
        let channel = decode_channel(&frame[HEADER_LEN..]) as usize;
        if !self.is_user_channel(channel) {
            // Out-of-range CLOSE is benign: a late close for a channel the
            // shell has already forgotten.
            return Ok(());
        }
        self.ch[channel].set_sent_eof();
        // A ToFd channel may still have peer-delivered bytes buffered for
        // the local fd; those must be written out before the fd goes away,
        // so closing is deferred to do_pending_close_one exactly as it is
        // for a locally-requested close. A FromFd channel's buffer holds
        // outbound bytes addressed to the peer, not to a local sink, so
        // there is nothing to drain locally and the fd can go immediately.
        if self.ch[channel].dir() == Dir::ToFd && self.ch[channel].rb().size() > 0 {
            self.ch[channel].request_close_when_drained();
        } else {
            self.ch[channel].close();
        }
        debug!("peer closed channel {}", channel);
        Ok(())
    }

    // ---- §4.4 acknowledgement emission --------------------------------

    fn xmit_acks(&mut self) {
        for idx in 0..self.ch.len() {
            if self.ch[idx].sent_eof() {
                // Data-model invariant 4: no frame follows sent_eof, even an
                // ack for bytes that were buffered before the close arrived.
                continue;
            }
            let bw = self.ch[idx].bytes_written();
            if bw == 0 {
                continue;
            }
            if self.outgoing_budget() < WINDOW_LEN {
                continue;
            }
            let taken = self.ch[idx].take_bytes_written();
            let mut frame = Vec::with_capacity(WINDOW_LEN);
            wire::encode_window(idx as u32, taken as u32, &mut frame);
            self.ch[TO_PEER].write(&frame);
        }
    }

    // ---- §4.5 data emission --------------------------------------------

    fn xmit_data_one(&mut self, idx: usize) {
        if self.ch[idx].dir() != Dir::FromFd {
            return;
        }
        let avail = self.ch[idx].rb().size();
        if avail == 0 {
            return;
        }
        let budget = self.outgoing_budget();
        if budget <= DATA_FIXED_LEN {
            return;
        }
        let window = self.ch[idx].window();
        let payloadsz = avail.min(budget - DATA_FIXED_LEN).min(window);
        if payloadsz == 0 {
            return;
        }
        let mut frame = Vec::with_capacity(DATA_FIXED_LEN + payloadsz);
        {
            let v = self.ch[idx].rb().iov(payloadsz);
            wire::encode_data(idx as u32, v.first, v.second, &mut frame);
        }
        self.ch[TO_PEER].write(&frame);
        self.ch[idx].rb_mut().note_removed(payloadsz);
        self.ch[idx].consume_window(payloadsz);
    }

    // ---- §4.6 deferred close --------------------------------------------

    fn do_pending_close_one(&mut self, idx: usize) {
        let ch = &mut self.ch[idx];
        if ch.dir() == Dir::ToFd && ch.pending_close() && ch.has_fd() && ch.rb().size() == 0 {
            ch.close();
        }
    }

    // ---- §4.7 EOF emission -----------------------------------------------

    fn xmit_eof_one(&mut self, idx: usize) {
        let ready = {
            let ch = &self.ch[idx];
            !ch.has_fd() && !ch.sent_eof() && ch.rb().size() == 0
        };
        if !ready {
            return;
        }
        if self.outgoing_budget() < CLOSE_LEN {
            return;
        }
        let mut frame = Vec::with_capacity(CLOSE_LEN);
        wire::encode_close(idx as u32, &mut frame);
        self.ch[TO_PEER].write(&frame);
        self.ch[idx].set_sent_eof();
        debug!("emitted CLOSE for channel {}", idx);
    }

    // ---- §4.8 the poll-pump ------------------------------------------------

    fn pump_io(&mut self) -> Result<()> {
        let mut pollfds = Vec::with_capacity(self.ch.len());
        let mut indices = Vec::with_capacity(self.ch.len());
        for (idx, ch) in self.ch.iter().enumerate() {
            if let Some(req) = ch.poll_request() {
                pollfds.push(libc::pollfd {
                    fd: req.fd,
                    events: req.events,
                    revents: 0,
                });
                indices.push(idx);
            }
        }
        if pollfds.is_empty() {
            return Ok(());
        }
        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(Error::Io(e));
        }
        for (pfd, idx) in pollfds.iter().zip(indices.iter()) {
            if pfd.revents != 0 {
                self.ch[*idx].poll_step().map_err(Error::Io)?;
            }
        }
        Ok(())
    }

    // ---- §4.9 one loop iteration -------------------------------------------

    /// Runs one iteration: pump I/O, dispatch any complete frames from the
    /// peer, emit acknowledgements, then for every user channel emit data,
    /// perform any deferred close, and emit EOF.
    pub fn io_loop_1(&mut self, handler: &mut impl MessageHandler) -> Result<()> {
        trace!("io_loop_1: nrch={}", self.ch.len());
        self.pump_io()?;
        self.dispatch_all(handler)?;
        self.xmit_acks();
        for idx in NR_SPECIAL_CH..self.ch.len() {
            self.xmit_data_one(idx);
            self.do_pending_close_one(idx);
            self.xmit_eof_one(idx);
        }
        Ok(())
    }

    // ---- §4.10 synchronous message enqueue ---------------------------------

    /// Spins `io_loop_1` until the outbound budget is large enough to hold
    /// `total_size` bytes, then writes `encode` into `ch[TO_PEER]`. The only
    /// place the shell blocks on its own progress.
    pub fn queue_message_synch(
        &mut self,
        handler: &mut impl MessageHandler,
        total_size: usize,
        encode: impl FnOnce(&mut Vec<u8>),
    ) -> Result<()> {
        while self.outgoing_budget() < total_size {
            self.io_loop_1(handler)?;
        }
        let mut frame = Vec::with_capacity(total_size);
        encode(&mut frame);
        self.ch[TO_PEER].write(&frame);
        Ok(())
    }
}
