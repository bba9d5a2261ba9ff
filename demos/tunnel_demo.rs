//! Tunnels one local byte stream through a pair of `Shell`s connected back to
//! back over a socketpair, to demonstrate end-to-end multiplexing without a
//! real remote peer.
//!
//! Side A reads from stdin and forwards it, through the shell pair, to a
//! user channel on side B that writes to stdout.

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use muxshell::{DefaultHandler, Dir, Shell};

const MAX_OUTGOING_MSG: usize = 16 * 1024;
const RING_CAPACITY: usize = 64 * 1024;

fn unix_to_file(s: UnixStream) -> File {
    unsafe { File::from_raw_fd(s.into_raw_fd()) }
}

fn main() -> io::Result<()> {
    env_logger::init();

    let (transport_a, transport_b) = UnixStream::pair()?;
    let transport_a2 = transport_a.try_clone()?;
    let transport_b2 = transport_b.try_clone()?;

    let (stdin_reader, stdin_writer) = UnixStream::pair()?;
    let (stdout_reader, stdout_writer) = UnixStream::pair()?;

    // Side A: owns a FromFd channel fed by a thread that copies real stdin
    // into stdin_writer, then forwards bytes into the tunnel.
    let mut side_a = Shell::new(
        MAX_OUTGOING_MSG,
        unix_to_file(transport_a),
        unix_to_file(transport_a2),
        RING_CAPACITY,
    )?;
    let a_chan = side_a.add_channel(Dir::FromFd, unix_to_file(stdin_reader), RING_CAPACITY)?;

    // Side B: owns a ToFd channel whose bytes get written to a thread that
    // copies stdout_reader to real stdout.
    let mut side_b = Shell::new(
        MAX_OUTGOING_MSG,
        unix_to_file(transport_b),
        unix_to_file(transport_b2),
        RING_CAPACITY,
    )?;
    let b_chan = side_b.add_channel(Dir::ToFd, unix_to_file(stdout_writer), RING_CAPACITY)?;
    assert_eq!(a_chan, b_chan, "both sides agree on the channel's index out of band");

    thread::spawn(move || {
        let mut stdin_writer = stdin_writer;
        io::copy(&mut io::stdin(), &mut stdin_writer).ok();
    });
    let stdout_copier = thread::spawn(move || {
        let mut stdout_reader = stdout_reader;
        io::copy(&mut stdout_reader, &mut io::stdout()).ok();
    });

    // Side B grants an initial window so side A is allowed to send.
    side_b
        .channel_mut(a_chan)
        .grant_window(u32::MAX)
        .map_err(|()| io::Error::new(io::ErrorKind::Other, "window overflow"))
        .ok();

    let handle_b = thread::spawn(move || {
        let mut handler = DefaultHandler;
        loop {
            if side_b.io_loop_1(&mut handler).is_err() {
                break;
            }
        }
    });

    let mut handler = DefaultHandler;
    loop {
        if side_a.io_loop_1(&mut handler).is_err() {
            break;
        }
        if !side_a.channel(a_chan).has_fd() && side_a.channel(a_chan).sent_eof() {
            break;
        }
    }

    handle_b.join().ok();
    stdout_copier.join().ok();
    io::stdout().flush().ok();
    thread::sleep(Duration::from_millis(10));
    Ok(())
}
