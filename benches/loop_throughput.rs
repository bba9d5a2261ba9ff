use std::fs::File;
use std::io::Write;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use criterion::*;
use muxshell::{DefaultHandler, Dir, Shell};

fn unix_to_file(s: UnixStream) -> File {
    unsafe { File::from_raw_fd(s.into_raw_fd()) }
}

/// Builds a shell whose transport is one end of a socketpair and one user
/// channel backed by another socketpair, returning the two peer-side
/// handles a benchmark drives directly.
fn setup_one() -> (Shell, UnixStream, UnixStream) {
    let (transport_a, transport_b) = UnixStream::pair().unwrap();
    let transport_a2 = transport_a.try_clone().unwrap();
    let mut sh = Shell::new(
        16 * 1024,
        unix_to_file(transport_a),
        unix_to_file(transport_a2),
        64 * 1024,
    )
    .unwrap();
    let (local, remote) = UnixStream::pair().unwrap();
    let idx = sh.add_channel(Dir::FromFd, unix_to_file(remote), 64 * 1024).unwrap();
    assert_eq!(idx, muxshell::NR_SPECIAL_CH);
    (sh, transport_b, local)
}

fn bench_shell(c: &mut BenchmarkGroup<impl measurement::Measurement>, payload: &[u8]) {
    let (mut sh, mut transport_peer, mut local) = setup_one();
    transport_peer.set_nonblocking(true).unwrap();
    // Grant a large window up front so data emission is never gated on it.
    let mut win = Vec::new();
    muxshell::wire::encode_window(muxshell::NR_SPECIAL_CH as u32, u32::MAX / 2, &mut win);
    transport_peer.write_all(&win).unwrap();
    let mut handler = DefaultHandler;
    sh.io_loop_1(&mut handler).unwrap();

    c.bench_with_input(BenchmarkId::new("muxshell", payload.len()), &(), |b, _| {
        b.iter(|| {
            local.write_all(black_box(payload)).unwrap();
            let mut received = 0usize;
            let mut scratch = [0u8; 4096];
            while received < payload.len() {
                sh.io_loop_1(&mut handler).unwrap();
                if let Ok(n) = transport_peer.read(&mut scratch) {
                    // Every DATA frame on the wire carries a fixed 9-byte
                    // header+channel prefix ahead of its payload bytes.
                    received += n.saturating_sub(9);
                }
            }
        })
    });
}

fn bench_raw_unixsocket(c: &mut BenchmarkGroup<impl measurement::Measurement>, payload: &[u8]) {
    let (mut a, mut b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    let mut scratch = vec![0u8; payload.len()];
    c.bench_with_input(BenchmarkId::new("raw unix socket", payload.len()), &(), |bch, _| {
        bch.iter(|| {
            a.write_all(black_box(payload)).unwrap();
            b.read_exact(&mut scratch).unwrap();
        })
    });
}

use std::io::Read;

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("muxshell vs raw unix socket");
    group.warm_up_time(Duration::from_millis(500));
    group.sample_size(40);
    group.measurement_time(Duration::from_millis(1500));

    for len in [64usize, 1024, 16 * 1024] {
        let payload = vec![0x42u8; len];
        bench_shell(&mut group, &payload);
        bench_raw_unixsocket(&mut group, &payload);
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
