//! Duplex transfer with a child process.
//!
//! The helper reads its whole input before answering on some platforms and
//! streams output early on others; either way a child blocked writing a full
//! stdout pipe must never deadlock against a parent blocked writing stdin.
//! [`transfer`] interleaves bounded writes and reads over a [`DuplexChannel`]
//! until the child closes its output.

use std::io;
use std::time::{Duration, Instant};

/// Largest single write to the child's input.
pub const WRITE_CHUNK: usize = 4096;

/// Largest single read from the child's output.
pub const READ_CHUNK: usize = 1024;

/// Upper bound for a single readiness wait.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Which directions can make progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub writable: bool,
    pub readable: bool,
}

/// Outcome of one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadChunk {
    /// Bytes were appended to the buffer.
    Data(usize),
    /// The child closed its output.
    Eof,
    /// Nothing available yet.
    Pending,
}

/// Platform half of the transfer loop.
pub trait DuplexChannel {
    /// Block for at most `timeout` until some direction is ready.
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness>;

    /// Write a prefix of `data`; returns how much was accepted.
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Close the child's input so it sees end-of-file.
    fn close_input(&mut self);

    /// Append at most [`READ_CHUNK`] bytes to `buf`.
    fn read_chunk(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadChunk>;
}

/// Feed `input` to the child and collect everything it writes until EOF.
///
/// A child that stops reading early (broken pipe) is not an error here; its
/// exit status decides. Passing the deadline fails with
/// [`io::ErrorKind::TimedOut`].
pub fn transfer<C: DuplexChannel>(
    channel: &mut C,
    input: &[u8],
    deadline: Option<Instant>,
) -> io::Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut written = 0;
    let mut input_open = true;

    if input.is_empty() {
        channel.close_input();
        input_open = false;
    }

    loop {
        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "child did not finish in time",
                    ));
                }
                WAIT_SLICE.min(deadline - now)
            }
            None => WAIT_SLICE,
        };

        let ready = channel.wait(slice)?;

        if input_open && ready.writable {
            let end = (written + WRITE_CHUNK).min(input.len());
            match channel.write_chunk(&input[written..end]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!(written, total = input.len(), "child closed its input early");
                    written = input.len();
                }
                Err(e) => return Err(e),
            }
            if written >= input.len() {
                channel.close_input();
                input_open = false;
            }
        }

        if ready.readable {
            match channel.read_chunk(&mut output) {
                Ok(ReadChunk::Eof) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    if input_open {
        channel.close_input();
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted channel: echoes input back once stdin is closed, optionally
    /// refusing input after `accept_limit` bytes.
    #[derive(Default)]
    struct EchoChannel {
        received: Vec<u8>,
        pending: VecDeque<u8>,
        input_closed: bool,
        accept_limit: Option<usize>,
        writes: Vec<usize>,
        stall: bool,
    }

    impl DuplexChannel for EchoChannel {
        fn wait(&mut self, _timeout: Duration) -> io::Result<Readiness> {
            if self.stall {
                std::thread::sleep(Duration::from_millis(5));
                return Ok(Readiness::default());
            }
            Ok(Readiness {
                writable: !self.input_closed,
                readable: self.input_closed || !self.pending.is_empty(),
            })
        }

        fn write_chunk(&mut self, data: &[u8]) -> io::Result<usize> {
            if let Some(limit) = self.accept_limit {
                if self.received.len() >= limit {
                    return Err(io::Error::from(io::ErrorKind::BrokenPipe));
                }
            }
            self.writes.push(data.len());
            self.received.extend_from_slice(data);
            Ok(data.len())
        }

        fn close_input(&mut self) {
            if !self.input_closed {
                self.input_closed = true;
                self.pending.extend(self.received.iter().copied());
            }
        }

        fn read_chunk(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadChunk> {
            if self.pending.is_empty() {
                return Ok(if self.input_closed {
                    ReadChunk::Eof
                } else {
                    ReadChunk::Pending
                });
            }
            let n = self.pending.len().min(READ_CHUNK);
            buf.extend(self.pending.drain(..n));
            Ok(ReadChunk::Data(n))
        }
    }

    #[test]
    fn test_transfer_echoes_large_input() {
        let input: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut channel = EchoChannel::default();

        let output = transfer(&mut channel, &input, None).unwrap();

        assert_eq!(output, input);
        assert!(channel.writes.iter().all(|&n| n <= WRITE_CHUNK));
        assert_eq!(channel.writes.len(), 5);
    }

    #[test]
    fn test_transfer_empty_input_closes_immediately() {
        let mut channel = EchoChannel::default();
        let output = transfer(&mut channel, b"", None).unwrap();
        assert!(output.is_empty());
        assert!(channel.input_closed);
        assert!(channel.writes.is_empty());
    }

    #[test]
    fn test_transfer_broken_pipe_keeps_draining() {
        let mut channel = EchoChannel {
            accept_limit: Some(WRITE_CHUNK),
            ..Default::default()
        };
        let input = vec![7u8; WRITE_CHUNK * 3];

        let output = transfer(&mut channel, &input, None).unwrap();
        assert_eq!(output, vec![7u8; WRITE_CHUNK]);
    }

    #[test]
    fn test_transfer_deadline() {
        let mut channel = EchoChannel {
            stall: true,
            ..Default::default()
        };
        let deadline = Instant::now() + Duration::from_millis(30);

        let err = transfer(&mut channel, b"source", Some(deadline)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
