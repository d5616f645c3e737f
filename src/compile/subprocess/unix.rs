//! Non-blocking pipes driven by `poll(2)`.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, RawFd};
use std::process::{ChildStdin, ChildStdout};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use super::channel::{DuplexChannel, ReadChunk, Readiness, READ_CHUNK};

pub struct PipeChannel {
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl PipeChannel {
    pub fn new(stdin: ChildStdin, stdout: ChildStdout) -> io::Result<Self> {
        set_nonblocking(stdin.as_raw_fd())?;
        set_nonblocking(stdout.as_raw_fd())?;
        Ok(Self {
            stdin: Some(stdin),
            stdout,
        })
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

impl DuplexChannel for PipeChannel {
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let mut fds = Vec::with_capacity(2);
        fds.push(PollFd::new(self.stdout.as_fd(), PollFlags::POLLIN));
        if let Some(stdin) = &self.stdin {
            fds.push(PollFd::new(stdin.as_fd(), PollFlags::POLLOUT));
        }

        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Readiness::default()),
            Err(e) => return Err(e.into()),
        }

        let fired = |fd: &PollFd<'_>, wanted: PollFlags| {
            fd.revents()
                .map(|revents| revents.intersects(wanted | PollFlags::POLLHUP | PollFlags::POLLERR))
                .unwrap_or(false)
        };
        let readable = fired(&fds[0], PollFlags::POLLIN);
        let writable = fds
            .get(1)
            .map(|fd| fired(fd, PollFlags::POLLOUT))
            .unwrap_or(false);
        Ok(Readiness { writable, readable })
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(data),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    fn close_input(&mut self) {
        self.stdin = None;
    }

    fn read_chunk(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadChunk> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stdout.read(&mut chunk) {
            Ok(0) => Ok(ReadChunk::Eof),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(ReadChunk::Data(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadChunk::Pending),
            Err(e) => Err(e),
        }
    }
}
