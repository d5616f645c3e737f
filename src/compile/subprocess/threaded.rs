//! Thread-backed pipes for platforms without `poll(2)` on pipes.
//!
//! A writer thread owns the child's stdin and a reader thread owns its stdout;
//! the transfer loop talks to both over channels.

use std::io::{self, Read, Write};
use std::process::{ChildStdin, ChildStdout};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use super::channel::{DuplexChannel, ReadChunk, Readiness, READ_CHUNK};

enum Event {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

pub struct PipeChannel {
    input: Option<Sender<Vec<u8>>>,
    output: Receiver<Event>,
    buffered: Option<Event>,
}

impl PipeChannel {
    pub fn new(stdin: ChildStdin, stdout: ChildStdout) -> io::Result<Self> {
        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>();
        let (output_tx, output_rx) = mpsc::channel();

        thread::Builder::new()
            .name("kcache-helper-stdin".to_string())
            .spawn(move || {
                let mut stdin = stdin;
                for chunk in input_rx {
                    if stdin.write_all(&chunk).is_err() {
                        break;
                    }
                }
            })?;

        thread::Builder::new()
            .name("kcache-helper-stdout".to_string())
            .spawn(move || pump_output(stdout, output_tx))?;

        Ok(Self {
            input: Some(input_tx),
            output: output_rx,
            buffered: None,
        })
    }
}

fn pump_output(mut stdout: ChildStdout, tx: Sender<Event>) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let event = match stdout.read(&mut chunk) {
            Ok(0) => Event::Eof,
            Ok(n) => Event::Data(chunk[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Event::Failed(e),
        };
        let done = !matches!(event, Event::Data(_));
        if tx.send(event).is_err() || done {
            break;
        }
    }
}

impl DuplexChannel for PipeChannel {
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        // Input is queued to the writer thread, so it is always writable.
        if self.input.is_some() {
            if self.buffered.is_none() {
                match self.output.try_recv() {
                    Ok(event) => self.buffered = Some(event),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => self.buffered = Some(Event::Eof),
                }
            }
            return Ok(Readiness {
                writable: true,
                readable: self.buffered.is_some(),
            });
        }
        if self.buffered.is_none() {
            match self.output.recv_timeout(timeout) {
                Ok(event) => self.buffered = Some(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.buffered = Some(Event::Eof),
            }
        }
        Ok(Readiness {
            writable: false,
            readable: self.buffered.is_some(),
        })
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<usize> {
        match &self.input {
            Some(tx) => tx
                .send(data.to_vec())
                .map(|_| data.len())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe)),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    fn close_input(&mut self) {
        self.input = None;
    }

    fn read_chunk(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadChunk> {
        let event = match self.buffered.take() {
            Some(event) => event,
            None => match self.output.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return Ok(ReadChunk::Pending),
                Err(TryRecvError::Disconnected) => Event::Eof,
            },
        };
        match event {
            Event::Data(data) => {
                buf.extend_from_slice(&data);
                Ok(ReadChunk::Data(data.len()))
            }
            Event::Eof => Ok(ReadChunk::Eof),
            Event::Failed(e) => Err(e),
        }
    }
}
