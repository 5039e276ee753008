//! Pending-read model for output pipes on Windows
//!
//! Anonymous pipes cannot be polled, so each output pipe gets a reader thread
//! that keeps one read outstanding. `try_read` only checks whether a read has
//! completed, which mirrors overlapped I/O without blocking the poll loop.

use std::io::{self, PipeReader, Read};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use super::{ReadOutcome, READ_CHUNK};

#[derive(Debug)]
pub(crate) struct OutputChannel {
    completed: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
}

impl OutputChannel {
    pub(crate) fn new(mut reader: PipeReader, name: &'static str) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("procpipe-{name}"))
            .spawn(move || {
                let mut buf = vec![0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        // a closed pipe is end of output
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;
        Ok(Self {
            completed: rx,
            pending: Vec::new(),
        })
    }

    pub(crate) fn try_read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        if self.pending.is_empty() {
            match self.completed.try_recv() {
                Ok(Ok(chunk)) => self.pending = chunk,
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty) => return Ok(ReadOutcome::WouldBlock),
                Err(TryRecvError::Disconnected) => return Ok(ReadOutcome::Eof),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(ReadOutcome::Data(n))
    }
}
