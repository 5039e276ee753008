//! Pipe Channel Set
//!
//! Owns the three stdio pipes between a parent and one child: the parent ends
//! stay here, the child ends are handed to the launcher which duplicates them
//! onto the child's standard streams. Output pipes are read without blocking
//! through a uniform [`ReadOutcome`], whatever the platform mechanism is.

use std::fs::File;
use std::io::{self, PipeReader, PipeWriter, Read, Write};
use std::path::Path;
use std::process::Stdio;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{ProcessError, Result};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix::OutputChannel;
#[cfg(windows)]
use windows::OutputChannel;

/// Size of a single read from an output pipe
pub(crate) const READ_CHUNK: usize = 4096;

/// Upper bound of chunks taken from one pipe per drain call
const MAX_CHUNKS_PER_DRAIN: usize = 64;

/// Size of a single write when feeding an input file
const INPUT_CHUNK: usize = 4096;

/// Ctrl-Z, sent before closing stdin where closing alone is not seen as EOF
const END_OF_TRANSMISSION: u8 = 0x1A;

const EOT_ON_CLOSE: bool = cfg!(windows);

/// Poll step while waiting for the input writer
const FEEDER_POLL: Duration = Duration::from_millis(5);

/// Result of one non-blocking read attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were placed in the buffer
    Data(usize),
    /// Nothing available right now
    WouldBlock,
    /// Writer side closed and everything has been read
    Eof,
}

/// Bytes moved through each channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCounters {
    pub stdin: u64,
    pub stdout: u64,
    pub stderr: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// Both ends of every pipe are open
    Created,
    /// Child ends live in the child, parent ends open here
    Spawned,
    /// Everything closed
    Closed,
}

/// Child side of the three pipes, before they are given to a spawned process
#[derive(Debug)]
pub struct ChildEnds {
    stdin: PipeReader,
    stdout: PipeWriter,
    stderr: PipeWriter,
}

/// Child ends converted for `std::process::Command`
#[derive(Debug)]
pub struct ChildStdio {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

impl ChildEnds {
    pub(crate) fn into_stdio(self) -> ChildStdio {
        ChildStdio {
            stdin: Stdio::from(self.stdin),
            stdout: Stdio::from(self.stdout),
            stderr: Stdio::from(self.stderr),
        }
    }
}

/// The three stdio channels of one child process run
#[derive(Debug)]
pub struct ChannelSet {
    stdin: Option<PipeWriter>,
    stdout: Option<OutputChannel>,
    stderr: Option<OutputChannel>,
    child_ends: Option<ChildEnds>,
    counters: ChannelCounters,
    eot_pending: bool,
    feeder: Option<JoinHandle<io::Result<u64>>>,
    phase: ChannelPhase,
}

impl ChannelSet {
    /// Allocate the stdin, stdout and stderr pipes
    pub fn new() -> Result<Self> {
        let (stdout_read, stdout_write) = create_pipe("stdout")?;
        let (stderr_read, stderr_write) = create_pipe("stderr")?;
        let (stdin_read, stdin_write) = create_pipe("stdin")?;

        let stdout = OutputChannel::new(stdout_read, "stdout").map_err(|source| {
            ProcessError::PipeCreation {
                channel: "stdout",
                source,
            }
        })?;
        let stderr = OutputChannel::new(stderr_read, "stderr").map_err(|source| {
            ProcessError::PipeCreation {
                channel: "stderr",
                source,
            }
        })?;

        Ok(Self {
            stdin: Some(stdin_write),
            stdout: Some(stdout),
            stderr: Some(stderr),
            child_ends: Some(ChildEnds {
                stdin: stdin_read,
                stdout: stdout_write,
                stderr: stderr_write,
            }),
            counters: ChannelCounters::default(),
            eot_pending: false,
            feeder: None,
            phase: ChannelPhase::Created,
        })
    }

    /// Hand out the child ends so the launcher can install them as fds 0/1/2.
    pub fn child_ends(&mut self) -> Result<ChildEnds> {
        self.child_ends.take().ok_or_else(|| {
            ProcessError::InvalidConfig("child pipe ends were already handed out".to_string())
        })
    }

    /// Mark the child as spawned. Child ends not yet handed out are closed here
    /// so the parent holds only its own ends.
    pub fn parent_side(&mut self) {
        self.child_ends = None;
        if self.phase == ChannelPhase::Created {
            self.phase = ChannelPhase::Spawned;
        }
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    pub fn counters(&self) -> ChannelCounters {
        self.counters
    }

    pub fn is_input_open(&self) -> bool {
        self.stdin.is_some()
    }

    /// Read whatever the child has written to stdout so far
    pub fn drain_stdout(&mut self, sink: Option<&mut dyn Write>) -> Result<usize> {
        drain_channel(&mut self.stdout, &mut self.counters.stdout, sink, "stdout")
    }

    /// Read whatever the child has written to stderr so far
    pub fn drain_stderr(&mut self, sink: Option<&mut dyn Write>) -> Result<usize> {
        drain_channel(&mut self.stderr, &mut self.counters.stderr, sink, "stderr")
    }

    /// Drain stderr then stdout into the same sink, collecting a finished input writer
    pub fn drain_all(&mut self, mut sink: Option<&mut dyn Write>) -> Result<usize> {
        self.settle_input(Duration::ZERO)?;
        let err = self.drain_stderr(reborrow(&mut sink))?;
        let out = self.drain_stdout(sink)?;
        Ok(err + out)
    }

    /// Start streaming a file into the child's stdin.
    ///
    /// Returns as soon as the file is open. A writer thread copies the file and
    /// closes stdin when done; a child that stops reading ends the transfer
    /// without an error. The bytes written reach the stdin counter once the
    /// writer has been collected by [`ChannelSet::settle_input`].
    pub fn feed_file(&mut self, path: &Path) -> Result<()> {
        if self.feeder.is_some() {
            return Err(ProcessError::InvalidConfig(
                "an input file is already being fed".to_string(),
            ));
        }
        let file = File::open(path).map_err(|source| {
            ProcessError::io(format!("opening input file {}", path.display()), source)
        })?;
        let writer = self.stdin.take().ok_or_else(input_closed)?;
        self.eot_pending = false;

        let feeder = thread::Builder::new()
            .name("procpipe-stdin".to_string())
            .spawn(move || copy_input(file, writer, EOT_ON_CLOSE))
            .map_err(|source| ProcessError::io("starting input writer", source))?;
        self.feeder = Some(feeder);
        Ok(())
    }

    /// Whether an input file is still being written to the child
    pub fn is_feeding(&self) -> bool {
        self.feeder.as_ref().is_some_and(|feeder| !feeder.is_finished())
    }

    /// Collect the input writer if it finishes within `wait`.
    ///
    /// A writer still busy after `wait` is left running. Its byte count is
    /// added to the stdin counter once it is collected.
    pub fn settle_input(&mut self, wait: Duration) -> Result<()> {
        let Some(feeder) = self.feeder.as_ref() else {
            return Ok(());
        };
        let deadline = Instant::now() + wait;
        while !feeder.is_finished() {
            if Instant::now() >= deadline {
                return Ok(());
            }
            thread::sleep(FEEDER_POLL);
        }

        let Some(feeder) = self.feeder.take() else {
            return Ok(());
        };
        match feeder.join() {
            Ok(Ok(written)) => {
                self.counters.stdin += written;
                Ok(())
            }
            Ok(Err(source)) => Err(ProcessError::io("feeding input file", source)),
            Err(_) => Err(ProcessError::io(
                "feeding input file",
                io::Error::other("input writer panicked"),
            )),
        }
    }

    /// Write text to the child's stdin and keep the channel open
    pub fn send(&mut self, text: &str) -> Result<usize> {
        let writer = self.input_writer()?;
        writer
            .write_all(text.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|source| ProcessError::io("writing to child stdin", source))?;
        self.counters.stdin += text.len() as u64;
        self.eot_pending = EOT_ON_CLOSE;
        Ok(text.len())
    }

    /// Close the child's stdin, sending a pending end-of-transmission byte first
    pub fn close_input(&mut self) -> Result<()> {
        let Some(mut writer) = self.stdin.take() else {
            return Ok(());
        };
        if std::mem::take(&mut self.eot_pending) {
            match writer.write_all(&[END_OF_TRANSMISSION]) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Err(source) => {
                    return Err(ProcessError::io(
                        "sending end of transmission to child stdin",
                        source,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Close every channel. Safe to call repeatedly.
    pub fn close(&mut self) {
        // a busy writer ends by itself once the child's stdin is gone
        self.feeder = None;
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        self.child_ends = None;
        self.eot_pending = false;
        self.phase = ChannelPhase::Closed;
    }

    fn input_writer(&mut self) -> Result<&mut PipeWriter> {
        self.stdin.as_mut().ok_or_else(input_closed)
    }
}

fn input_closed() -> ProcessError {
    ProcessError::io(
        "writing to child stdin",
        io::Error::new(io::ErrorKind::BrokenPipe, "input channel is closed"),
    )
}

fn copy_input(mut file: File, mut writer: PipeWriter, send_eot: bool) -> io::Result<u64> {
    let mut buf = [0u8; INPUT_CHUNK];
    let mut written = 0u64;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        match writer.write_all(&buf[..n]) {
            Ok(()) => written += n as u64,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(written, "Child closed stdin before input was consumed");
                return Ok(written);
            }
            Err(e) => return Err(e),
        }
    }
    if send_eot {
        match writer.write_all(&[END_OF_TRANSMISSION]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

fn reborrow<'s>(sink: &'s mut Option<&mut dyn Write>) -> Option<&'s mut dyn Write> {
    match sink {
        Some(writer) => Some(&mut **writer),
        None => None,
    }
}

fn create_pipe(channel: &'static str) -> Result<(PipeReader, PipeWriter)> {
    io::pipe().map_err(|source| ProcessError::PipeCreation { channel, source })
}

fn drain_channel(
    channel: &mut Option<OutputChannel>,
    counter: &mut u64,
    mut sink: Option<&mut dyn Write>,
    name: &'static str,
) -> Result<usize> {
    let Some(reader) = channel.as_mut() else {
        return Ok(0);
    };

    let mut buf = [0u8; READ_CHUNK];
    let mut total = 0;
    for _ in 0..MAX_CHUNKS_PER_DRAIN {
        let outcome = reader
            .try_read(&mut buf)
            .map_err(|source| ProcessError::io(format!("reading child {name}"), source))?;
        match outcome {
            ReadOutcome::Data(n) => {
                if let Some(writer) = sink.as_deref_mut() {
                    writer
                        .write_all(&buf[..n])
                        .map_err(|source| ProcessError::io("writing to output sink", source))?;
                }
                *counter += n as u64;
                total += n;
            }
            ReadOutcome::WouldBlock => break,
            ReadOutcome::Eof => {
                *channel = None;
                break;
            }
        }
    }

    if total > 0 {
        if let Some(writer) = sink {
            writer
                .flush()
                .map_err(|source| ProcessError::io("flushing output sink", source))?;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Play the child: take the child ends and use them directly.
    fn fake_child(set: &mut ChannelSet) -> ChildEnds {
        let ends = set.child_ends().unwrap();
        set.parent_side();
        ends
    }

    #[test]
    fn test_phases() {
        let mut set = ChannelSet::new().unwrap();
        assert_eq!(set.phase(), ChannelPhase::Created);
        let _ends = fake_child(&mut set);
        assert_eq!(set.phase(), ChannelPhase::Spawned);
        assert!(set.child_ends().is_err());
        set.close();
        set.close();
        assert_eq!(set.phase(), ChannelPhase::Closed);
        assert!(!set.is_input_open());
    }

    #[test]
    fn test_drain_without_data_is_not_an_error() {
        let mut set = ChannelSet::new().unwrap();
        let _ends = fake_child(&mut set);
        let mut sink = Vec::new();
        // give a possible reader thread a moment
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(set.drain_stdout(Some(&mut sink)).unwrap(), 0);
        assert_eq!(set.drain_stderr(None).unwrap(), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_drain_counts_even_without_sink() {
        let mut set = ChannelSet::new().unwrap();
        let mut ends = fake_child(&mut set);
        ends.stdout.write_all(b"hello").unwrap();
        ends.stderr.write_all(b"oops").unwrap();
        drop(ends);
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut sink = Vec::new();
        let mut total = 0;
        for _ in 0..10 {
            total += set.drain_stdout(Some(&mut sink)).unwrap();
            total += set.drain_stderr(None).unwrap();
        }
        assert_eq!(total, 9);
        assert_eq!(sink, b"hello");
        assert_eq!(set.counters().stdout, 5);
        assert_eq!(set.counters().stderr, 4);
    }

    #[test]
    fn test_send_keeps_input_open_and_close_is_idempotent() {
        let mut set = ChannelSet::new().unwrap();
        let mut ends = fake_child(&mut set);
        assert_eq!(set.send("abc").unwrap(), 3);
        assert!(set.is_input_open());
        set.close_input().unwrap();
        set.close_input().unwrap();
        assert!(!set.is_input_open());
        assert!(set.send("more").is_err());

        let mut received = Vec::new();
        ends.stdin.read_to_end(&mut received).unwrap();
        let expected: &[u8] = if EOT_ON_CLOSE { b"abc\x1a" } else { b"abc" };
        assert_eq!(received, expected);
        assert_eq!(set.counters().stdin, 3);
    }

    #[test]
    fn test_feed_file_streams_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        let payload = "line\n".repeat(2000);
        std::fs::write(&path, &payload).unwrap();

        let mut set = ChannelSet::new().unwrap();
        let mut ends = fake_child(&mut set);
        let reader = std::thread::spawn(move || {
            let mut received = Vec::new();
            ends.stdin.read_to_end(&mut received).unwrap();
            received
        });

        set.feed_file(&path).unwrap();
        assert!(!set.is_input_open());

        let received = reader.join().unwrap();
        assert!(received.starts_with(payload.as_bytes()));
        set.settle_input(Duration::from_secs(5)).unwrap();
        assert!(!set.is_feeding());
        assert_eq!(set.counters().stdin, payload.len() as u64);
    }

    #[test]
    fn test_feed_file_does_not_wait_for_a_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![b'x'; 1 << 20]).unwrap();

        let mut set = ChannelSet::new().unwrap();
        let ends = fake_child(&mut set);

        let started = Instant::now();
        set.feed_file(&path).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(set.is_feeding());
        set.drain_all(None).unwrap();
        assert!(set.feed_file(&path).is_err());

        // nobody ever reads: the writer ends once the read end goes away
        drop(ends);
        set.settle_input(Duration::from_secs(5)).unwrap();
        assert!(!set.is_feeding());
        assert!(set.counters().stdin < 1 << 20);
    }

    #[test]
    fn test_feed_missing_file_is_io_error() {
        let mut set = ChannelSet::new().unwrap();
        let _ends = fake_child(&mut set);
        let err = set
            .feed_file(Path::new("/definitely/not/here.txt"))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Io { .. }));
        assert!(set.is_input_open());
    }
}
