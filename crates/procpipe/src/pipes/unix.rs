//! Non-blocking output pipe reads on unix

use std::io::{self, PipeReader, Read};
use std::os::fd::AsRawFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use super::ReadOutcome;

/// Parent read end of stdout or stderr, switched to `O_NONBLOCK`
#[derive(Debug)]
pub(crate) struct OutputChannel {
    reader: PipeReader,
}

impl OutputChannel {
    pub(crate) fn new(reader: PipeReader, _name: &'static str) -> io::Result<Self> {
        set_nonblocking(&reader)?;
        Ok(Self { reader })
    }

    pub(crate) fn try_read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        loop {
            match self.reader.read(buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

fn set_nonblocking(fd: &impl AsRawFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_pipe_would_block() {
        let (reader, _writer) = io::pipe().unwrap();
        let mut channel = OutputChannel::new(reader, "stdout").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(channel.try_read(&mut buf).unwrap(), ReadOutcome::WouldBlock);
    }

    #[test]
    fn test_data_then_eof() {
        let (reader, mut writer) = io::pipe().unwrap();
        let mut channel = OutputChannel::new(reader, "stdout").unwrap();
        writer.write_all(b"xyz").unwrap();
        drop(writer);

        let mut buf = [0u8; 16];
        assert_eq!(channel.try_read(&mut buf).unwrap(), ReadOutcome::Data(3));
        assert_eq!(&buf[..3], b"xyz");
        assert_eq!(channel.try_read(&mut buf).unwrap(), ReadOutcome::Eof);
    }
}
