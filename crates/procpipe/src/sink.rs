//! Output sinks for child stdout/stderr

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;

/// Externally owned byte stream that child output is copied into.
///
/// Several processes may hold the same sink. Each drained chunk is written
/// under the lock, nothing coordinates ordering between processes beyond that.
pub type SharedSink = Arc<Mutex<dyn Write + Send>>;

/// Wrap a writer so it can be handed to one or more processes
pub fn shared<W>(writer: W) -> SharedSink
where
    W: Write + Send + 'static,
{
    Arc::new(Mutex::new(writer))
}

/// Where a process sends the output it drains from its child
#[derive(Clone, Default)]
pub enum OutputTarget {
    /// Output is read and counted, then discarded
    #[default]
    Null,
    /// Parent's own stdout
    Stdout,
    /// Caller supplied sink
    Sink(SharedSink),
    /// Child writes straight into this file (created, appended to); nothing is
    /// piped back, so the child keeps a valid stdout after the parent is gone
    File(PathBuf),
    /// Child stdout and stderr go to the null device
    Detached,
}

impl OutputTarget {
    /// Run `f` with a writer for this target, or `None` for [`OutputTarget::Null`]
    pub(crate) fn with_writer<T>(&self, f: impl FnOnce(Option<&mut dyn Write>) -> T) -> T {
        match self {
            OutputTarget::Null | OutputTarget::File(_) | OutputTarget::Detached => f(None),
            OutputTarget::Stdout => {
                let mut out = io::stdout().lock();
                f(Some(&mut out))
            }
            OutputTarget::Sink(sink) => {
                let mut guard = sink.lock();
                f(Some(&mut *guard))
            }
        }
    }

    /// Child stdout and stderr handles for targets that bypass the pipes
    pub(crate) fn direct_stdio(&self) -> io::Result<Option<(Stdio, Stdio)>> {
        match self {
            OutputTarget::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                let stderr = file.try_clone()?;
                Ok(Some((Stdio::from(file), Stdio::from(stderr))))
            }
            OutputTarget::Detached => Ok(Some((Stdio::null(), Stdio::null()))),
            _ => Ok(None),
        }
    }
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Null => f.write_str("Null"),
            OutputTarget::Stdout => f.write_str("Stdout"),
            OutputTarget::Sink(_) => f.write_str("Sink"),
            OutputTarget::File(path) => f.debug_tuple("File").field(path).finish(),
            OutputTarget::Detached => f.write_str("Detached"),
        }
    }
}

/// In-memory sink, cheap to clone; all clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`SharedSink`] writing into this buffer
    pub fn sink(&self) -> SharedSink {
        shared(self.clone())
    }

    /// Copy of everything captured so far
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    /// Captured bytes as text, invalid UTF-8 replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_buffer_clones_share_storage() {
        let buffer = CaptureBuffer::new();
        let sink = buffer.sink();
        sink.lock().write_all(b"hello ").unwrap();
        let mut clone = buffer.clone();
        clone.write_all(b"world").unwrap();
        assert_eq!(buffer.text(), "hello world");
        assert_eq!(buffer.len(), 11);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_null_target_gets_no_writer() {
        let seen = OutputTarget::Null.with_writer(|w| w.is_some());
        assert!(!seen);
    }

    #[test]
    fn test_sink_target_writes_through() {
        let buffer = CaptureBuffer::new();
        let target = OutputTarget::Sink(buffer.sink());
        target
            .with_writer(|w| w.map(|w| w.write_all(b"abc")).transpose())
            .unwrap();
        assert_eq!(buffer.contents(), b"abc");
    }

    #[test]
    fn test_direct_targets_bypass_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.log");
        let file = OutputTarget::File(path.clone());
        assert!(!file.with_writer(|w| w.is_some()));
        assert!(file.direct_stdio().unwrap().is_some());
        assert!(path.exists());

        assert!(OutputTarget::Detached.direct_stdio().unwrap().is_some());
        assert!(OutputTarget::Null.direct_stdio().unwrap().is_none());
        assert!(OutputTarget::Stdout.direct_stdio().unwrap().is_none());

        let missing = OutputTarget::File(dir.path().join("no/such/dir/out.log"));
        assert!(missing.direct_stdio().is_err());
    }
}
