//! Run context: switches shared by every process that uses it
//!
//! Dry-run, non-zero-exit-is-error and the global capture sink are process-wide
//! defaults toggled by whatever drives this crate (usually a CLI). They live in
//! an explicit [`RunContext`] handed to each [`crate::Process`] instead of
//! hidden globals, so independent callers (and tests) never see each other's
//! settings.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::sink::SharedSink;

/// Default seconds to wait for a process in `run`/`catch_output`
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Sleep between liveness checks while waiting for exit
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Serializable form of the run context, loaded from file or environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Resolve and log commands but never spawn them
    pub no_run: bool,
    /// Treat a non-zero exit code as an error
    pub fail_on_nonzero: bool,
    /// Log every command line at info level before it starts
    pub echo: bool,
    pub default_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            no_run: false,
            fail_on_nonzero: false,
            echo: false,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Shared run-time switches for a group of processes
pub struct RunContext {
    no_run: AtomicBool,
    fail_on_nonzero: AtomicBool,
    echo: AtomicBool,
    global_sink: RwLock<Option<SharedSink>>,
    default_timeout: Duration,
    poll_interval: Duration,
}

impl RunContext {
    pub fn new() -> Self {
        Self::from_settings(&RunSettings::default())
    }

    /// Build a context from loaded settings
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            no_run: AtomicBool::new(settings.no_run),
            fail_on_nonzero: AtomicBool::new(settings.fail_on_nonzero),
            echo: AtomicBool::new(settings.echo),
            global_sink: RwLock::new(None),
            default_timeout: Duration::from_secs(settings.default_timeout_secs),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
        }
    }

    /// Wrap in an `Arc` for sharing between processes
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn no_run(&self) -> bool {
        self.no_run.load(Ordering::Relaxed)
    }

    /// Enable or disable dry-run mode
    pub fn set_no_run(&self, enabled: bool) {
        self.no_run.store(enabled, Ordering::Relaxed);
    }

    pub fn fail_on_nonzero(&self) -> bool {
        self.fail_on_nonzero.load(Ordering::Relaxed)
    }

    /// Enable or disable raising [`crate::ProcessError::CommandFailed`] on non-zero exit
    pub fn set_fail_on_nonzero(&self, enabled: bool) {
        self.fail_on_nonzero.store(enabled, Ordering::Relaxed);
    }

    pub fn echo(&self) -> bool {
        self.echo.load(Ordering::Relaxed)
    }

    pub fn set_echo(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::Relaxed);
    }

    /// Route the output of every process using this context into `sink`
    pub fn start_global_capture(&self, sink: SharedSink) {
        *self.global_sink.write() = Some(sink);
    }

    /// Stop global capture, returning the sink that was registered
    pub fn stop_global_capture(&self) -> Option<SharedSink> {
        self.global_sink.write().take()
    }

    pub fn global_sink(&self) -> Option<SharedSink> {
        self.global_sink.read().clone()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("no_run", &self.no_run())
            .field("fail_on_nonzero", &self.fail_on_nonzero())
            .field("echo", &self.echo())
            .field("global_capture", &self.global_sink.read().is_some())
            .field("default_timeout", &self.default_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CaptureBuffer;

    #[test]
    fn test_defaults() {
        let ctx = RunContext::new();
        assert!(!ctx.no_run());
        assert!(!ctx.fail_on_nonzero());
        assert!(ctx.global_sink().is_none());
        assert_eq!(ctx.default_timeout(), Duration::from_secs(15));
        assert_eq!(ctx.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_settings() {
        let settings = RunSettings {
            no_run: true,
            fail_on_nonzero: true,
            echo: true,
            default_timeout_secs: 3,
            poll_interval_ms: 0,
        };
        let ctx = RunContext::from_settings(&settings);
        assert!(ctx.no_run());
        assert!(ctx.fail_on_nonzero());
        assert!(ctx.echo());
        assert_eq!(ctx.default_timeout(), Duration::from_secs(3));
        assert_eq!(ctx.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_switches_are_independent_per_context() {
        let a = RunContext::new().shared();
        let b = RunContext::new().shared();
        a.set_no_run(true);
        a.set_fail_on_nonzero(true);
        assert!(!b.no_run());
        assert!(!b.fail_on_nonzero());
        a.set_no_run(false);
        assert!(!a.no_run());
    }

    #[test]
    fn test_global_capture_start_stop() {
        let ctx = RunContext::new();
        let buffer = CaptureBuffer::new();
        ctx.start_global_capture(buffer.sink());
        assert!(ctx.global_sink().is_some());
        assert!(ctx.stop_global_capture().is_some());
        assert!(ctx.global_sink().is_none());
        assert!(ctx.stop_global_capture().is_none());
    }
}
