//! Mock device channel for testing
//!
//! Provides a scripted stand-in for a serial device so the brew session, drain
//! routine and runner can be exercised without hardware. It provides:
//! - A queue of scripted `read_line` results (lines, silences, faults)
//! - A queue of scripted `read_all` chunks with a repeating idle chunk
//! - Failure injection for the next operation
//! - A log of every command sent, for test verification
//!
//! Handles are cheap clones over shared state, so a test can keep one handle and
//! give another to the device under test.

use super::{AdapterError, DeviceChannel};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One scripted `read_line` result.
#[derive(Debug, Clone, PartialEq)]
pub enum MockLine {
    /// A complete line
    Line(String),
    /// Nothing buffered
    Silence,
    /// Channel fault
    Fault,
}

#[derive(Default)]
struct MockState {
    lines: VecDeque<MockLine>,
    chunks: VecDeque<String>,
    idle_chunk: String,
    sent: Vec<String>,
}

/// Mock device channel
///
/// # Example
///
/// ```
/// use brew_bench::adapters::{DeviceChannel, MockAdapter};
///
/// # tokio_test_block(async {
/// let scale = MockAdapter::new("scale");
/// scale.push_chunk("ST,+00012.5 g\r\n");
///
/// let mut channel = scale.clone();
/// assert_eq!(channel.read_all().await.unwrap(), "ST,+00012.5 g\r\n");
/// assert_eq!(channel.read_all().await.unwrap(), "");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct MockAdapter {
    name: String,
    state: Arc<Mutex<MockState>>,
    should_fail_next: Arc<AtomicBool>,
}

impl MockAdapter {
    /// Create a silent mock channel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockState::default())),
            should_fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue one `read_line` result
    pub fn push(&self, line: MockLine) {
        self.state().lines.push_back(line);
    }

    /// Queue a complete line
    pub fn push_line(&self, line: impl Into<String>) {
        self.push(MockLine::Line(line.into()));
    }

    /// Queue `count` empty reads
    pub fn push_silence(&self, count: usize) {
        let mut state = self.state();
        state.lines.extend(std::iter::repeat(MockLine::Silence).take(count));
    }

    /// Queue one `read_all` result
    pub fn push_chunk(&self, chunk: impl Into<String>) {
        self.state().chunks.push_back(chunk.into());
    }

    /// `read_all` result once the chunk queue is exhausted (default: empty)
    pub fn set_idle_chunk(&self, chunk: impl Into<String>) {
        self.state().idle_chunk = chunk.into();
    }

    /// Inject a failure for the next operation
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> bool {
        self.should_fail_next.swap(false, Ordering::SeqCst)
    }

    /// Commands sent so far, without terminators
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Number of times `command` was sent
    pub fn count_sent(&self, command: &str) -> usize {
        self.state().sent.iter().filter(|c| *c == command).count()
    }

    /// Clear the sent-command log
    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// Scripted lines not yet consumed
    pub fn pending_lines(&self) -> usize {
        self.state().lines.len()
    }
}

#[async_trait]
impl DeviceChannel for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, command: &str) -> Result<(), AdapterError> {
        if self.check_failure() {
            return Err(AdapterError::Injected);
        }
        self.state().sent.push(command.to_string());
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, AdapterError> {
        if self.check_failure() {
            return Err(AdapterError::Injected);
        }
        match self.state().lines.pop_front() {
            Some(MockLine::Line(line)) => Ok(Some(line)),
            Some(MockLine::Fault) => Err(AdapterError::Injected),
            Some(MockLine::Silence) | None => Ok(None),
        }
    }

    async fn read_all(&mut self) -> Result<String, AdapterError> {
        if self.check_failure() {
            return Err(AdapterError::Injected);
        }
        let mut state = self.state();
        match state.chunks.pop_front() {
            Some(chunk) => Ok(chunk),
            None => Ok(state.idle_chunk.clone()),
        }
    }
}
