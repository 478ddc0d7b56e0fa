//! Mock transport for testing
//!
//! This transport stands in for the multimeter without any hardware. It provides:
//! - Scripted responses, consumed one per `read_response`
//! - Stale input that sits in the receive buffer until flushed
//! - Controllable failure injection on open and close
//! - A command log for test verification
//!
//! Clones share state, so a test can keep a handle after moving the transport
//! into a driver.

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Mock transport for testing
///
/// # Example
///
/// ```
/// use keithley_logger::adapters::MockTransport;
///
/// let transport = MockTransport::new();
/// transport.push_response("0.01,0.02,0.03");
/// assert!(!transport.is_connected());
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    connected: Arc<AtomicBool>,
    fail_open: Arc<AtomicBool>,
    fail_close: Arc<AtomicBool>,
    responses: Arc<Mutex<VecDeque<String>>>,
    stale: Arc<Mutex<VecDeque<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    flushes: Arc<Mutex<usize>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a closed mock transport with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next `read_response` call
    pub fn push_response(&self, response: impl Into<String>) {
        guard(&self.responses).push_back(response.into());
    }

    /// Leave a late reply in the receive buffer
    ///
    /// It is returned ahead of any scripted response unless `flush_input`
    /// discards it first.
    pub fn push_stale_input(&self, response: impl Into<String>) {
        guard(&self.stale).push_back(response.into());
    }

    /// Make the next `close` fail with a connection error
    pub fn fail_next_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Simulate the device going away without a close
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Make the next `open` fail with a connection error
    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Every command sent so far, in order
    pub fn sent_commands(&self) -> Vec<String> {
        guard(&self.sent).clone()
    }

    /// Clear the command log
    pub fn clear_log(&self) {
        guard(&self.sent).clear();
    }

    /// Number of times the input buffer was flushed
    pub fn flush_count(&self) -> usize {
        *guard(&self.flushes)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&mut self) -> AppResult<()> {
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(DaqError::Connection("Injected failure".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        if !self.is_connected() {
            return Err(DaqError::SerialPortNotConnected);
        }
        guard(&self.sent).push(command.to_string());
        Ok(())
    }

    async fn read_response(&mut self) -> AppResult<String> {
        if !self.is_connected() {
            return Err(DaqError::SerialPortNotConnected);
        }
        if let Some(stale) = guard(&self.stale).pop_front() {
            return Ok(stale);
        }
        // An unscripted read behaves like a device that never answered
        Ok(guard(&self.responses).pop_front().unwrap_or_default())
    }

    async fn flush_input(&mut self) -> AppResult<()> {
        guard(&self.stale).clear();
        *guard(&self.flushes) += 1;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_close.swap(false, Ordering::SeqCst) {
            return Err(DaqError::Connection("Injected close failure".to_string()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_connected()
    }
}
