//! Transport adapters
//!
//! The instrument driver talks to the multimeter through the [`Transport`]
//! trait: a byte-oriented command/response channel with no knowledge of SCPI.
//! Implementations:
//!
//! - [`SerialTransport`]: RS-232 via the `serialport` crate
//! - [`MockTransport`]: scripted responses and a command log, for tests
//! - [`SimulatedTransport`]: a software multimeter producing noisy sine data

use crate::error::AppResult;
use async_trait::async_trait;

pub mod mock;
pub mod serial_adapter;
pub mod simulated;

pub use mock::MockTransport;
pub use serial_adapter::SerialTransport;
pub use simulated::SimulatedTransport;

/// Command/response channel to an instrument.
///
/// A transport is owned by exactly one driver; it is never shared between
/// concurrent callers.
#[async_trait]
pub trait Transport: Send {
    /// Short name used in log messages (e.g. the port path).
    fn name(&self) -> &str;

    /// Opens the underlying channel. Calling it on an open transport is a no-op.
    async fn open(&mut self) -> AppResult<()>;

    /// Writes one command followed by the configured command terminator.
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Blocks until the response terminator arrives (or the timeout expires)
    /// and returns the response without the terminator.
    async fn read_response(&mut self) -> AppResult<String>;

    /// Discards any unread input.
    async fn flush_input(&mut self) -> AppResult<()>;

    /// Releases the channel. Safe to call repeatedly.
    async fn close(&mut self) -> AppResult<()>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}
