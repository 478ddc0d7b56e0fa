//! Keithley 2700 multimeter driver
//!
//! This module drives a Keithley 2700 (with a 7700-series multiplexer card) over
//! any [`Transport`]. The driver owns the transport, sends the setup preamble
//! once per session, programs the scan list from a list of [`Channel`]s, and
//! turns `READ?` responses into sample vectors.
//!
//! ## Scan order
//!
//! The order channels are handed to [`Keithley2700::configure_channels`] is the
//! order the instrument returns readings in. Each channel's logical index is
//! set to its position in that list, so the same list must not be reordered
//! between configuration and reading without configuring again.

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use crate::instrument::Channel;
use std::time::Duration;
use tracing::{debug, info};

/// Commands sent once after the port opens, in order.
pub const PREAMBLE: [&str; 8] = [
    "*RST",
    "SYST:PRES",
    "SYST:BEEP OFF",
    "TRAC:CLE",
    "TRAC:CLE:AUTO OFF",
    "INIT:CONT OFF",
    "TRIG:COUN 1",
    "FORM:ELEM READ",
];

/// Triggers one scan and returns its readings.
pub const READ_COMMAND: &str = "READ?";

/// Keithley 2700 driver
pub struct Keithley2700 {
    transport: Box<dyn Transport>,
    inter_command_delay: Duration,
    scan_len: Option<usize>,
}

impl Keithley2700 {
    /// Creates a driver around an unopened transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            inter_command_delay: Duration::from_millis(250),
            scan_len: None,
        }
    }

    /// Sets the pause between preamble commands.
    pub fn with_inter_command_delay(mut self, delay: Duration) -> Self {
        self.inter_command_delay = delay;
        self
    }

    /// Number of channels in the programmed scan list, if configured.
    pub fn scan_len(&self) -> Option<usize> {
        self.scan_len
    }

    /// Opens the transport, sends the preamble and flushes stale input.
    ///
    /// A failure here is fatal: the caller must not start acquiring.
    pub async fn connect(&mut self) -> AppResult<()> {
        self.transport.open().await.map_err(|e| match e {
            DaqError::Connection(_) | DaqError::SerialFeatureDisabled => e,
            other => DaqError::Connection(other.to_string()),
        })?;
        info!("Connected to device at {}", self.transport.name());

        for command in PREAMBLE {
            self.send_one(command).await?;
            if !self.inter_command_delay.is_zero() {
                tokio::time::sleep(self.inter_command_delay).await;
            }
        }
        self.transport.flush_input().await?;
        self.scan_len = None;
        Ok(())
    }

    /// Sends a single command.
    pub async fn send_one(&mut self, command: &str) -> AppResult<()> {
        debug!("writing: {}", command);
        self.transport.send(command).await
    }

    /// Sends each command in order.
    pub async fn send_many<S: AsRef<str>>(&mut self, commands: &[S]) -> AppResult<()> {
        for command in commands {
            self.send_one(command.as_ref()).await?;
        }
        Ok(())
    }

    /// Programs the scan list.
    ///
    /// Assigns each channel its 0-based position as logical index, sends its
    /// setup commands, then the scan-list, sample-count and list-select
    /// commands. Returns the number of channels configured.
    pub async fn configure_channels<'a, I>(&mut self, channels: I) -> AppResult<usize>
    where
        I: IntoIterator<Item = &'a mut Channel>,
    {
        let mut ports = Vec::new();
        for (index, channel) in channels.into_iter().enumerate() {
            channel.assign_index(index);
            self.send_many(channel.init_commands()).await?;
            info!(
                "Initialized logical channel {}: {} at Keithley port ({})",
                index,
                channel.name(),
                channel.hard_port()
            );
            ports.push(channel.hard_port());
        }

        self.send_one(&scan_list_command(&ports)).await?;
        self.send_one(&format!("SAMP:COUN {}", ports.len())).await?;
        self.send_one("ROUT:SCAN:LSEL INT").await?;

        self.scan_len = Some(ports.len());
        Ok(ports.len())
    }

    /// Triggers a scan and parses the readings.
    ///
    /// Pending input is discarded first, so a reply that arrived after an
    /// earlier timeout is never taken for this scan. An empty or non-numeric
    /// response is a [`DaqError::Parse`]; the caller should skip the cycle
    /// rather than stop.
    pub async fn read(&mut self) -> AppResult<Vec<f64>> {
        self.transport.flush_input().await?;
        self.send_one(READ_COMMAND).await?;
        let response = self.transport.read_response().await?;
        parse_readings(&response)
    }

    /// Releases the transport. Safe to call more than once.
    pub async fn close(&mut self) -> AppResult<()> {
        if self.transport.is_open() {
            info!("Closing serial connection with {}", self.transport.name());
        }
        self.scan_len = None;
        self.transport.close().await
    }
}

/// Builds `ROUT:SCAN (@p1,p2,...)` with ports in the given order.
pub fn scan_list_command(ports: &[u32]) -> String {
    let list = ports
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("ROUT:SCAN (@{})", list)
}

/// Parses a comma-separated reading list.
pub fn parse_readings(response: &str) -> AppResult<Vec<f64>> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(DaqError::Parse("Received nothing from Keithley".to_string()));
    }
    trimmed
        .split(',')
        .map(|field| {
            let field = field.trim();
            field.parse::<f64>().map_err(|_| {
                DaqError::Parse(format!(
                    "non-numeric field '{}' in response '{}'",
                    field, trimmed
                ))
            })
        })
        .collect()
}
