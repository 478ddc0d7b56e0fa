//! Acquisition controller
//!
//! Drives the measurement cycle: trigger a scan on the [`Keithley2700`], map the
//! returned samples onto every configured [`Channel`](crate::instrument::Channel)
//! through its logical index, apply each channel's conversion and hand the
//! result to every [`SaveGroup`].
//!
//! ## State machine
//!
//! ```text
//! Uninitialized --initialize()--> Configured --run()--> Cycling --stop()--> Stopped
//! ```
//!
//! A cycle either updates every channel and writes every group, or touches
//! nothing. Read failures and short sample lists skip the cycle; only a lost
//! transport ends the run.

use crate::data::SaveGroup;
use crate::error::{AppResult, DaqError};
use crate::instrument::Keithley2700;
use chrono::{Local, NaiveDateTime};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lifecycle of an [`AcquisitionController`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    /// Transport not yet opened.
    Uninitialized,
    /// Preamble sent and scan list programmed.
    Configured,
    /// Inside [`AcquisitionController::run`].
    Cycling,
    /// Transport released.
    Stopped,
}

/// What one cycle did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Channels were updated and every group was asked to save.
    Saved {
        /// Groups whose `save_data` succeeded.
        groups_written: usize,
        /// Groups whose `save_data` returned an error.
        failed_groups: Vec<String>,
    },
    /// Nothing was mutated or written.
    Skipped(String),
}

/// Owns the driver and the save groups for one run.
pub struct AcquisitionController {
    driver: Keithley2700,
    groups: Vec<SaveGroup>,
    state: ControllerState,
}

impl AcquisitionController {
    /// Creates a controller; nothing is sent until [`Self::initialize`].
    pub fn new(driver: Keithley2700, groups: Vec<SaveGroup>) -> Self {
        Self {
            driver,
            groups,
            state: ControllerState::Uninitialized,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Save groups in scan order.
    pub fn groups(&self) -> &[SaveGroup] {
        &self.groups
    }

    /// Connects and programs the scan list from every group's channels.
    ///
    /// Channels are scanned in group order, then member order within a group.
    pub async fn initialize(&mut self) -> AppResult<()> {
        self.driver.connect().await?;
        let channels = self
            .groups
            .iter_mut()
            .flat_map(|group| group.channels_mut().iter_mut());
        let count = self.driver.configure_channels(channels).await?;
        info!(
            "Configured {} channels across {} save groups",
            count,
            self.groups.len()
        );
        self.state = ControllerState::Configured;
        Ok(())
    }

    /// Runs one cycle stamped with the local wall-clock time.
    pub async fn run_cycle(&mut self) -> AppResult<CycleOutcome> {
        self.run_cycle_at(Local::now().naive_local()).await
    }

    /// Runs one cycle stamped with `now`.
    ///
    /// Transient failures return [`CycleOutcome::Skipped`]; anything else
    /// means the instrument is unusable and is returned as an error.
    pub async fn run_cycle_at(&mut self, now: NaiveDateTime) -> AppResult<CycleOutcome> {
        if !matches!(
            self.state,
            ControllerState::Configured | ControllerState::Cycling
        ) {
            return Err(DaqError::NotConfigured);
        }

        let samples = match self.driver.read().await {
            Ok(samples) => samples,
            Err(e) if e.is_transient() => {
                warn!("Skipping acquisition cycle: {}", e);
                return Ok(CycleOutcome::Skipped(e.to_string()));
            }
            Err(e) => return Err(e),
        };
        debug!(
            "Raw samples: [{}]",
            samples
                .iter()
                .map(|s| format!("{:.3}", s))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if let Err(e) = self.check_samples(samples.len()) {
            warn!("Skipping acquisition cycle: {}", e);
            return Ok(CycleOutcome::Skipped(e.to_string()));
        }

        for channel in self.groups.iter_mut().flat_map(|g| g.channels_mut().iter_mut()) {
            if let Some(index) = channel.logical_index() {
                let value = channel.convert(samples[index]);
                channel.set_current_value(value);
            }
        }

        let mut groups_written = 0;
        let mut failed_groups = Vec::new();
        for group in &self.groups {
            match group.save_data(now) {
                Ok(_) => groups_written += 1,
                Err(e) => {
                    error!("Save group '{}' failed to save: {}", group.name(), e);
                    failed_groups.push(group.name().to_string());
                }
            }
        }

        Ok(CycleOutcome::Saved {
            groups_written,
            failed_groups,
        })
    }

    /// Every channel must have an index inside the sample list.
    fn check_samples(&self, len: usize) -> AppResult<()> {
        for channel in self.groups.iter().flat_map(|g| g.channels()) {
            let index = channel.logical_index().ok_or(DaqError::NotConfigured)?;
            if index >= len {
                return Err(DaqError::MissingSample { index, len });
            }
        }
        Ok(())
    }

    /// Cycles every `interval` until `shutdown` resolves, then stops.
    ///
    /// A slow cycle delays the next tick instead of bursting to catch up, so
    /// cycles never overlap. A fatal error stops the controller and is
    /// returned; a failure to close afterwards is only logged.
    pub async fn run<F>(&mut self, interval: Duration, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.state == ControllerState::Uninitialized {
            self.initialize().await?;
        }
        self.state = ControllerState::Cycling;
        info!("Acquisition started, interval {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Acquisition aborted: {}", e);
                        break Err(e);
                    }
                }
                _ = &mut shutdown => {
                    info!("Acquisition shutdown requested");
                    break Ok(());
                }
            }
        };

        match self.stop().await {
            Ok(()) => result,
            Err(e) if result.is_err() => {
                error!("Failed to close the instrument after abort: {}", e);
                result
            }
            Err(e) => Err(e),
        }
    }

    /// Releases the instrument. Safe to call more than once.
    pub async fn stop(&mut self) -> AppResult<()> {
        self.driver.close().await?;
        self.state = ControllerState::Stopped;
        Ok(())
    }
}
