//! Core library for the keithley_logger application.
//!
//! This library drives a Keithley 2700 multimeter scanning a multiplexer card,
//! logs every scan to daily CSV files per save group (with error-log and backup
//! destinations), and reads those files back incrementally for plotting.
//!
//! The pieces, in data-flow order:
//!
//! - [`adapters`]: transports to the instrument (serial, simulated, mock)
//! - [`instrument`]: channels and the Keithley driver
//! - [`acquisition`]: the cycle loop tying driver and save groups together
//! - [`data`]: CSV save groups, the incremental loader and its table
//! - [`config`]: layered TOML + environment settings

pub mod acquisition;
pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;

pub use acquisition::{AcquisitionController, ControllerState, CycleOutcome};
pub use error::{AppResult, DaqError};
