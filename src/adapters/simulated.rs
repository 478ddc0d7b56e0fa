//! A software stand-in for the multimeter.
//!
//! Understands just enough of the command set to be driven by
//! [`Keithley2700`](crate::instrument::Keithley2700): it tracks the scan list
//! from `ROUT:SCAN (@...)` and answers `READ?` with one noisy sine sample per
//! scanned port. Useful for exercising the logger and downstream plotting
//! without a serial port.

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::time::Instant;

/// Sine period in seconds.
const PERIOD_S: f64 = 100.0;

/// Simulated Keithley multimeter.
pub struct SimulatedTransport {
    open: bool,
    started: Instant,
    ports: Vec<u32>,
    pending: VecDeque<String>,
    outlier_probability: f64,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// Creates a closed simulator with an empty scan list.
    pub fn new() -> Self {
        Self {
            open: false,
            started: Instant::now(),
            ports: Vec::new(),
            pending: VecDeque::new(),
            outlier_probability: 0.1,
        }
    }

    /// Sets how often a sample is replaced by a large outlier (0.0 disables them).
    pub fn with_outlier_probability(mut self, probability: f64) -> Self {
        self.outlier_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Ports currently in the scan list.
    pub fn scan_list(&self) -> &[u32] {
        &self.ports
    }

    fn sample(&self, port: u32, rng: &mut impl Rng) -> f64 {
        let t = self.started.elapsed().as_secs_f64();
        // Offset each port's phase so channels are distinguishable on a plot
        let phase = f64::from(port % 100) * 0.7;
        let signal = (2.0 * std::f64::consts::PI * t / PERIOD_S + phase).sin();
        let noise = 0.1 * (rng.gen::<f64>() - 0.5);
        let outlier = if rng.gen::<f64>() < self.outlier_probability {
            100.0
        } else {
            0.0
        };
        signal + noise + outlier
    }

    fn handle(&mut self, command: &str) -> AppResult<()> {
        let command = command.trim();
        if let Some(list) = command.strip_prefix("ROUT:SCAN (@") {
            let list = list.trim_end_matches(')');
            self.ports = list
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(|p| {
                    p.trim()
                        .parse::<u32>()
                        .map_err(|_| DaqError::Parse(format!("Bad port in scan list: '{}'", p)))
                })
                .collect::<AppResult<Vec<_>>>()?;
        } else if command == "READ?" {
            let mut rng = rand::thread_rng();
            let response = self
                .ports
                .iter()
                .map(|&port| format!("{:+.7E}", self.sample(port, &mut rng)))
                .collect::<Vec<_>>()
                .join(",");
            self.pending.push_back(response);
        } else if command == "*RST" {
            self.ports.clear();
            self.pending.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn open(&mut self) -> AppResult<()> {
        self.open = true;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        if !self.open {
            return Err(DaqError::SerialPortNotConnected);
        }
        self.handle(command)
    }

    async fn read_response(&mut self) -> AppResult<String> {
        if !self.open {
            return Err(DaqError::SerialPortNotConnected);
        }
        Ok(self.pending.pop_front().unwrap_or_default())
    }

    async fn flush_input(&mut self) -> AppResult<()> {
        self.pending.clear();
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_returns_one_sample_per_port() {
        let mut sim = SimulatedTransport::new().with_outlier_probability(0.0);
        sim.open().await.unwrap();
        sim.send("ROUT:SCAN (@101,102,110)").await.unwrap();
        assert_eq!(sim.scan_list(), &[101, 102, 110]);

        sim.send("READ?").await.unwrap();
        let response = sim.read_response().await.unwrap();
        let values: Vec<f64> = response.split(',').map(|v| v.parse().unwrap()).collect();
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| v.abs() < 1.1));
    }

    #[tokio::test]
    async fn test_reset_clears_scan_list() {
        let mut sim = SimulatedTransport::new();
        sim.open().await.unwrap();
        sim.send("ROUT:SCAN (@101)").await.unwrap();
        sim.send("*RST").await.unwrap();
        assert!(sim.scan_list().is_empty());
    }
}
