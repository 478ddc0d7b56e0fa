//! Logical measurement channels.
//!
//! A [`Channel`] ties together which multimeter port is read, how the port is
//! set up ([`SenseFunction`]), how the raw reading becomes a physical value
//! ([`Conversion`]), and where in a scan's sample list the reading appears.

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// How a multimeter port is configured before scanning.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SenseFunction {
    /// DC voltage with a fixed range.
    Voltage {
        /// Range in volts.
        #[serde(default = "default_voltage_range")]
        range: f64,
        /// Integration time in power-line cycles.
        #[serde(default = "default_nplc")]
        nplc: f64,
    },
    /// Four-wire PT100 RTD temperature.
    Rtd {
        /// Integration time in power-line cycles.
        #[serde(default = "default_nplc")]
        nplc: f64,
    },
    /// Thermocouple temperature.
    Thermocouple {
        /// Thermocouple type letter (J, K, T, ...).
        #[serde(default = "default_tc_type")]
        tc_type: String,
        /// Reference junction source.
        #[serde(default)]
        reference_junction: ReferenceJunction,
        /// Integration time in power-line cycles.
        #[serde(default = "default_nplc")]
        nplc: f64,
    },
}

/// Reference junction used for thermocouple compensation.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferenceJunction {
    /// The card's internal temperature sensor.
    Internal,
    /// A fixed, assumed junction temperature in °C.
    Simulated {
        /// Assumed junction temperature in °C.
        #[serde(default = "default_junction_temperature")]
        temperature: f64,
    },
}

impl Default for ReferenceJunction {
    fn default() -> Self {
        ReferenceJunction::Simulated {
            temperature: default_junction_temperature(),
        }
    }
}

fn default_voltage_range() -> f64 {
    5.0
}

fn default_nplc() -> f64 {
    5.0
}

fn default_tc_type() -> String {
    "K".to_string()
}

fn default_junction_temperature() -> f64 {
    23.0
}

impl Default for SenseFunction {
    fn default() -> Self {
        SenseFunction::Voltage {
            range: default_voltage_range(),
            nplc: default_nplc(),
        }
    }
}

impl SenseFunction {
    /// Setup commands for `hard_port`, in the order they must be sent.
    pub fn init_commands(&self, hard_port: u32) -> Vec<String> {
        let at = format!("(@{})", hard_port);
        match self {
            SenseFunction::Voltage { range, nplc } => vec![
                format!("SENS:FUNC 'VOLT',{}", at),
                format!("SENS:VOLT:NPLC {},{}", nplc, at),
                format!("SENS:VOLT:RANG {},{}", range, at),
            ],
            SenseFunction::Rtd { nplc } => vec![
                format!("SENS:FUNC 'TEMP',{}", at),
                format!("SENS:TEMP:TRAN FRTD,{}", at),
                format!("SENS:TEMP:FRTD:TYPE PT100,{}", at),
                format!("SENS:TEMP:NPLC {},{}", nplc, at),
            ],
            SenseFunction::Thermocouple {
                tc_type,
                reference_junction,
                nplc,
            } => {
                let mut commands = vec![
                    format!("SENS:FUNC 'TEMP',{}", at),
                    format!("SENS:TEMP:TRAN TC,{}", at),
                    format!("SENS:TEMP:TC:TYPE {},{}", tc_type, at),
                ];
                match reference_junction {
                    ReferenceJunction::Internal => {
                        commands.push(format!("SENS:TEMP:TC:RJUN:RSEL INT,{}", at));
                    }
                    ReferenceJunction::Simulated { temperature } => {
                        commands.push(format!("SENS:TEMP:TC:RJUN:RSEL SIM,{}", at));
                        commands.push(format!("SENS:TEMP:TC:RJUN:SIM {},{}", temperature, at));
                    }
                }
                commands.push(format!("SENS:TEMP:NPLC {},{}", nplc, at));
                commands
            }
        }
    }
}

/// Raw reading to physical unit conversion.
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Conversion {
    /// Store the raw reading.
    #[default]
    Identity,
    /// `gain * raw + offset`.
    Linear {
        /// Multiplier applied to the raw reading.
        #[serde(default = "default_gain")]
        gain: f64,
        /// Added after scaling.
        #[serde(default)]
        offset: f64,
    },
    /// Arbitrary function supplied in code.
    #[serde(skip)]
    Custom(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

fn default_gain() -> f64 {
    1.0
}

impl Conversion {
    /// Wraps a closure as a conversion.
    pub fn custom(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Conversion::Custom(Arc::new(f))
    }

    /// Shorthand for `Linear { gain, offset }`.
    pub fn linear(gain: f64, offset: f64) -> Self {
        Conversion::Linear { gain, offset }
    }

    /// Applies the conversion.
    pub fn apply(&self, raw: f64) -> f64 {
        match self {
            Conversion::Identity => raw,
            Conversion::Linear { gain, offset } => gain * raw + offset,
            Conversion::Custom(f) => f(raw),
        }
    }
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::Identity => write!(f, "Identity"),
            Conversion::Linear { gain, offset } => f
                .debug_struct("Linear")
                .field("gain", gain)
                .field("offset", offset)
                .finish(),
            Conversion::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// A logical measurement signal.
#[derive(Clone, Debug)]
pub struct Channel {
    name: String,
    hard_port: u32,
    conversion: Conversion,
    init_commands: Vec<String>,
    logical_index: Option<usize>,
    current_value: f64,
}

impl Channel {
    /// A DC-voltage channel on `hard_port` with identity conversion.
    pub fn new(name: impl Into<String>, hard_port: u32) -> Self {
        Self::with_function(name, hard_port, &SenseFunction::default())
    }

    /// A channel whose setup commands come from `function`.
    pub fn with_function(name: impl Into<String>, hard_port: u32, function: &SenseFunction) -> Self {
        Self {
            name: name.into(),
            hard_port,
            conversion: Conversion::Identity,
            init_commands: function.init_commands(hard_port),
            logical_index: None,
            current_value: 0.0,
        }
    }

    /// Sets the unit conversion.
    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = conversion;
        self
    }

    /// Column name in the save group's CSV files.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Multimeter port address (e.g. 101).
    pub fn hard_port(&self) -> u32 {
        self.hard_port
    }

    /// Setup commands sent during channel configuration.
    pub fn init_commands(&self) -> &[String] {
        &self.init_commands
    }

    /// Position of this channel's value in a scan, once configured.
    pub fn logical_index(&self) -> Option<usize> {
        self.logical_index
    }

    /// Most recent converted reading.
    pub fn current_value(&self) -> f64 {
        self.current_value
    }

    /// Applies this channel's conversion to a raw reading.
    pub fn convert(&self, raw: f64) -> f64 {
        self.conversion.apply(raw)
    }

    pub(crate) fn assign_index(&mut self, index: usize) {
        self.logical_index = Some(index);
    }

    pub(crate) fn set_current_value(&mut self, value: f64) {
        self.current_value = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_commands() {
        let commands = SenseFunction::default().init_commands(101);
        assert_eq!(
            commands,
            vec![
                "SENS:FUNC 'VOLT',(@101)",
                "SENS:VOLT:NPLC 5,(@101)",
                "SENS:VOLT:RANG 5,(@101)",
            ]
        );
    }

    #[test]
    fn test_thermocouple_simulated_junction() {
        let function = SenseFunction::Thermocouple {
            tc_type: "K".to_string(),
            reference_junction: ReferenceJunction::default(),
            nplc: 5.0,
        };
        let commands = function.init_commands(115);
        assert_eq!(commands.len(), 6);
        assert_eq!(commands[3], "SENS:TEMP:TC:RJUN:RSEL SIM,(@115)");
        assert_eq!(commands[4], "SENS:TEMP:TC:RJUN:SIM 23,(@115)");
    }

    #[test]
    fn test_rtd_commands_target_port() {
        let commands = SenseFunction::Rtd { nplc: 1.0 }.init_commands(108);
        assert!(commands.iter().all(|c| c.ends_with("(@108)")));
        assert_eq!(commands[2], "SENS:TEMP:FRTD:TYPE PT100,(@108)");
    }

    #[test]
    fn test_conversions() {
        // Ion gauge: half a volt per decade around a 5 V offset
        let gauge = Conversion::linear(2.0, -10.0);
        assert!((gauge.apply(6.0) - 2.0).abs() < 1e-12);
        let mag = Conversion::custom(|v| v * 100.0);
        assert!((mag.apply(0.01) - 1.0).abs() < 1e-12);
        assert_eq!(Conversion::Identity.apply(-3.5), -3.5);
    }

    #[test]
    fn test_new_channel_is_unassigned() {
        let channel = Channel::new("Mag X", 101).with_conversion(Conversion::linear(100.0, 0.0));
        assert_eq!(channel.logical_index(), None);
        assert_eq!(channel.current_value(), 0.0);
        assert_eq!(channel.init_commands().len(), 3);
    }
}
