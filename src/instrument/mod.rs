//! Instrument-side model: channels and the multimeter driver.

pub mod channel;
pub mod keithley;

pub use channel::{Channel, Conversion, ReferenceJunction, SenseFunction};
pub use keithley::Keithley2700;
