//! RS-232 transport for the multimeter.

use crate::adapters::Transport;
use crate::config::InstrumentSettings;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Serial transport for RS-232 communication
///
/// This adapter wraps the serialport crate and provides async I/O
/// using Tokio's blocking task executor for synchronous serial operations.
#[derive(Clone)]
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM6")
    port_name: String,

    /// Baud rate (e.g., 9600)
    baud_rate: u32,

    /// Overall response timeout
    timeout: Duration,

    /// Appended to every command (e.g., "\n")
    command_terminator: String,

    /// Byte ending every response (e.g., b'\r')
    response_terminator: u8,

    /// The actual serial port (behind Arc<Mutex> for async access)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Create a serial transport with the Keithley defaults
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM6")
    /// * `baud_rate` - Communication speed (e.g., 9600)
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_secs(15),
            command_terminator: "\n".to_string(),
            response_terminator: b'\r',
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Build a transport from the `[instrument]` settings block.
    pub fn from_settings(settings: &InstrumentSettings) -> Self {
        let mut transport = Self::new(settings.port.clone(), settings.baud_rate);
        transport.timeout = Duration::from_millis(settings.timeout_ms);
        transport.command_terminator = settings.command_terminator.clone();
        transport.response_terminator = settings.response_terminator_byte();
        transport
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.port_name
    }

    async fn open(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.is_some() {
                return Ok(());
            }
            // Short internal timeout; the overall response timeout is enforced in read_response
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| {
                    DaqError::Connection(format!(
                        "Failed to open serial port '{}' at {} baud: {}",
                        self.port_name, self.baud_rate, e
                    ))
                })?;

            self.port = Some(Arc::new(Mutex::new(port)));
            debug!(
                "Serial port '{}' opened at {} baud",
                self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::SerialFeatureDisabled)
        }
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port.as_ref().ok_or(DaqError::SerialPortNotConnected)?;

            let command_str = format!("{}{}", command, self.command_terminator);
            let port_clone = port.clone();

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || -> AppResult<()> {
                use std::io::Write;

                let mut port_guard = port_clone.blocking_lock();
                port_guard.write_all(command_str.as_bytes())?;
                port_guard.flush()?;
                Ok(())
            })
            .await
            .map_err(|e| DaqError::Connection(format!("Serial I/O task panicked: {}", e)))??;

            debug!("Sent serial command: {}", command.trim());
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = command;
            Err(DaqError::SerialFeatureDisabled)
        }
    }

    async fn read_response(&mut self) -> AppResult<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port.as_ref().ok_or(DaqError::SerialPortNotConnected)?;

            let terminator = self.response_terminator;
            let timeout = self.timeout;
            let port_clone = port.clone();

            let response = tokio::task::spawn_blocking(move || -> AppResult<String> {
                use std::io::Read;

                let mut port_guard = port_clone.blocking_lock();
                let mut response: Vec<u8> = Vec::new();
                let mut buffer = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > timeout {
                        return Err(DaqError::SerialTimeout(timeout));
                    }

                    match port_guard.read(&mut buffer) {
                        Ok(1) => {
                            if buffer[0] == terminator {
                                break;
                            }
                            response.push(buffer[0]);
                        }
                        Ok(_) => {
                            // EOF - the device went away
                            return Err(DaqError::Connection(
                                "Unexpected EOF from serial port".to_string(),
                            ));
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            // Port timeout is shorter than our overall timeout
                            continue;
                        }
                        Err(e) => return Err(DaqError::Io(e)),
                    }
                }

                Ok(String::from_utf8_lossy(&response).trim().to_string())
            })
            .await
            .map_err(|e| DaqError::Connection(format!("Serial I/O task panicked: {}", e)))??;

            debug!("Received serial response: {}", response);
            Ok(response)
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::SerialFeatureDisabled)
        }
    }

    async fn flush_input(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port.as_ref().ok_or(DaqError::SerialPortNotConnected)?;
            let port_guard = port.lock().await;
            port_guard
                .clear(serialport::ClearBuffer::Input)
                .map_err(|e| DaqError::Connection(format!("Failed to flush input: {}", e)))
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::SerialFeatureDisabled)
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }
}
