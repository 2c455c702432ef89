//! Serial endpoint driver and the platform backends behind it.

use std::io;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use crate::config::SerialConfig;
use crate::error::{EndpointError, EndpointResult};
use crate::message::Message;
use crate::traits::{EndpointDriver, SerialBackend, SerialLine};

/// Largest chunk the async loop reads in one go
pub const READ_CHUNK_SIZE: usize = 1024;

/// An opened serial device
///
/// The line sits behind its own mutex: direct reads, writes and the async
/// loop all take turns on the device.
pub struct SerialDriver {
    name: String,
    line: Mutex<Option<Box<dyn SerialLine>>>,
}

impl SerialDriver {
    pub fn open(
        backend: &dyn SerialBackend,
        name: &str,
        config: &SerialConfig,
    ) -> EndpointResult<Self> {
        config.validate()?;
        let line = backend.open(name, config)?;

        info!(
            "Serial port {} opened at {} baud ({:?}, {:?}, {:?})",
            name, config.baud_rate, config.data_bits, config.parity, config.stop_bits
        );

        Ok(Self::from_line(name, line))
    }

    /// Wrap an already-open line
    pub fn from_line(name: &str, line: Box<dyn SerialLine>) -> Self {
        Self {
            name: name.to_string(),
            line: Mutex::new(Some(line)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write(&self, data: &[u8]) -> EndpointResult<()> {
        self.with_line(|line| line.write_all(data))?;
        debug!("Serial {}: wrote {} bytes", self.name, data.len());
        Ok(())
    }

    /// Blocking read bounded by the configured read timeout
    pub fn read(&self, max_bytes: usize) -> EndpointResult<Vec<u8>> {
        if max_bytes == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; max_bytes];
        let len = self.with_line(|line| line.read(&mut buf))?;
        buf.truncate(len);
        Ok(buf)
    }

    pub fn bytes_available(&self) -> EndpointResult<usize> {
        self.with_line(|line| line.bytes_to_read())
    }

    pub fn flush(&self, clear_input: bool, clear_output: bool) -> EndpointResult<()> {
        self.with_line(|line| line.clear(clear_input, clear_output))
    }

    fn with_line<R>(
        &self,
        f: impl FnOnce(&mut dyn SerialLine) -> EndpointResult<R>,
    ) -> EndpointResult<R> {
        let mut guard = self.line.lock();
        match guard.as_mut() {
            Some(line) => f(line.as_mut()),
            None => Err(EndpointError::TransientIo(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port closed",
            ))),
        }
    }
}

impl EndpointDriver for SerialDriver {
    fn receive_nonblocking(&self) -> EndpointResult<Message> {
        self.with_line(|line| {
            let pending = line.bytes_to_read()?;
            if pending == 0 {
                return Err(EndpointError::WouldBlock);
            }
            let mut buf = vec![0u8; pending.min(READ_CHUNK_SIZE)];
            let len = line.read(&mut buf)?;
            if len == 0 {
                return Err(EndpointError::WouldBlock);
            }
            buf.truncate(len);
            Ok(Message::serial(buf))
        })
    }

    fn close(&self) {
        if self.line.lock().take().is_some() {
            debug!("Serial port {} released", self.name);
        }
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.name)
    }
}

/// Backend for platforms without serial support
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSerial;

impl SerialBackend for UnsupportedSerial {
    fn open(&self, _name: &str, _config: &SerialConfig) -> EndpointResult<Box<dyn SerialLine>> {
        Err(EndpointError::Unsupported("serial ports"))
    }

    fn available_ports(&self) -> Vec<String> {
        Vec::new()
    }
}

/// The backend compiled for this build
pub fn default_serial_backend() -> Arc<dyn SerialBackend> {
    #[cfg(feature = "native-serial")]
    {
        Arc::new(native::NativeSerial)
    }
    #[cfg(not(feature = "native-serial"))]
    {
        Arc::new(UnsupportedSerial)
    }
}

#[cfg(feature = "native-serial")]
pub use native::NativeSerial;

#[cfg(feature = "native-serial")]
mod native {
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use log::warn;
    use serialport::{ClearBuffer, FlowControl, SerialPort};

    use crate::config::{DataBits, Parity, SerialConfig, StopBits};
    use crate::error::{EndpointError, EndpointResult};
    use crate::traits::{SerialBackend, SerialLine};

    /// Real devices through the `serialport` crate
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NativeSerial;

    impl SerialBackend for NativeSerial {
        fn open(&self, name: &str, config: &SerialConfig) -> EndpointResult<Box<dyn SerialLine>> {
            let data_bits = match config.data_bits {
                DataBits::Five => serialport::DataBits::Five,
                DataBits::Six => serialport::DataBits::Six,
                DataBits::Seven => serialport::DataBits::Seven,
                DataBits::Eight => serialport::DataBits::Eight,
            };
            let parity = match config.parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
                Parity::Mark | Parity::Space => {
                    return Err(EndpointError::device(
                        name,
                        "configuration rejected: mark/space parity unavailable",
                    ))
                }
            };
            let stop_bits = match config.stop_bits {
                StopBits::One => serialport::StopBits::One,
                StopBits::Two => serialport::StopBits::Two,
                StopBits::OnePointFive => {
                    return Err(EndpointError::device(
                        name,
                        "configuration rejected: 1.5 stop bits unavailable",
                    ))
                }
            };
            let flow_control = if config.flow_control {
                FlowControl::Hardware
            } else {
                FlowControl::None
            };

            let port = serialport::new(name, config.baud_rate)
                .data_bits(data_bits)
                .parity(parity)
                .stop_bits(stop_bits)
                .flow_control(flow_control)
                .timeout(config.read_timeout())
                .open()
                .map_err(|e| EndpointError::device(name, e))?;

            // Start from a clean line
            if let Err(e) = port.clear(ClearBuffer::All) {
                warn!("Serial port {}: initial purge failed: {}", name, e);
            }

            Ok(Box::new(NativeLine {
                port,
                read_timeout: config.read_timeout(),
                write_timeout: config.write_timeout(),
            }))
        }

        fn available_ports(&self) -> Vec<String> {
            match serialport::available_ports() {
                Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
                Err(e) => {
                    warn!("Serial port enumeration failed: {}", e);
                    Vec::new()
                }
            }
        }
    }

    struct NativeLine {
        port: Box<dyn SerialPort>,
        read_timeout: Duration,
        write_timeout: Duration,
    }

    fn transient(e: serialport::Error) -> EndpointError {
        EndpointError::TransientIo(io::Error::from(e))
    }

    impl SerialLine for NativeLine {
        fn write_all(&mut self, data: &[u8]) -> EndpointResult<()> {
            self.port.set_timeout(self.write_timeout).map_err(transient)?;
            let result = self.port.write_all(data).and_then(|()| self.port.flush());
            self.port.set_timeout(self.read_timeout).map_err(transient)?;
            result.map_err(EndpointError::TransientIo)
        }

        fn read(&mut self, buf: &mut [u8]) -> EndpointResult<usize> {
            match self.port.read(buf) {
                Ok(len) => Ok(len),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(EndpointError::TransientIo(e)),
            }
        }

        fn bytes_to_read(&mut self) -> EndpointResult<usize> {
            self.port
                .bytes_to_read()
                .map(|n| n as usize)
                .map_err(transient)
        }

        fn clear(&mut self, input: bool, output: bool) -> EndpointResult<()> {
            let which = match (input, output) {
                (true, true) => ClearBuffer::All,
                (true, false) => ClearBuffer::Input,
                (false, true) => ClearBuffer::Output,
                (false, false) => return Ok(()),
            };
            self.port.clear(which).map_err(transient)
        }
    }
}
