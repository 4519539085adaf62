//! # Serial LoRa Modem
//!
//! [`RadioLink`] implementation for a LoRa transceiver attached over UART
//! that speaks line-oriented AT commands.
//!
//! ## Command set
//!
//! | Command                              | Reply            |
//! |--------------------------------------|------------------|
//! | `AT`                                 | `+OK`            |
//! | `AT+BAND=<hz>`                       | `+OK`            |
//! | `AT+PARAMETER=<sf>,<bw>,<cr>,<pre>`  | `+OK`            |
//! | `AT+CRFOP=<dBm>`                     | `+OK`            |
//! | (any rejected command)               | `+ERR=<code>`    |
//!
//! Received packets arrive unsolicited as
//! `+RCV=<address>,<length>,<data>,<rssi>,<snr>\r\n` where `<data>` is exactly
//! `<length>` raw bytes. The data may contain commas, CR/LF or non-text bytes,
//! so frames are split using the length field rather than by line.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::port_trait::{ModemPort, TokioSerialPort};
use super::{LinkConfiguration, RadioLink};
use crate::error::{ConfigError, LinkError};

/// Default modem UART baud rate
pub const MODEM_BAUD_RATE: u32 = 115_200;

/// Default device paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/serial0", // Raspberry Pi primary UART alias
    "/dev/ttyAMA0", // PL011 UART
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// How long to wait for `+OK` after a command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// LoRa preamble length programmed with `AT+PARAMETER`
const PREAMBLE_LENGTH: u8 = 12;

/// Modem output power range in dBm
const MIN_TX_POWER_DBM: i8 = 0;
const MAX_TX_POWER_DBM: i8 = 15;

/// Maximum LoRa payload (hardware limit)
const MAX_PAYLOAD: usize = 255;

/// Longest byte run we buffer without finding a frame boundary
const MAX_FRAME_LEN: usize = 512;

const RCV_PREFIX: &[u8] = b"+RCV=";
const OK_REPLY: &str = "+OK";
const ERR_PREFIX: &str = "+ERR=";

/// A packet as reported by the modem
#[derive(Debug, Clone, PartialEq)]
struct ReceivedPacket {
    address: u16,
    data: Bytes,
    rssi: i32,
    snr: f32,
}

/// One unit split off the modem's byte stream
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    /// Plain reply or status line, without the CR/LF
    Line(String),
    Packet(ReceivedPacket),
    Malformed(String),
}

/// LoRa modem on a serial port
pub struct SerialModem<P: ModemPort = TokioSerialPort> {
    port: P,
    /// Device path (e.g., /dev/serial0)
    device_path: String,
    /// Bytes read but not yet framed
    buffer: Vec<u8>,
    last_rssi: i32,
    last_snr: Option<f32>,
}

impl<P: ModemPort> std::fmt::Debug for SerialModem<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialModem")
            .field("device_path", &self.device_path)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl SerialModem<TokioSerialPort> {
    /// Open the modem at `path`
    ///
    /// An empty path auto-detects by trying [`DEFAULT_DEVICE_PATHS`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DeviceUnavailable`] if no port could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cansat_gateway::radio::modem::{SerialModem, MODEM_BAUD_RATE};
    ///
    /// let modem = SerialModem::open("/dev/serial0", MODEM_BAUD_RATE)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ConfigError> {
        if path.is_empty() {
            Self::open_with_paths(DEFAULT_DEVICE_PATHS, baud_rate)
        } else {
            Self::open_with_paths(&[path], baud_rate)
        }
    }

    /// Open the first modem that responds among `paths`
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self, ConfigError> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened LoRa modem at {} ({} baud)", path, baud_rate);
                    return Ok(Self::with_port(TokioSerialPort::new(port), *path));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(ConfigError::DeviceUnavailable {
            path: paths.join(", "),
            reason: "no serial port could be opened".to_string(),
        })
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream, ConfigError> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ConfigError::DeviceUnavailable {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

impl<P: ModemPort> SerialModem<P> {
    /// Wrap an already-open port
    pub fn with_port(port: P, device_path: impl Into<String>) -> Self {
        Self {
            port,
            device_path: device_path.into(),
            buffer: Vec::with_capacity(MAX_FRAME_LEN),
            last_rssi: 0,
            last_snr: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Send one AT command and wait for its `+OK`
    async fn command(&mut self, command: &str) -> Result<(), ConfigError> {
        debug!("-> {}", command);
        let mut line = command.as_bytes().to_vec();
        line.extend_from_slice(b"\r\n");
        self.port.write_all(&line).await?;
        self.port.flush().await?;

        let deadline = Instant::now() + COMMAND_TIMEOUT;
        loop {
            match self.next_frame(deadline).await {
                Ok(Some(Frame::Line(reply))) if reply == OK_REPLY => {
                    debug!("<- {}", reply);
                    return Ok(());
                }
                Ok(Some(Frame::Line(reply))) if reply.starts_with(ERR_PREFIX) => {
                    return Err(ConfigError::Rejected {
                        command: command.to_string(),
                        code: reply[ERR_PREFIX.len()..].to_string(),
                    });
                }
                Ok(Some(other)) => debug!("Ignoring modem output while configuring: {:?}", other),
                Ok(None) => {
                    return Err(ConfigError::NoResponse {
                        command: command.to_string(),
                    })
                }
                Err(LinkError::Transport(e)) => return Err(ConfigError::Io(e)),
                Err(e) => {
                    return Err(ConfigError::DeviceUnavailable {
                        path: self.device_path.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Read until one frame is available or `deadline` passes
    ///
    /// `Ok(None)` means the deadline passed.
    async fn next_frame(&mut self, deadline: Instant) -> Result<Option<Frame>, LinkError> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }

            match tokio::time::timeout_at(deadline, self.port.read(&mut chunk)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(0)) => return Err(LinkError::Closed),
                Ok(Ok(n)) => self.buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(LinkError::Transport(e)),
            }
        }
    }

    /// Split one frame off the front of the buffer, if complete
    fn take_frame(&mut self) -> Option<Frame> {
        let leading = self
            .buffer
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        self.buffer.drain(..leading);

        if self.buffer.is_empty() {
            return None;
        }

        match parse_frame(&self.buffer) {
            Some((frame, consumed)) => {
                self.buffer.drain(..consumed);
                Some(frame)
            }
            None if self.buffer.len() > MAX_FRAME_LEN => {
                let dropped = self.buffer.len();
                self.buffer.clear();
                Some(Frame::Malformed(format!(
                    "no frame boundary in {} buffered bytes",
                    dropped
                )))
            }
            None => None,
        }
    }
}

#[async_trait]
impl<P: ModemPort> RadioLink for SerialModem<P> {
    async fn configure(&mut self, params: &LinkConfiguration) -> Result<(), ConfigError> {
        if !params.crc_enabled {
            return Err(ConfigError::Unsupported(
                "this modem always checks payload CRC; crc_enabled = false cannot be applied"
                    .to_string(),
            ));
        }

        self.command("AT").await?;
        self.command(&format!("AT+BAND={}", params.frequency_hz())).await?;
        self.command(&format!(
            "AT+PARAMETER={},{},{},{}",
            params.spreading_factor.value(),
            params.bandwidth.code(),
            params.coding_rate.code(),
            PREAMBLE_LENGTH
        ))
        .await?;

        let power = params.tx_power_dbm.clamp(MIN_TX_POWER_DBM, MAX_TX_POWER_DBM);
        if power != params.tx_power_dbm {
            warn!(
                "tx_power_dbm {} outside modem range {}..={}, using {}",
                params.tx_power_dbm, MIN_TX_POWER_DBM, MAX_TX_POWER_DBM, power
            );
        }
        self.command(&format!("AT+CRFOP={}", power)).await?;

        info!("LoRa modem configured: {}", params);
        Ok(())
    }

    async fn receive_with_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.next_frame(deadline).await? {
                None => return Ok(None),
                Some(Frame::Packet(packet)) => {
                    debug!(
                        "Packet from address {} ({} bytes)",
                        packet.address,
                        packet.data.len()
                    );
                    self.last_rssi = packet.rssi;
                    self.last_snr = Some(packet.snr);
                    return Ok(Some(packet.data));
                }
                Some(Frame::Line(line)) => debug!("Ignoring modem line: {}", line),
                Some(Frame::Malformed(reason)) => return Err(LinkError::Malformed(reason)),
            }
        }
    }

    fn last_rssi(&self) -> i32 {
        self.last_rssi
    }

    fn last_snr(&self) -> Option<f32> {
        self.last_snr
    }

    fn reports_snr(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("LoRa modem at {}", self.device_path)
    }
}

/// Position of the first CR/LF at or after `from`
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| i + from)
}

/// Position of the first CR/LF at or after `from` that ends the buffer or is
/// followed by the `+` of the next modem line
fn find_frame_boundary(buf: &[u8], from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(end) = find_crlf(buf, at) {
        match buf.get(end + 2) {
            None | Some(b'+') => return Some(end),
            Some(_) => at = end + 2,
        }
    }
    None
}

fn parse_field<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Split one frame off the front of `buf`
///
/// # Returns
///
/// * `Some((frame, consumed))` - a complete frame and how many bytes it used
/// * `None` - more bytes are needed
fn parse_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    if buf.starts_with(RCV_PREFIX) {
        return parse_rcv(buf);
    }

    let end = find_crlf(buf, 0)?;
    let line = String::from_utf8_lossy(&buf[..end]).into_owned();
    Some((Frame::Line(line), end + 2))
}

fn parse_rcv(buf: &[u8]) -> Option<(Frame, usize)> {
    // Malformed frames are only reported once their line has ended, so the
    // stream resynchronises on the next CR/LF.
    let malformed = |from: usize, reason: &str| {
        find_crlf(buf, from).map(|end| (Frame::Malformed(reason.to_string()), end + 2))
    };

    let header_start = RCV_PREFIX.len();
    let Some(addr_len) = buf[header_start..].iter().position(|&b| b == b',') else {
        return malformed(0, "missing address field");
    };
    let Some(address) = parse_field::<u16>(&buf[header_start..header_start + addr_len]) else {
        return malformed(0, "invalid address field");
    };

    let len_start = header_start + addr_len + 1;
    let Some(len_len) = buf[len_start..].iter().position(|&b| b == b',') else {
        return malformed(0, "missing length field");
    };
    let Some(length) = parse_field::<usize>(&buf[len_start..len_start + len_len]) else {
        return malformed(0, "invalid length field");
    };
    if length > MAX_PAYLOAD {
        return malformed(0, "length field exceeds maximum LoRa payload");
    }

    let data_start = len_start + len_len + 1;
    let data_end = data_start + length;
    if buf.len() <= data_end {
        return None;
    }
    if buf[data_end] != b',' {
        // The length field lied, so `data_end` may sit inside the next frame.
        // Drop only up to the first line break that starts a new frame.
        return find_frame_boundary(buf, data_start).map(|end| {
            (
                Frame::Malformed("payload does not match length field".to_string()),
                end + 2,
            )
        });
    }

    let end = find_crlf(buf, data_end)?;
    let trailer = &buf[data_end + 1..end];
    let mut fields = trailer.split(|&b| b == b',');
    let rssi = fields.next().and_then(parse_field::<i32>);
    let snr = fields.next().and_then(parse_field::<f32>);

    match (rssi, snr, fields.next()) {
        (Some(rssi), Some(snr), None) => Some((
            Frame::Packet(ReceivedPacket {
                address,
                data: Bytes::copy_from_slice(&buf[data_start..data_end]),
                rssi,
                snr,
            }),
            end + 2,
        )),
        _ => Some((
            Frame::Malformed("invalid rssi/snr trailer".to_string()),
            end + 2,
        )),
    }
}
