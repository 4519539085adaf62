//! # Radio Link Module
//!
//! Abstraction over the LoRa transceiver that receives CanSat telemetry.
//!
//! This module handles:
//! - The [`RadioLink`] capability the gateway loop is written against
//! - Physical-layer parameters ([`LinkConfiguration`]) applied once at startup
//! - A UART AT-command modem implementation ([`modem::SerialModem`])
//! - A scripted implementation for tests and dry runs ([`simulated::SimulatedLink`])
//!
//! No retry logic lives here. Retrying after a fault is the gateway loop's job.

pub mod modem;
pub mod port_trait;
pub mod simulated;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::{ConfigError, LinkError};

/// Capability required of the radio transceiver.
///
/// `last_rssi` and `last_snr` describe the packet returned by the most recent
/// `receive_with_timeout` call that yielded `Some`. They are only meaningful
/// until the next receive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioLink: Send {
    /// Apply physical-layer parameters. Idempotent.
    async fn configure(&mut self, params: &LinkConfiguration) -> Result<(), ConfigError>;

    /// Wait up to `timeout` for one packet.
    ///
    /// Returns `Ok(None)` when the window elapses with nothing received.
    async fn receive_with_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>, LinkError>;

    /// RSSI of the last received packet in dBm
    fn last_rssi(&self) -> i32;

    /// SNR of the last received packet in dB, if the hardware reports it
    fn last_snr(&self) -> Option<f32>;

    /// Whether this link ever reports SNR
    fn reports_snr(&self) -> bool;

    /// Human-readable identification for logs
    fn describe(&self) -> String;
}

/// LoRa spreading factor. Higher SF = longer range, lower data rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum SpreadingFactor {
    SF6 = 6,
    SF7 = 7,
    SF8 = 8,
    SF9 = 9,
    SF10 = 10,
    SF11 = 11,
    SF12 = 12,
}

impl SpreadingFactor {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SpreadingFactor {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            6 => Ok(Self::SF6),
            7 => Ok(Self::SF7),
            8 => Ok(Self::SF8),
            9 => Ok(Self::SF9),
            10 => Ok(Self::SF10),
            11 => Ok(Self::SF11),
            12 => Ok(Self::SF12),
            other => Err(format!("spreading_factor must be between 6 and 12, got {}", other)),
        }
    }
}

/// LoRa signal bandwidth.
///
/// The discriminant is the register/modem code (0-9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u32")]
pub enum Bandwidth {
    BW7_8 = 0,
    BW10_4 = 1,
    BW15_6 = 2,
    BW20_8 = 3,
    BW31_25 = 4,
    BW41_7 = 5,
    BW62_5 = 6,
    BW125 = 7,
    BW250 = 8,
    BW500 = 9,
}

/// Supported bandwidths in Hz, indexed by modem code
const BANDWIDTHS_HZ: [(u32, Bandwidth); 10] = [
    (7_800, Bandwidth::BW7_8),
    (10_400, Bandwidth::BW10_4),
    (15_600, Bandwidth::BW15_6),
    (20_800, Bandwidth::BW20_8),
    (31_250, Bandwidth::BW31_25),
    (41_700, Bandwidth::BW41_7),
    (62_500, Bandwidth::BW62_5),
    (125_000, Bandwidth::BW125),
    (250_000, Bandwidth::BW250),
    (500_000, Bandwidth::BW500),
];

impl Bandwidth {
    /// Modem code (0 = 7.8 kHz ... 9 = 500 kHz)
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn hz(self) -> u32 {
        BANDWIDTHS_HZ[self as usize].0
    }
}

impl TryFrom<u32> for Bandwidth {
    type Error = String;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        BANDWIDTHS_HZ
            .iter()
            .find(|(candidate, _)| *candidate == hz)
            .map(|(_, bw)| *bw)
            .ok_or_else(|| format!("bandwidth_hz {} is not a LoRa bandwidth", hz))
    }
}

/// LoRa forward error correction coding rate, 4/N.
///
/// Deserialized from the denominator (5-8).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum CodingRate {
    CR4_5 = 1,
    CR4_6 = 2,
    CR4_7 = 3,
    CR4_8 = 4,
}

impl CodingRate {
    /// Modem code (1 = 4/5 ... 4 = 4/8)
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn denominator(self) -> u8 {
        self as u8 + 4
    }
}

impl TryFrom<u8> for CodingRate {
    type Error = String;

    fn try_from(denominator: u8) -> Result<Self, Self::Error> {
        match denominator {
            5 => Ok(Self::CR4_5),
            6 => Ok(Self::CR4_6),
            7 => Ok(Self::CR4_7),
            8 => Ok(Self::CR4_8),
            other => Err(format!("coding_rate must be between 5 and 8 (4/5 .. 4/8), got {}", other)),
        }
    }
}

/// Physical-layer parameters applied once at startup.
///
/// Loaded from the `[link]` section of the configuration file.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct LinkConfiguration {
    /// Carrier frequency in MHz; must match the CanSat
    #[serde(default = "default_frequency_mhz")]
    pub frequency_mhz: f64,

    /// Transmit power in dBm. The serial modem accepts 0..=15.
    #[serde(default = "default_tx_power_dbm")]
    pub tx_power_dbm: i8,

    #[serde(default = "default_spreading_factor")]
    pub spreading_factor: SpreadingFactor,

    #[serde(default = "default_bandwidth", rename = "bandwidth_hz")]
    pub bandwidth: Bandwidth,

    #[serde(default = "default_coding_rate")]
    pub coding_rate: CodingRate,

    /// Payload CRC checking
    #[serde(default = "default_crc_enabled")]
    pub crc_enabled: bool,
}

fn default_frequency_mhz() -> f64 { 915.0 }
fn default_tx_power_dbm() -> i8 { 15 }
fn default_spreading_factor() -> SpreadingFactor { SpreadingFactor::SF7 }
fn default_bandwidth() -> Bandwidth { Bandwidth::BW125 }
fn default_coding_rate() -> CodingRate { CodingRate::CR4_5 }
fn default_crc_enabled() -> bool { true }

impl Default for LinkConfiguration {
    fn default() -> Self {
        Self {
            frequency_mhz: default_frequency_mhz(),
            tx_power_dbm: default_tx_power_dbm(),
            spreading_factor: default_spreading_factor(),
            bandwidth: default_bandwidth(),
            coding_rate: default_coding_rate(),
            crc_enabled: default_crc_enabled(),
        }
    }
}

impl LinkConfiguration {
    /// Carrier frequency in Hz
    pub fn frequency_hz(&self) -> u32 {
        (self.frequency_mhz * 1_000_000.0).round() as u32
    }
}

impl fmt::Display for LinkConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} MHz, SF{}, {} Hz, CR 4/{}, {} dBm, CRC {}",
            self.frequency_mhz,
            self.spreading_factor.value(),
            self.bandwidth.hz(),
            self.coding_rate.denominator(),
            self.tx_power_dbm,
            if self.crc_enabled { "on" } else { "off" }
        )
    }
}
