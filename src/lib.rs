//! # CanSat Gateway Library
//!
//! Ground-station gateway for CanSat LoRa telemetry.
//!
//! This library provides the receive-and-persist loop that decodes packets
//! from the radio link, attaches link quality, and keeps the latest reading in
//! a snapshot file, plus the HTTP adapter that serves that snapshot.

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod radio;
pub mod shutdown;
pub mod snapshot;
pub mod store;
pub mod web;
