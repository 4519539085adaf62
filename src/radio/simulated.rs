//! # Simulated Radio Link
//!
//! A scripted [`RadioLink`] for tests and hardware-free dry runs.
//!
//! Each `receive_with_timeout` call pops one [`LinkEvent`] from the script.
//! An exhausted script behaves like a quiet channel: the call sleeps for the
//! full timeout and returns `None`, or, with [`SimulatedLink::with_beacon`],
//! emits a synthetic packet every N idle windows.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{LinkConfiguration, RadioLink};
use crate::error::{ConfigError, LinkError};

/// One scripted outcome of a receive call
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The receive window elapses with nothing heard
    Idle,
    /// A packet arrives with the given link quality
    Packet {
        data: Bytes,
        rssi: i32,
        snr: Option<f32>,
    },
    /// The hardware faults
    Fault(String),
}

impl LinkEvent {
    pub fn packet(data: impl Into<Bytes>, rssi: i32, snr: Option<f32>) -> Self {
        LinkEvent::Packet {
            data: data.into(),
            rssi,
            snr,
        }
    }
}

/// Call counters shared with the test that built the link
#[derive(Debug, Default)]
pub struct LinkCounters {
    pub configure_calls: AtomicU64,
    pub receive_calls: AtomicU64,
}

impl LinkCounters {
    pub fn configures(&self) -> u64 {
        self.configure_calls.load(Ordering::SeqCst)
    }

    pub fn receives(&self) -> u64 {
        self.receive_calls.load(Ordering::SeqCst)
    }
}

/// Scripted radio link
#[derive(Debug)]
pub struct SimulatedLink {
    script: VecDeque<LinkEvent>,
    configure_error: Option<String>,
    /// Emit a beacon packet every N idle windows once the script is empty
    beacon_every: Option<u64>,
    idle_windows: u64,
    idle_delay: Option<Duration>,
    reports_snr: bool,
    last_rssi: i32,
    last_snr: Option<f32>,
    counters: Arc<LinkCounters>,
}

impl SimulatedLink {
    pub fn new(script: impl IntoIterator<Item = LinkEvent>) -> Self {
        Self {
            script: script.into_iter().collect(),
            configure_error: None,
            beacon_every: None,
            idle_windows: 0,
            idle_delay: None,
            reports_snr: true,
            last_rssi: 0,
            last_snr: None,
            counters: Arc::new(LinkCounters::default()),
        }
    }

    /// Make `configure` fail with `reason`
    pub fn failing_configure(mut self, reason: impl Into<String>) -> Self {
        self.configure_error = Some(reason.into());
        self
    }

    /// After the script runs out, emit a beacon packet every `every` idle windows
    pub fn with_beacon(mut self, every: u64) -> Self {
        self.beacon_every = Some(every.max(1));
        self
    }

    /// Cap how long an idle receive actually sleeps
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = Some(delay);
        self
    }

    /// Model hardware that never reports SNR
    pub fn without_snr(mut self) -> Self {
        self.reports_snr = false;
        self
    }

    /// Counter handle that stays valid after the link moves into the gateway
    pub fn counters(&self) -> Arc<LinkCounters> {
        Arc::clone(&self.counters)
    }

    async fn idle(&self, timeout: Duration) {
        let delay = self.idle_delay.map_or(timeout, |cap| cap.min(timeout));
        tokio::time::sleep(delay).await;
    }

    fn beacon(&self) -> LinkEvent {
        let text = format!("BEACON,{}", self.counters.receives());
        LinkEvent::packet(text.into_bytes(), -70, Some(8.0))
    }
}

#[async_trait]
impl RadioLink for SimulatedLink {
    async fn configure(&mut self, params: &LinkConfiguration) -> Result<(), ConfigError> {
        self.counters.configure_calls.fetch_add(1, Ordering::SeqCst);
        match &self.configure_error {
            Some(reason) => Err(ConfigError::DeviceUnavailable {
                path: "simulated".to_string(),
                reason: reason.clone(),
            }),
            None => {
                tracing::debug!("Simulated link configured: {}", params);
                Ok(())
            }
        }
    }

    async fn receive_with_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>, LinkError> {
        self.counters.receive_calls.fetch_add(1, Ordering::SeqCst);

        let event = match self.script.pop_front() {
            Some(event) => event,
            None => {
                self.idle_windows += 1;
                match self.beacon_every {
                    Some(every) if self.idle_windows % every == 0 => self.beacon(),
                    _ => LinkEvent::Idle,
                }
            }
        };

        match event {
            LinkEvent::Idle => {
                self.idle(timeout).await;
                Ok(None)
            }
            LinkEvent::Packet { data, rssi, snr } => {
                self.last_rssi = rssi;
                self.last_snr = if self.reports_snr { snr } else { None };
                Ok(Some(data))
            }
            LinkEvent::Fault(reason) => Err(LinkError::Fault(reason)),
        }
    }

    fn last_rssi(&self) -> i32 {
        self.last_rssi
    }

    fn last_snr(&self) -> Option<f32> {
        self.last_snr
    }

    fn reports_snr(&self) -> bool {
        self.reports_snr
    }

    fn describe(&self) -> String {
        "simulated link".to_string()
    }
}
