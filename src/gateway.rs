//! # Gateway Loop
//!
//! Receive-and-persist loop that turns radio packets into the latest
//! telemetry snapshot.
//!
//! ## States
//!
//! ```text
//! Initializing -> Listening -> (Decoding -> Persisting -> Listening)* -> Draining -> Stopped
//!       |
//!       +-- configure failed --> Stopped
//! ```
//!
//! ## Fault triage
//!
//! | Outcome of a cycle        | Response                                   |
//! |---------------------------|--------------------------------------------|
//! | receive window elapsed    | loop again, trace only                     |
//! | payload is not text       | warn, persist raw bytes anyway             |
//! | snapshot write failed     | error, previous snapshot stays in place    |
//! | link fault                | warn, back off, loop again                 |
//! | shutdown requested        | finish the current cycle, drain, stop      |
//!
//! Only a failed `initialize` ends the gateway without a shutdown request.

use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::config::GatewayConfig;
use crate::error::{ConfigError, GatewayError, Result};
use crate::radio::{LinkConfiguration, RadioLink};
use crate::snapshot::{encode_hex, TelemetrySnapshot};
use crate::store::SnapshotStore;

/// Source of gateway-local receive times
pub type Clock = fn() -> NaiveDateTime;

/// Current local wall-clock time
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Lifecycle state of the gateway loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Initializing,
    Listening,
    Decoding,
    Persisting,
    Draining,
    Stopped,
}

/// Loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Bound on each receive call
    pub receive_timeout: Duration,
    /// Pause after a link fault
    pub link_fault_backoff: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(1),
            link_fault_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&GatewayConfig> for GatewaySettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            receive_timeout: config.receive_timeout(),
            link_fault_backoff: config.link_fault_backoff(),
        }
    }
}

/// What one receive cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing arrived within the receive window
    Idle,
    /// A packet was stored; `decoded` is false when it was not text
    Persisted { decoded: bool },
    /// A packet arrived but the snapshot write failed
    PersistFailed { decoded: bool },
    /// The link faulted
    LinkFault,
}

/// Counters over the lifetime of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub cycles: u64,
    pub idle_timeouts: u64,
    pub packets: u64,
    pub undecoded_packets: u64,
    pub snapshot_writes: u64,
    pub write_failures: u64,
    pub link_faults: u64,
}

/// Ground-station receive loop
///
/// Owns the radio link for its whole lifetime.
pub struct Gateway<L: RadioLink> {
    link: L,
    store: SnapshotStore,
    settings: GatewaySettings,
    state: GatewayState,
    stats: GatewayStats,
    clock: Clock,
}

impl<L: RadioLink> std::fmt::Debug for Gateway<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("link", &self.link.describe())
            .field("store", &self.store.path())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<L: RadioLink> Gateway<L> {
    pub fn new(link: L, store: SnapshotStore, settings: GatewaySettings) -> Self {
        Self {
            link,
            store,
            settings,
            state: GatewayState::Initializing,
            stats: GatewayStats::default(),
            clock: local_now,
        }
    }

    /// Replace the receive-time source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Release the radio link
    pub fn into_link(self) -> L {
        self.link
    }

    fn transition(&mut self, next: GatewayState) {
        debug!("Gateway state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Apply link parameters and start listening
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the radio cannot be configured.
    /// The gateway is then `Stopped` and must not be run.
    pub async fn initialize(&mut self, params: &LinkConfiguration) -> Result<()> {
        if self.state != GatewayState::Initializing {
            return Err(ConfigError::Invalid(format!(
                "gateway cannot be initialized from state {:?}",
                self.state
            ))
            .into());
        }

        info!("Configuring {}: {}", self.link.describe(), params);

        match self.link.configure(params).await {
            Ok(()) => {
                if !self.link.reports_snr() {
                    info!("Link does not report SNR; snapshots will carry snr = null");
                }
                self.transition(GatewayState::Listening);
                Ok(())
            }
            Err(e) => {
                let err = GatewayError::from(e);
                error!(class = err.class(), "Radio initialization failed: {}", err);
                self.transition(GatewayState::Stopped);
                Err(err)
            }
        }
    }

    /// Run one receive cycle
    ///
    /// Never fails: every fault is classified, logged and folded into the
    /// returned outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;

        match self.link.receive_with_timeout(self.settings.receive_timeout).await {
            Ok(None) => {
                self.stats.idle_timeouts += 1;
                trace!("Receive window elapsed with no packet");
                CycleOutcome::Idle
            }
            Ok(Some(packet)) => {
                // Link quality is only valid until the next receive
                let rssi = self.link.last_rssi();
                let snr = self.link.last_snr();
                self.handle_packet(&packet, rssi, snr)
            }
            Err(e) => {
                self.stats.link_faults += 1;
                let err = GatewayError::from(e);
                warn!(class = err.class(), "Radio receive failed: {}", err);
                CycleOutcome::LinkFault
            }
        }
    }

    fn handle_packet(&mut self, packet: &[u8], rssi: i32, snr: Option<f32>) -> CycleOutcome {
        self.stats.packets += 1;
        self.transition(GatewayState::Decoding);

        match snr {
            Some(snr) => info!("Packet received ({} bytes), RSSI: {} dBm, SNR: {} dB", packet.len(), rssi, snr),
            None => info!("Packet received ({} bytes), RSSI: {} dBm", packet.len(), rssi),
        }

        let snapshot = TelemetrySnapshot::new(packet, rssi, snr, (self.clock)());

        let decoded = match snapshot.payload_text() {
            Ok(text) => {
                info!("Payload (text): {}", text);
                true
            }
            Err(e) => {
                self.stats.undecoded_packets += 1;
                let err = GatewayError::from(e);
                warn!(class = err.class(), "{}; storing raw bytes {}", err, encode_hex(packet));
                false
            }
        };

        self.transition(GatewayState::Persisting);
        let outcome = match self.store.write(&snapshot) {
            Ok(()) => {
                self.stats.snapshot_writes += 1;
                debug!("Snapshot saved to {}", self.store.path().display());
                CycleOutcome::Persisted { decoded }
            }
            Err(e) => {
                self.stats.write_failures += 1;
                let err = GatewayError::from(e);
                error!(class = err.class(), "Failed to persist snapshot: {}", err);
                CycleOutcome::PersistFailed { decoded }
            }
        };

        self.transition(GatewayState::Listening);
        outcome
    }

    /// Run cycles until shutdown is requested, then drain and stop
    ///
    /// The flag is checked between cycles, so a receive already in flight
    /// completes (bounded by the receive timeout) and its packet, if any, is
    /// persisted before the loop exits.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> GatewayStats {
        if self.state != GatewayState::Listening {
            warn!("Gateway run requested in state {:?}; not listening", self.state);
            return self.stats;
        }

        info!(
            "Listening for packets (receive timeout {:?}), snapshots go to {}",
            self.settings.receive_timeout,
            self.store.path().display()
        );

        while !*shutdown.borrow() {
            if self.run_cycle().await == CycleOutcome::LinkFault {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.link_fault_backoff) => {}
                    _ = stop_requested(&mut shutdown) => {}
                }
            }
        }

        info!("Shutdown requested, draining");
        self.transition(GatewayState::Draining);
        self.transition(GatewayState::Stopped);

        let stats = self.stats;
        info!(
            cycles = stats.cycles,
            packets = stats.packets,
            undecoded = stats.undecoded_packets,
            writes = stats.snapshot_writes,
            write_failures = stats.write_failures,
            link_faults = stats.link_faults,
            "Receiver stopped"
        );
        stats
    }
}

/// Resolves when the flag is set; never resolves if the sender is gone
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::radio::MockRadioLink;
    use bytes::Bytes;
    use chrono::NaiveDate;
    use mockall::Sequence;
    use tempfile::TempDir;

    fn fixed_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(14, 3, 7)
            .unwrap()
    }

    fn fast_settings() -> GatewaySettings {
        GatewaySettings {
            receive_timeout: Duration::from_millis(10),
            link_fault_backoff: Duration::from_millis(5),
        }
    }

    fn gateway(link: MockRadioLink, dir: &TempDir) -> Gateway<MockRadioLink> {
        let store = SnapshotStore::new(dir.path().join("latest.json"));
        Gateway::new(link, store, fast_settings()).with_clock(fixed_clock)
    }

    fn listening_mock() -> MockRadioLink {
        let mut link = MockRadioLink::new();
        link.expect_describe().return_const("mock link".to_string());
        link.expect_configure().returning(|_| Ok(()));
        link.expect_reports_snr().return_const(true);
        link
    }

    #[tokio::test]
    async fn test_configure_failure_stops_without_listening() {
        let dir = TempDir::new().unwrap();
        let mut link = MockRadioLink::new();
        link.expect_describe().return_const("mock link".to_string());
        link.expect_configure()
            .times(1)
            .returning(|_| Err(ConfigError::NoResponse { command: "AT".into() }));
        link.expect_receive_with_timeout().never();

        let mut gw = gateway(link, &dir);
        let err = gw.initialize(&LinkConfiguration::default()).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(gw.state(), GatewayState::Stopped);

        // A stopped gateway refuses to run
        let (_tx, rx) = watch::channel(false);
        let stats = gw.run(rx).await;
        assert_eq!(stats.cycles, 0);
    }

    /// In-memory sink for a test-local subscriber
    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_state_transitions_logged_at_debug() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = TempDir::new().unwrap();
        let mut gw = gateway(listening_mock(), &dir);
        gw.initialize(&LinkConfiguration::default()).await.unwrap();

        let text = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
        assert!(text.contains("Gateway state Initializing -> Listening"), "{}", text);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut gw = gateway(listening_mock(), &dir);

        gw.initialize(&LinkConfiguration::default()).await.unwrap();
        assert_eq!(gw.state(), GatewayState::Listening);
        assert!(gw.initialize(&LinkConfiguration::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_link_quality_read_right_after_receive() {
        let dir = TempDir::new().unwrap();
        let mut seq = Sequence::new();
        let mut link = listening_mock();

        link.expect_receive_with_timeout()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(Bytes::from_static(&[0x48, 0x69]))));
        link.expect_last_rssi()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(-42);
        link.expect_last_snr()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(Some(9.5f32));

        let mut gw = gateway(link, &dir);
        gw.initialize(&LinkConfiguration::default()).await.unwrap();

        let outcome = gw.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Persisted { decoded: true });

        let on_disk = std::fs::read_to_string(dir.path().join("latest.json")).unwrap();
        assert_eq!(
            on_disk,
            r#"{"payload":"4869","rssi":-42,"snr":9.5,"timestamp":"2026-10-19 14:03:07"}"#
        );
    }

    #[tokio::test]
    async fn test_receive_timeout_passed_to_link() {
        let dir = TempDir::new().unwrap();
        let mut link = listening_mock();
        link.expect_receive_with_timeout()
            .withf(|timeout| *timeout == Duration::from_millis(10))
            .times(1)
            .returning(|_| Ok(None));

        let mut gw = gateway(link, &dir);
        gw.initialize(&LinkConfiguration::default()).await.unwrap();

        assert_eq!(gw.run_cycle().await, CycleOutcome::Idle);
        assert!(!dir.path().join("latest.json").exists());
    }

    #[tokio::test]
    async fn test_non_text_payload_is_persisted_raw() {
        let dir = TempDir::new().unwrap();
        let mut link = listening_mock();
        link.expect_receive_with_timeout()
            .returning(|_| Ok(Some(Bytes::from_static(&[0xCA, 0xFE, 0x00, 0x42]))));
        link.expect_last_rssi().return_const(-97);
        link.expect_last_snr().return_const(None::<f32>);

        let mut gw = gateway(link, &dir);
        gw.initialize(&LinkConfiguration::default()).await.unwrap();

        assert_eq!(gw.run_cycle().await, CycleOutcome::Persisted { decoded: false });
        assert_eq!(gw.stats().undecoded_packets, 1);

        let stored = gw.store().read().unwrap().unwrap();
        assert_eq!(stored.payload, vec![0xCA, 0xFE, 0x00, 0x42]);
        assert_eq!(stored.snr, None);
        assert_eq!(stored.rssi, -97);
    }

    #[tokio::test]
    async fn test_link_fault_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut seq = Sequence::new();
        let mut link = listening_mock();
        link.expect_receive_with_timeout()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LinkError::Fault("SPI contention".into())));
        link.expect_receive_with_timeout()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(Bytes::from_static(b"ok"))));
        link.expect_last_rssi().return_const(-50);
        link.expect_last_snr().return_const(Some(3.0f32));

        let mut gw = gateway(link, &dir);
        gw.initialize(&LinkConfiguration::default()).await.unwrap();

        assert_eq!(gw.run_cycle().await, CycleOutcome::LinkFault);
        assert_eq!(gw.state(), GatewayState::Listening);
        assert_eq!(gw.run_cycle().await, CycleOutcome::Persisted { decoded: true });
        assert_eq!(gw.stats().link_faults, 1);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_listening() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut link = listening_mock();
        link.expect_receive_with_timeout()
            .returning(|_| Ok(Some(Bytes::from_static(b"temp:25.5"))));
        link.expect_last_rssi().return_const(-60);
        link.expect_last_snr().return_const(Some(7.25f32));

        let store = SnapshotStore::new(blocker.join("latest.json"));
        let mut gw = Gateway::new(link, store, fast_settings()).with_clock(fixed_clock);
        gw.initialize(&LinkConfiguration::default()).await.unwrap();

        assert_eq!(gw.run_cycle().await, CycleOutcome::PersistFailed { decoded: true });
        assert_eq!(gw.run_cycle().await, CycleOutcome::PersistFailed { decoded: true });
        assert_eq!(gw.state(), GatewayState::Listening);
        assert_eq!(gw.stats().write_failures, 2);
    }

    #[tokio::test]
    async fn test_run_exits_immediately_when_already_requested() {
        let dir = TempDir::new().unwrap();
        let mut link = listening_mock();
        link.expect_receive_with_timeout().never();

        let mut gw = gateway(link, &dir);
        gw.initialize(&LinkConfiguration::default()).await.unwrap();

        let (_tx, rx) = watch::channel(true);
        let stats = gw.run(rx).await;

        assert_eq!(stats.cycles, 0);
        assert_eq!(gw.state(), GatewayState::Stopped);
    }

    #[tokio::test]
    async fn test_backoff_interrupted_by_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut link = listening_mock();
        link.expect_receive_with_timeout()
            .times(1)
            .returning(|_| Err(LinkError::Closed));

        let store = SnapshotStore::new(dir.path().join("latest.json"));
        let settings = GatewaySettings {
            receive_timeout: Duration::from_millis(10),
            link_fault_backoff: Duration::from_secs(30),
        };
        let mut gw = Gateway::new(link, store, settings);
        gw.initialize(&LinkConfiguration::default()).await.unwrap();

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(true);
        });

        let stats = tokio::time::timeout(Duration::from_secs(5), gw.run(rx))
            .await
            .expect("drain should not wait out the full backoff");
        assert_eq!(stats.link_faults, 1);
        assert_eq!(gw.state(), GatewayState::Stopped);
    }

    #[test]
    fn test_settings_from_config() {
        let config = GatewayConfig {
            receive_timeout_ms: 10_000,
            link_fault_backoff_ms: 2_000,
        };
        let settings = GatewaySettings::from(&config);
        assert_eq!(settings.receive_timeout, Duration::from_secs(10));
        assert_eq!(settings.link_fault_backoff, Duration::from_secs(2));
    }
}
