//! # CanSat Gateway
//!
//! Ground-station receiver for CanSat LoRa telemetry.
//!
//! This application listens on the LoRa link, stamps every packet with
//! RSSI/SNR and the local receive time, and keeps the latest one in a JSON
//! snapshot file that the `cansat-web` process serves to the browser.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration and set up logging
//!    - Open and configure the radio; any failure exits non-zero
//!
//! 2. **Main Loop**
//!    - Receive with a bounded timeout, persist each packet as the snapshot
//!    - Link faults back off and retry; bad payloads and failed writes are logged
//!
//! 3. **Graceful Shutdown**
//!    - SIGINT/SIGTERM request a drain; the current cycle finishes
//!    - Log totals and exit 0
//!
//! # Examples
//!
//! ```bash
//! cansat-gateway --config /etc/cansat/gateway.toml
//! cansat-gateway --simulate --log-level debug
//! ```
//!
//! Expected output:
//! ```text
//! INFO cansat_gateway: CanSat Gateway v0.1.0 starting...
//! INFO cansat_gateway::radio::modem: LoRa modem configured: 915.0 MHz, SF7, 125000 Hz, CR 4/5, 15 dBm, CRC on
//! INFO cansat_gateway::gateway: Listening for packets (receive timeout 1s), snapshots go to /tmp/cansat_latest_data.json
//! INFO cansat_gateway::gateway: Packet received (14 bytes), RSSI: -42 dBm, SNR: 9.5 dB
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use cansat_gateway::config::{Config, Transport};
use cansat_gateway::gateway::{Gateway, GatewaySettings};
use cansat_gateway::logging;
use cansat_gateway::radio::modem::SerialModem;
use cansat_gateway::radio::simulated::SimulatedLink;
use cansat_gateway::radio::RadioLink;
use cansat_gateway::shutdown::{self, Shutdown};
use cansat_gateway::store::SnapshotStore;

/// Idle receive windows between simulated beacon packets
const SIMULATED_BEACON_EVERY: u64 = 5;

/// CanSat LoRa ground-station gateway
#[derive(Parser, Debug)]
#[command(name = "cansat-gateway")]
#[command(about = "Receive CanSat LoRa telemetry and persist the latest snapshot")]
#[command(version)]
struct Args {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Use the simulated radio instead of the serial modem
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::load_or_default(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.simulate {
        config.radio.transport = Transport::Simulated;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let _log_guard = match logging::init(&config.logging, "cansat-gateway.log") {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("CanSat Gateway v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = match config.radio.transport {
        Transport::Serial => match SerialModem::open(&config.radio.port, config.radio.baud_rate) {
            Ok(modem) => run(modem, &config).await,
            Err(e) => Err(e.into()),
        },
        Transport::Simulated => {
            let link = SimulatedLink::new([]).with_beacon(SIMULATED_BEACON_EVERY);
            run(link, &config).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Gateway failed to start: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the gateway on `link` and run it until a termination signal
async fn run<L: RadioLink>(link: L, config: &Config) -> Result<()> {
    let store = SnapshotStore::new(&config.snapshot.path);
    let mut gateway = Gateway::new(link, store, GatewaySettings::from(&config.gateway));

    gateway
        .initialize(&config.link)
        .await
        .context("radio initialization failed")?;

    info!("LoRa gateway listening on {:.1} MHz", config.link.frequency_mhz);
    info!("Received data will be saved to: {}", config.snapshot.path);

    let (trigger, stop) = Shutdown::new();
    match shutdown::listen_for_signals(trigger) {
        Ok(_) => info!("Press Ctrl+C to exit"),
        Err(e) => warn!("Signal handlers unavailable, stop the process externally: {}", e),
    }

    gateway.run(stop).await;

    // Release the radio only after the loop has stopped
    drop(gateway.into_link());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Log sink for asserting on emitted lines
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_failed_initialize_never_announces_listening() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.snapshot.path = dir.path().join("snapshot.json").display().to_string();

        let link = SimulatedLink::new(Vec::new()).failing_configure("no radio on SPI bus");
        assert!(run(link, &config).await.is_err());

        let text = logs.text();
        assert!(text.contains("Radio initialization failed"));
        assert!(!text.contains("listening on"));
        assert!(!text.contains("will be saved to"));
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["cansat-gateway"]);
        assert!(args.config.is_none());
        assert!(args.log_level.is_none());
        assert!(!args.simulate);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "cansat-gateway",
            "--config",
            "/etc/cansat/gateway.toml",
            "--log-level",
            "debug",
            "--simulate",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/cansat/gateway.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.simulate);
    }
}
