//! Hardware tests for emerald-core
//!
//! These need a powered Emerald Electricity Advisor in range:
//! ```text
//! EMERALD_ADDRESS="AA:BB:CC:DD:EE:FF" cargo test --package emerald-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::time::Duration;

use emerald_core::scan::{ScanOptions, find_device};
use emerald_core::{AdvisorSession, BleTransport, GattTransport};
use emerald_types::uuid::SERIAL_NUMBER;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const BLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Advisors report every 30 seconds; allow for a few missed reports.
const REPORT_TIMEOUT: Duration = Duration::from_secs(150);

fn advisor_address() -> Option<String> {
    env::var("EMERALD_ADDRESS").ok().filter(|s| !s.is_empty())
}

#[tokio::test]
#[ignore = "requires an advisor in range"]
async fn test_find_advisor() {
    let Some(address) = advisor_address() else {
        eprintln!("EMERALD_ADDRESS not set, skipping");
        return;
    };

    let options = ScanOptions::new().duration(Duration::from_secs(15));
    let (_, peripheral) = timeout(BLE_TIMEOUT, find_device(&address, &options))
        .await
        .expect("scan timed out")
        .expect("advisor not found");
    println!("Found {:?}", peripheral);
}

#[tokio::test]
#[ignore = "requires an advisor in range"]
async fn test_read_serial_number() {
    let Some(address) = advisor_address() else {
        eprintln!("EMERALD_ADDRESS not set, skipping");
        return;
    };

    let transport = BleTransport::new(address);
    timeout(BLE_TIMEOUT, transport.connect())
        .await
        .expect("connect timed out")
        .expect("connect failed");
    let serial = transport.read(SERIAL_NUMBER).await.expect("read failed");
    println!("Serial: {}", String::from_utf8_lossy(&serial));
    transport.disconnect().await.expect("disconnect failed");
}

#[tokio::test]
#[ignore = "requires an advisor in range"]
async fn test_session_receives_energy_report() {
    let Some(address) = advisor_address() else {
        eprintln!("EMERALD_ADDRESS not set, skipping");
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = AdvisorSession::new(BleTransport::new(address));
    session.register_identity_observer(|id| println!("Identified: {id}"));
    session.register_measurement_observer(move |wh| {
        let _ = tx.send(wh);
    });

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { session.run(token).await });

    let wh = timeout(REPORT_TIMEOUT, rx.recv())
        .await
        .expect("no report within timeout")
        .expect("session ended");
    println!("Energy: {wh} Wh");
    assert!(wh >= 0.0);

    cancel.cancel();
    handle.await.unwrap().expect("session failed");
}
