//! Test to verify the mock transport and the journal log output correctly

use camlink_rs::camera::codec::GattStatus;
use camlink_rs::camera::constants::LOCK_CHARACTERISTIC_UUID;
use camlink_rs::camera::types::ScanMode;
use camlink_rs::{DeviceAddress, GattTransport, Journal, MockTransport};

#[tokio::test]
async fn test_mock_transport_logs() {
    // Initialize a simple logger for testing
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();

    let transport = MockTransport::new();
    let camera = DeviceAddress::from("AA:BB:CC:DD:EE:FF");

    // These should log at info level (visible with RUST_LOG=info)
    assert!(transport.start_scan(&camera, ScanMode::LowPower).await.is_ok());
    assert!(transport.stop_scan(&camera).await.is_ok());
    assert!(transport.connect(&camera, false).await.is_ok());
    assert_eq!(
        transport.write(&camera, LOCK_CHARACTERISTIC_UUID, &[0x01]).await.unwrap(),
        GattStatus::SUCCESS
    );
    assert!(transport.disconnect(&camera).await.is_ok());
    assert_eq!(transport.ops().len(), 5);
}

#[test]
fn test_journal_logs() {
    // Initialize a simple logger for testing
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();

    let journal = Journal::new(2);
    let camera = DeviceAddress::from("AA:BB:CC:DD:EE:FF");

    // Journal lines are forwarded to the log facade as well
    journal.info(&camera, "Scanning (LowPower)");
    journal.debug(&camera, "Scanning -> Connecting");
    journal.warn(&camera, "Write Lock failed: 0x85");

    let lines = journal.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].message, "Write Lock failed: 0x85");
    assert_eq!(lines[0].level, log::Level::Warn);
}
