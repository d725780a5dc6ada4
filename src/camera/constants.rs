//! Camera protocol constants
//!
//! This module contains all the constants needed for camera communication:
//! - BLE service & characteristic UUIDs
//! - Fixed payload bytes for the handshake and the location/time frames
//! - GATT status codes the core reacts to
//! - Default timings

use uuid::Uuid;

// ============================================================================
// BLE Service & Characteristic UUIDs
// ============================================================================

/// Location service UUID (hosts the lock/enable/location characteristics)
pub const LOCATION_SERVICE_UUID: Uuid = Uuid::from_u128(0x8000dd00_dd00_ffff_ffff_ffffffffffff);

/// Location characteristic UUID (host -> camera, 95-byte location frames)
pub const LOCATION_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000dd11_0000_1000_8000_00805f9b34fb);

/// Lock characteristic UUID (host -> camera, claims the location endpoint)
pub const LOCK_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000dd30_0000_1000_8000_00805f9b34fb);

/// Enable characteristic UUID (host -> camera, turns location updates on)
pub const ENABLE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000dd31_0000_1000_8000_00805f9b34fb);

/// Time service UUID
pub const TIME_SERVICE_UUID: Uuid = Uuid::from_u128(0x8000cc00_cc00_ffff_ffff_ffffffffffff);

/// Time characteristic UUID (host -> camera, 13-byte time-sync frames)
pub const TIME_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000cc13_0000_1000_8000_00805f9b34fb);

/// Remote control service UUID
pub const REMOTE_SERVICE_UUID: Uuid = Uuid::from_u128(0x8000ff00_ff00_ffff_ffff_ffffffffffff);

/// Remote command characteristic UUID (host -> camera, press/release codes)
pub const COMMAND_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);

// ============================================================================
// Handshake payloads
// ============================================================================

/// Lock endpoint value
pub const LOCK_PAYLOAD: [u8; 1] = [0x01];

/// Enable updates value
pub const ENABLE_PAYLOAD: [u8; 1] = [0x01];

// ============================================================================
// Time-sync frame (13 bytes)
// ============================================================================

pub const TIME_SYNC_FRAME_LEN: usize = 13;

/// Fixed header: length byte followed by two reserved bytes
pub const TIME_SYNC_HEADER: [u8; 3] = [0x0C, 0x00, 0x00];

// ============================================================================
// Location frame (95 bytes)
// ============================================================================

pub const LOCATION_FRAME_LEN: usize = 95;

/// Payload length that follows the u16 length prefix
pub const LOCATION_PAYLOAD_LEN: u16 = 0x005D;

/// Frame type bytes
pub const LOCATION_FRAME_TYPE: [u8; 3] = [0x08, 0x02, 0xFC];

/// Flag byte: timezone/DST fields present
pub const LOCATION_FLAGS: u8 = 0x03;

/// Fixed bytes preceding the coordinates
pub const LOCATION_FIXED: [u8; 5] = [0x00, 0x00, 0x10, 0x10, 0x10];

pub const LOCATION_LATITUDE_OFFSET: usize = 11;
pub const LOCATION_LONGITUDE_OFFSET: usize = 15;
pub const LOCATION_TIMESTAMP_OFFSET: usize = 19;
pub const LOCATION_UTC_OFFSET_OFFSET: usize = 91;
pub const LOCATION_DST_OFFSET_OFFSET: usize = 93;

/// Scale applied to degrees before rounding to i32
pub const COORDINATE_SCALE: f64 = 1e7;

// ============================================================================
// GATT status codes
// ============================================================================

/// Write completed
pub const GATT_SUCCESS: u8 = 0x00;

/// Generic stack failure (the status most adapters report when a write is dropped)
pub const GATT_ERROR: u8 = 0x85;

/// Status returned for command writes while "Bluetooth remote control" is off in the camera menu
pub const REMOTE_CONTROL_DISABLED_STATUS: u8 = 0x90;

// ============================================================================
// Timing & policy defaults
// ============================================================================

/// Handshake write retries per stage
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Linear backoff unit (retry n waits n x this)
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;

/// Delay before rescanning after a transport failure or an abandoned handshake
pub const DEFAULT_RESCAN_DELAY_MS: u64 = 5_000;

/// Delay before restarting a scan the scanner rejected
pub const DEFAULT_SCAN_RETRY_DELAY_MS: u64 = 10_000;

/// Recurring location push interval
pub const DEFAULT_LOCATION_INTERVAL_MS: u64 = 10_000;

/// Delay between the compensating first push and the recurring pushes
pub const DEFAULT_STREAM_START_DELAY_MS: u64 = 1_000;

/// Delay between press and release for a tapped command
pub const DEFAULT_RELEASE_DELAY_MS: u64 = 200;

/// MTU requested on the scan-triggered path
pub const DEFAULT_MTU: u16 = 517;

/// Smallest MTU every BLE link supports
pub const MIN_MTU: u16 = 23;

/// Journal ring buffer capacity
pub const DEFAULT_JOURNAL_CAPACITY: usize = 200;
