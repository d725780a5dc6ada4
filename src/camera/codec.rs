//! Protocol codec
//!
//! Builds the fixed binary frames the camera firmware expects and classifies
//! the status of completed GATT writes. All multi-byte fields are big-endian.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::camera::constants::*;
use crate::camera::types::{LocationFix, ZoneOffsets};

/// Which characteristic a write goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteTarget {
    Lock,
    Enable,
    TimeSync,
    Location,
    Command,
}

impl WriteTarget {
    /// Characteristic UUID this target writes to
    pub fn characteristic(&self) -> Uuid {
        match self {
            WriteTarget::Lock => LOCK_CHARACTERISTIC_UUID,
            WriteTarget::Enable => ENABLE_CHARACTERISTIC_UUID,
            WriteTarget::TimeSync => TIME_CHARACTERISTIC_UUID,
            WriteTarget::Location => LOCATION_CHARACTERISTIC_UUID,
            WriteTarget::Command => COMMAND_CHARACTERISTIC_UUID,
        }
    }
}

/// Raw GATT status reported with a write completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattStatus(pub u8);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(GATT_SUCCESS);
    pub const ERROR: GattStatus = GattStatus(GATT_ERROR);
    pub const REMOTE_CONTROL_DISABLED: GattStatus = GattStatus(REMOTE_CONTROL_DISABLED_STATUS);

    pub fn is_success(&self) -> bool {
        self.0 == GATT_SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Why a write will not be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The camera refuses remote commands until remote control is enabled in its menu
    RemoteControlDisabled,

    /// Best-effort write rejected by the camera or the stack
    Rejected(GattStatus),
}

/// Classified result of a completed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    RetryableFailure(GattStatus),
    NonRetryableFailure(FailureReason),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame has {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },

    #[error("Unexpected frame header: {0:02X?}")]
    Header(Vec<u8>),

    #[error("Frame carries an invalid timestamp")]
    Timestamp,
}

/// Decoded location frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub utc_offset_minutes: i16,
    pub dst_offset_minutes: i16,
}

/// Decoded time-sync frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTimeSync {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub dst_active: bool,
    pub tz_hours: u8,
    pub tz_minutes: u8,
}

/// Lock endpoint frame
pub fn encode_lock() -> Vec<u8> {
    LOCK_PAYLOAD.to_vec()
}

/// Enable updates frame
pub fn encode_enable() -> Vec<u8> {
    ENABLE_PAYLOAD.to_vec()
}

/// Build the 13-byte time-sync frame.
///
/// The date/time fields carry the camera's local wall clock (UTC shifted by the
/// raw offset and any DST). The offset hour is folded into `24 + h` when the
/// raw offset is negative so the byte never goes below zero.
pub fn encode_time_sync(now: DateTime<Utc>, zone: ZoneOffsets) -> [u8; TIME_SYNC_FRAME_LEN] {
    let local = now
        + Duration::minutes(i64::from(zone.raw_offset_minutes) + i64::from(zone.dst_offset_minutes));

    let raw_hours = zone.raw_offset_minutes / 60;
    let tz_hours = if raw_hours < 0 { 24 + raw_hours } else { raw_hours };
    let tz_minutes = (zone.raw_offset_minutes % 60).abs();

    let mut frame = [0u8; TIME_SYNC_FRAME_LEN];
    frame[0..3].copy_from_slice(&TIME_SYNC_HEADER);
    frame[3..5].copy_from_slice(&(local.year() as u16).to_be_bytes());
    frame[5] = local.month() as u8;
    frame[6] = local.day() as u8;
    frame[7] = local.hour() as u8;
    frame[8] = local.minute() as u8;
    frame[9] = local.second() as u8;
    frame[10] = u8::from(zone.dst_active());
    frame[11] = tz_hours as u8;
    frame[12] = tz_minutes as u8;
    frame
}

/// Build the 95-byte location frame
pub fn encode_location(fix: &LocationFix, zone: ZoneOffsets) -> [u8; LOCATION_FRAME_LEN] {
    let mut frame = [0u8; LOCATION_FRAME_LEN];

    frame[0..2].copy_from_slice(&LOCATION_PAYLOAD_LEN.to_be_bytes());
    frame[2..5].copy_from_slice(&LOCATION_FRAME_TYPE);
    frame[5] = LOCATION_FLAGS;
    frame[6..11].copy_from_slice(&LOCATION_FIXED);

    let latitude = (fix.latitude * COORDINATE_SCALE).round() as i32;
    let longitude = (fix.longitude * COORDINATE_SCALE).round() as i32;
    frame[LOCATION_LATITUDE_OFFSET..LOCATION_LATITUDE_OFFSET + 4].copy_from_slice(&latitude.to_be_bytes());
    frame[LOCATION_LONGITUDE_OFFSET..LOCATION_LONGITUDE_OFFSET + 4].copy_from_slice(&longitude.to_be_bytes());

    let ts = fix.timestamp;
    let t = LOCATION_TIMESTAMP_OFFSET;
    frame[t..t + 2].copy_from_slice(&(ts.year() as u16).to_be_bytes());
    frame[t + 2] = ts.month() as u8;
    frame[t + 3] = ts.day() as u8;
    frame[t + 4] = ts.hour() as u8;
    frame[t + 5] = ts.minute() as u8;
    frame[t + 6] = ts.second() as u8;

    let utc_offset = zone.raw_offset_minutes as i16;
    let dst_offset = if zone.dst_active() { zone.dst_offset_minutes as i16 } else { 0 };
    frame[LOCATION_UTC_OFFSET_OFFSET..LOCATION_UTC_OFFSET_OFFSET + 2].copy_from_slice(&utc_offset.to_be_bytes());
    frame[LOCATION_DST_OFFSET_OFFSET..LOCATION_DST_OFFSET_OFFSET + 2].copy_from_slice(&dst_offset.to_be_bytes());

    frame
}

/// Parse a location frame back into its fields
pub fn decode_location(frame: &[u8]) -> Result<DecodedLocation, CodecError> {
    if frame.len() != LOCATION_FRAME_LEN {
        return Err(CodecError::Length { expected: LOCATION_FRAME_LEN, actual: frame.len() });
    }
    if frame[0..2] != LOCATION_PAYLOAD_LEN.to_be_bytes() || frame[2..5] != LOCATION_FRAME_TYPE {
        return Err(CodecError::Header(frame[0..6].to_vec()));
    }

    let read_i32 = |at: usize| i32::from_be_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]);
    let read_i16 = |at: usize| i16::from_be_bytes([frame[at], frame[at + 1]]);

    let t = LOCATION_TIMESTAMP_OFFSET;
    let year = u16::from_be_bytes([frame[t], frame[t + 1]]);
    let timestamp = Utc
        .with_ymd_and_hms(
            i32::from(year),
            u32::from(frame[t + 2]),
            u32::from(frame[t + 3]),
            u32::from(frame[t + 4]),
            u32::from(frame[t + 5]),
            u32::from(frame[t + 6]),
        )
        .single()
        .ok_or(CodecError::Timestamp)?;

    Ok(DecodedLocation {
        latitude: f64::from(read_i32(LOCATION_LATITUDE_OFFSET)) / COORDINATE_SCALE,
        longitude: f64::from(read_i32(LOCATION_LONGITUDE_OFFSET)) / COORDINATE_SCALE,
        timestamp,
        utc_offset_minutes: read_i16(LOCATION_UTC_OFFSET_OFFSET),
        dst_offset_minutes: read_i16(LOCATION_DST_OFFSET_OFFSET),
    })
}

/// Parse a time-sync frame back into its fields
pub fn decode_time_sync(frame: &[u8]) -> Result<DecodedTimeSync, CodecError> {
    if frame.len() != TIME_SYNC_FRAME_LEN {
        return Err(CodecError::Length { expected: TIME_SYNC_FRAME_LEN, actual: frame.len() });
    }
    if frame[0..3] != TIME_SYNC_HEADER {
        return Err(CodecError::Header(frame[0..3].to_vec()));
    }

    Ok(DecodedTimeSync {
        year: u16::from_be_bytes([frame[3], frame[4]]),
        month: frame[5],
        day: frame[6],
        hour: frame[7],
        minute: frame[8],
        second: frame[9],
        dst_active: frame[10] != 0,
        tz_hours: frame[11],
        tz_minutes: frame[12],
    })
}

/// Classify a completed write.
///
/// Handshake writes are always worth retrying. Everything else is best-effort,
/// except the command status that means remote control is off on the camera.
pub fn classify_write(target: WriteTarget, status: GattStatus) -> WriteOutcome {
    if status.is_success() {
        return WriteOutcome::Success;
    }

    match target {
        WriteTarget::Lock | WriteTarget::Enable => WriteOutcome::RetryableFailure(status),
        WriteTarget::Command if status == GattStatus::REMOTE_CONTROL_DISABLED => {
            WriteOutcome::NonRetryableFailure(FailureReason::RemoteControlDisabled)
        }
        _ => WriteOutcome::NonRetryableFailure(FailureReason::Rejected(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokyo_fix() -> LocationFix {
        LocationFix::new(
            35.6895,
            139.6917,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap(),
        )
    }

    #[test]
    fn test_handshake_frames() {
        assert_eq!(encode_lock(), vec![0x01]);
        assert_eq!(encode_enable(), vec![0x01]);
    }

    #[test]
    fn test_location_frame_layout() {
        let frame = encode_location(&tokyo_fix(), ZoneOffsets::new(540, 0));

        assert_eq!(frame.len(), 95);
        assert_eq!(&frame[0..2], &[0x00, 0x5D]);
        assert_eq!(&frame[2..6], &[0x08, 0x02, 0xFC, 0x03]);
        assert_eq!(&frame[6..11], &[0x00, 0x00, 0x10, 0x10, 0x10]);

        let latitude = i32::from_be_bytes([frame[11], frame[12], frame[13], frame[14]]);
        let longitude = i32::from_be_bytes([frame[15], frame[16], frame[17], frame[18]]);
        assert_eq!(latitude, 356_895_000);
        assert_eq!(longitude, 1_396_917_000);

        // 2024-03-01 12:30:45 UTC
        assert_eq!(&frame[19..26], &[0x07, 0xE8, 3, 1, 12, 30, 45]);

        // Reserved area stays zeroed
        assert!(frame[26..91].iter().all(|b| *b == 0));

        assert_eq!(&frame[91..95], &[0x02, 0x1C, 0x00, 0x00]);
    }

    #[test]
    fn test_location_frame_negative_coordinates_and_dst() {
        let fix = LocationFix::new(
            -33.8688,
            -70.6693,
            Utc.with_ymd_and_hms(2024, 1, 15, 3, 4, 5).unwrap(),
        );
        let frame = encode_location(&fix, ZoneOffsets::new(-240, 60));

        let decoded = decode_location(&frame).unwrap();
        assert!((decoded.latitude + 33.8688).abs() < 1e-7);
        assert!((decoded.longitude + 70.6693).abs() < 1e-7);
        assert_eq!(decoded.timestamp, fix.timestamp);
        assert_eq!(decoded.utc_offset_minutes, -240);
        assert_eq!(decoded.dst_offset_minutes, 60);
    }

    #[test]
    fn test_decode_location_rejects_bad_frames() {
        assert_eq!(
            decode_location(&[0u8; 10]),
            Err(CodecError::Length { expected: 95, actual: 10 })
        );

        let mut frame = encode_location(&tokyo_fix(), ZoneOffsets::new(540, 0));
        frame[2] = 0x09;
        assert!(matches!(decode_location(&frame), Err(CodecError::Header(_))));
    }

    #[test]
    fn test_time_sync_frame() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        let frame = encode_time_sync(now, ZoneOffsets::new(540, 0));

        assert_eq!(frame.len(), 13);
        assert_eq!(&frame[0..3], &[0x0C, 0x00, 0x00]);
        // Local wall clock: 21:30:45
        assert_eq!(&frame[3..10], &[0x07, 0xE8, 3, 1, 21, 30, 45]);
        assert_eq!(frame[10], 0);
        assert_eq!(frame[11], 9);
        assert_eq!(frame[12], 0);
    }

    #[test]
    fn test_time_sync_negative_offset_is_folded() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();
        let frame = encode_time_sync(now, ZoneOffsets::new(-5 * 60, 0));

        let decoded = decode_time_sync(&frame).unwrap();
        assert_eq!(decoded.tz_hours, 19);
        assert_eq!(decoded.tz_minutes, 0);
        // Local time rolls back to the previous day
        assert_eq!((decoded.month, decoded.day, decoded.hour), (2, 29, 21));
    }

    #[test]
    fn test_time_sync_half_hour_offset_and_dst() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let frame = encode_time_sync(now, ZoneOffsets::new(-210, 60));

        let decoded = decode_time_sync(&frame).unwrap();
        assert!(decoded.dst_active);
        assert_eq!(decoded.tz_hours, 21);
        assert_eq!(decoded.tz_minutes, 30);
        assert_eq!((decoded.hour, decoded.minute), (9, 30));
    }

    #[test]
    fn test_classify_write() {
        assert_eq!(classify_write(WriteTarget::Lock, GattStatus::SUCCESS), WriteOutcome::Success);
        assert_eq!(
            classify_write(WriteTarget::Enable, GattStatus::ERROR),
            WriteOutcome::RetryableFailure(GattStatus::ERROR)
        );
        assert_eq!(
            classify_write(WriteTarget::Command, GattStatus::REMOTE_CONTROL_DISABLED),
            WriteOutcome::NonRetryableFailure(FailureReason::RemoteControlDisabled)
        );
        assert_eq!(
            classify_write(WriteTarget::Command, GattStatus::ERROR),
            WriteOutcome::NonRetryableFailure(FailureReason::Rejected(GattStatus::ERROR))
        );
        assert_eq!(
            classify_write(WriteTarget::Location, GattStatus::REMOTE_CONTROL_DISABLED),
            WriteOutcome::NonRetryableFailure(FailureReason::Rejected(GattStatus::REMOTE_CONTROL_DISABLED))
        );
    }
}
