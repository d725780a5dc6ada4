//! Location streaming
//!
//! `LocationFeed` holds the process-wide latest fix; the provider replaces it
//! atomically and every streaming camera reads the same value. The
//! `LocationStreamer` turns that fix into a location frame on each push tick.

use log::debug;
use std::sync::Arc;
use tokio::sync::watch;

use crate::camera::codec::encode_location;
use crate::camera::constants::LOCATION_FRAME_LEN;
use crate::camera::types::{LocationFix, ZoneOffsets};

/// Latest-fix cell shared between the location provider and the core
#[derive(Debug, Clone)]
pub struct LocationFeed {
    tx: Arc<watch::Sender<Option<LocationFix>>>,
}

impl LocationFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the latest fix
    pub fn publish(&self, fix: LocationFix) {
        debug!("New location fix: {:.6}, {:.6}", fix.latitude, fix.longitude);
        self.tx.send_replace(Some(fix));
    }

    /// The most recent fix, if any was published
    pub fn latest(&self) -> Option<LocationFix> {
        *self.tx.borrow()
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<Option<LocationFix>> {
        self.tx.subscribe()
    }
}

impl Default for LocationFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds location frames from the latest fix
#[derive(Debug, Clone)]
pub struct LocationStreamer {
    feed: LocationFeed,
    /// Fixed zone; None follows the host's local offset
    zone: Option<ZoneOffsets>,
}

impl LocationStreamer {
    pub fn new(feed: LocationFeed, zone: Option<ZoneOffsets>) -> Self {
        Self { feed, zone }
    }

    pub fn feed(&self) -> &LocationFeed {
        &self.feed
    }

    /// Zone offsets used for the next frame
    pub fn zone(&self) -> ZoneOffsets {
        self.zone.unwrap_or_else(ZoneOffsets::local)
    }

    /// Frame for the current tick, None when there is no fix yet
    pub fn next_frame(&self) -> Option<[u8; LOCATION_FRAME_LEN]> {
        let fix = self.feed.latest()?;
        Some(encode_location(&fix, self.zone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::codec::decode_location;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_no_fix_no_frame() {
        let streamer = LocationStreamer::new(LocationFeed::new(), Some(ZoneOffsets::new(0, 0)));
        assert!(streamer.next_frame().is_none());
    }

    #[test]
    fn test_latest_fix_wins() {
        let feed = LocationFeed::new();
        let streamer = LocationStreamer::new(feed.clone(), Some(ZoneOffsets::new(540, 0)));
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();

        feed.publish(LocationFix::new(1.0, 2.0, at));
        feed.publish(LocationFix::new(35.6895, 139.6917, at));

        let frame = streamer.next_frame().unwrap();
        let decoded = decode_location(&frame).unwrap();
        assert!((decoded.latitude - 35.6895).abs() < 1e-7);
        assert_eq!(i32::from_be_bytes([frame[11], frame[12], frame[13], frame[14]]), 356_895_000);
        assert_eq!(&frame[91..95], &[0x02, 0x1C, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_subscribers_see_publishes() {
        let feed = LocationFeed::new();
        let mut rx = feed.subscribe();
        feed.publish(LocationFix::new(10.0, 20.0, Utc::now()));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().map(|f| f.latitude), Some(10.0));
    }
}
