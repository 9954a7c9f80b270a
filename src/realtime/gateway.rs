//! Double-buffered access to the live realtime store.
//!
//! Two slots hold at most one parsed store each; an atomic tag names the
//! slot readers may use. The refresher only ever writes the slot the tag
//! does not point at, then flips the tag, so a request that snapshotted the
//! active store keeps a coherent view for its whole lifetime and the read
//! path takes no lock beyond an uncontended Arc clone.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::schedule::ScheduleStore;

use super::store::RealtimeStore;
use super::{DateMatch, RealtimeError};

/// Largest realtime payload accepted (50 MB).
const MAX_PROTOBUF_SIZE: usize = 50 * 1024 * 1024;

/// With no realtime-consuming request for this long, fetching is paused
/// until the next one arrives.
const IDLE_AFTER_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSide {
    None,
    A,
    B,
    Idle,
}

impl ActiveSide {
    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::A,
            2 => Self::B,
            3 => Self::Idle,
            _ => Self::None,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::A => 1,
            Self::B => 2,
            Self::Idle => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::Idle => "IDLE",
            Self::None => "NONE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    /// Filesystem path or http(s) URL; empty disables realtime entirely.
    pub feed_location: String,
    pub update_interval_secs: u64,
    pub date_match: DateMatch,
    pub loosen_stop_seq: bool,
    pub all_skipped_cancelled: bool,
}

enum FeedSource {
    Remote(String),
    LocalFile(PathBuf),
}

pub struct RealtimeGateway {
    slots: [RwLock<Option<Arc<RealtimeStore>>>; 2],
    active: AtomicU8,
    last_transaction: Mutex<DateTime<Utc>>,
    next_fetch: Mutex<Option<DateTime<Utc>>>,
    source: Option<FeedSource>,
    options: RealtimeOptions,
    client: reqwest::Client,
}

impl RealtimeGateway {
    pub fn new(options: RealtimeOptions) -> Self {
        let source = if options.feed_location.is_empty() {
            None
        } else if options.feed_location.starts_with("http://")
            || options.feed_location.starts_with("https://")
        {
            Some(FeedSource::Remote(options.feed_location.clone()))
        } else {
            Some(FeedSource::LocalFile(PathBuf::from(&options.feed_location)))
        };
        Self {
            slots: [RwLock::new(None), RwLock::new(None)],
            active: AtomicU8::new(ActiveSide::None.tag()),
            last_transaction: Mutex::new(Utc::now()),
            next_fetch: Mutex::new(None),
            source,
            options,
            client: reqwest::Client::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.source.is_some()
    }

    pub fn options(&self) -> &RealtimeOptions {
        &self.options
    }

    pub fn active_side(&self) -> ActiveSide {
        ActiveSide::from_tag(self.active.load(Ordering::Acquire))
    }

    /// The store a request works against for its whole lifetime.
    pub fn snapshot(&self) -> Option<Arc<RealtimeStore>> {
        let slot = match self.active_side() {
            ActiveSide::A => 0,
            ActiveSide::B => 1,
            ActiveSide::None | ActiveSide::Idle => return None,
        };
        self.slots[slot].read().ok().and_then(|guard| guard.clone())
    }

    /// Record that a realtime-consuming request arrived; keeps the
    /// refresher from idling out.
    pub fn request_entered(&self) {
        if let Ok(mut guard) = self.last_transaction.lock() {
            *guard = Utc::now();
        }
    }

    pub fn most_recent_transaction(&self) -> DateTime<Utc> {
        self.last_transaction.lock().map(|g| *g).unwrap_or_else(|_| Utc::now())
    }

    pub fn seconds_to_next_fetch(&self) -> i64 {
        self.next_fetch
            .lock()
            .ok()
            .and_then(|g| *g)
            .map(|at| (at - Utc::now()).num_seconds())
            .unwrap_or(0)
    }

    /// Run the periodic refresh until the process exits.
    pub async fn run(self: Arc<Self>, schedule: Arc<ScheduleStore>) {
        if self.source.is_none() {
            return;
        }
        let period = std::time::Duration::from_secs(self.options.update_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let idle_for = (Utc::now() - self.most_recent_transaction()).num_seconds();
            let idle_cutoff = IDLE_AFTER_SECS.max(self.options.update_interval_secs as i64 * 5);
            if idle_for > idle_cutoff {
                if self.active_side() != ActiveSide::Idle {
                    info!(idle_for, "No recent realtime transactions, idling refresh loop");
                    self.set_active(ActiveSide::Idle);
                }
                self.note_next_fetch(period);
                continue;
            }
            self.refresh(&schedule).await;
            self.note_next_fetch(period);
        }
    }

    /// One fetch-build-flip cycle.
    pub async fn refresh(&self, schedule: &ScheduleStore) {
        let Some(source) = &self.source else {
            return;
        };
        let started = std::time::Instant::now();
        let payload = match source {
            FeedSource::Remote(url) => self.download(url).await,
            FeedSource::LocalFile(path) => tokio::fs::read(path).await.map_err(RealtimeError::from),
        };
        let download_ms = started.elapsed().as_millis() as i64;
        self.integrate(payload, download_ms, matches!(source, FeedSource::LocalFile(_)), schedule);
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RealtimeError> {
        let response = self
            .client
            .get(url)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RealtimeError::NetworkMessage(format!(
                "realtime feed HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        if bytes.len() > MAX_PROTOBUF_SIZE {
            return Err(RealtimeError::NetworkMessage(format!(
                "realtime payload too large: {} bytes (max {} bytes)",
                bytes.len(),
                MAX_PROTOBUF_SIZE
            )));
        }
        if bytes.is_empty() {
            return Err(RealtimeError::EmptyPayload);
        }
        Ok(bytes.to_vec())
    }

    /// Build a store from a fetched payload in the inactive slot, then flip.
    /// Failures park the tag at None, except in local-file mode where the
    /// last good store keeps serving.
    pub(crate) fn integrate(
        &self,
        payload: Result<Vec<u8>, RealtimeError>,
        download_ms: i64,
        local_mode: bool,
        schedule: &ScheduleStore,
    ) {
        let bytes = match payload {
            Ok(bytes) => bytes,
            Err(err) => {
                if local_mode {
                    warn!(error = %err, "Realtime file re-read failed, keeping last good buffer");
                } else {
                    warn!(error = %err, "Realtime fetch failed, parking active side at NONE");
                    self.set_active(ActiveSide::None);
                }
                return;
            }
        };

        match RealtimeStore::from_bytes(
            &bytes,
            self.options.date_match,
            self.options.loosen_stop_seq,
            self.options.all_skipped_cancelled,
            schedule,
        ) {
            Ok(mut store) => {
                store.download_ms = download_ms;
                let (slot, next) = match self.active_side() {
                    ActiveSide::A => (1, ActiveSide::B),
                    _ => (0, ActiveSide::A),
                };
                debug!(
                    entities = store.entity_count(),
                    download_ms,
                    integration_ms = store.integration_ms,
                    side = next.label(),
                    "Realtime buffer refreshed"
                );
                if let Ok(mut guard) = self.slots[slot].write() {
                    *guard = Some(Arc::new(store));
                }
                self.set_active(next);
            }
            Err(err) => {
                warn!(error = %err, "Realtime payload failed to integrate, parking active side at NONE");
                self.set_active(ActiveSide::None);
            }
        }
    }

    fn set_active(&self, side: ActiveSide) {
        self.active.store(side.tag(), Ordering::Release);
    }

    fn note_next_fetch(&self, period: std::time::Duration) {
        let period = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
        if let Ok(mut guard) = self.next_fetch.lock() {
            *guard = Some(Utc::now() + period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testutil;
    use chrono_tz::America::New_York;
    use gtfs_realtime::{FeedHeader, FeedMessage};
    use prost::Message;

    fn options(location: &str) -> RealtimeOptions {
        RealtimeOptions {
            feed_location: location.to_string(),
            update_interval_secs: 30,
            date_match: DateMatch::NoMatching,
            loosen_stop_seq: false,
            all_skipped_cancelled: false,
        }
    }

    fn empty_feed_bytes(timestamp: u64) -> Vec<u8> {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                incrementality: None,
                timestamp: Some(timestamp),
                feed_version: None,
            },
            entity: vec![],
        }
        .encode_to_vec()
    }

    #[test]
    fn disabled_without_location() {
        let gateway = RealtimeGateway::new(options(""));
        assert!(!gateway.enabled());
        assert_eq!(gateway.active_side(), ActiveSide::None);
        assert!(gateway.snapshot().is_none());
    }

    #[test]
    fn successive_refreshes_alternate_slots() {
        let schedule = testutil::empty_store(New_York);
        let gateway = RealtimeGateway::new(options("https://rt.example/feed.pb"));

        gateway.integrate(Ok(empty_feed_bytes(100)), 5, false, &schedule);
        assert_eq!(gateway.active_side(), ActiveSide::A);
        let first = gateway.snapshot().unwrap();

        gateway.integrate(Ok(empty_feed_bytes(200)), 5, false, &schedule);
        assert_eq!(gateway.active_side(), ActiveSide::B);
        let second = gateway.snapshot().unwrap();

        // The old snapshot stays coherent after the flip
        assert_eq!(first.feed_time().unwrap().timestamp(), 100);
        assert_eq!(second.feed_time().unwrap().timestamp(), 200);

        gateway.integrate(Ok(empty_feed_bytes(300)), 5, false, &schedule);
        assert_eq!(gateway.active_side(), ActiveSide::A);
    }

    #[test]
    fn fetch_failure_parks_side_at_none() {
        let schedule = testutil::empty_store(New_York);
        let gateway = RealtimeGateway::new(options("https://rt.example/feed.pb"));
        gateway.integrate(Ok(empty_feed_bytes(100)), 5, false, &schedule);
        assert_eq!(gateway.active_side(), ActiveSide::A);

        gateway.integrate(Err(RealtimeError::EmptyPayload), 5, false, &schedule);
        assert_eq!(gateway.active_side(), ActiveSide::None);
        assert!(gateway.snapshot().is_none());

        // Recovery replaces the inactive slot and flips back on
        gateway.integrate(Ok(empty_feed_bytes(200)), 5, false, &schedule);
        assert_eq!(gateway.active_side(), ActiveSide::A);
        assert_eq!(gateway.snapshot().unwrap().feed_time().unwrap().timestamp(), 200);
    }

    #[test]
    fn local_mode_keeps_last_good_on_read_failure() {
        let schedule = testutil::empty_store(New_York);
        let gateway = RealtimeGateway::new(options("/data/feed.pb"));
        gateway.integrate(Ok(empty_feed_bytes(100)), 5, true, &schedule);
        assert_eq!(gateway.active_side(), ActiveSide::A);

        gateway.integrate(
            Err(RealtimeError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "gone",
            ))),
            5,
            true,
            &schedule,
        );
        assert_eq!(gateway.active_side(), ActiveSide::A);
        assert!(gateway.snapshot().is_some());
    }

    #[test]
    fn garbage_payload_parks_side_at_none() {
        let schedule = testutil::empty_store(New_York);
        let gateway = RealtimeGateway::new(options("https://rt.example/feed.pb"));
        gateway.integrate(Ok(vec![0xFF; 32]), 5, false, &schedule);
        assert_eq!(gateway.active_side(), ActiveSide::None);
    }

    #[test]
    fn readers_never_observe_a_torn_store() {
        let schedule = Arc::new(testutil::empty_store(New_York));
        let gateway = Arc::new(RealtimeGateway::new(options("https://rt.example/feed.pb")));
        gateway.integrate(Ok(empty_feed_bytes(1)), 0, false, &schedule);

        let writer = {
            let gateway = Arc::clone(&gateway);
            let schedule = Arc::clone(&schedule);
            std::thread::spawn(move || {
                for ts in 2..200u64 {
                    gateway.integrate(Ok(empty_feed_bytes(ts)), 0, false, &schedule);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let gateway = Arc::clone(&gateway);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(store) = gateway.snapshot() {
                            // A snapshot is a complete store: header readable,
                            // timestamp monotone over the writer's range
                            let ts = store.feed_time().unwrap().timestamp();
                            assert!((1..200).contains(&ts));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn transaction_heartbeat_updates() {
        let gateway = RealtimeGateway::new(options("https://rt.example/feed.pb"));
        let before = gateway.most_recent_transaction();
        std::thread::sleep(std::time::Duration::from_millis(5));
        gateway.request_entered();
        assert!(gateway.most_recent_transaction() > before);
    }
}
