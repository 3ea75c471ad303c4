use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::Rng;
use uuid::{Timestamp, Uuid};

/// 100ns intervals between 1582-10-15 and the unix epoch.
const GREGORIAN_OFFSET: u64 = 0x01B2_1DD2_1381_4000;
const TICKS_PER_MILLI: u64 = 10_000;

/// Upper bound (exclusive) of the index-column jitter, in milliseconds.
pub const INDEX_JITTER_MS: i64 = 1_000;

/// Generates version-1 time UUIDs.
///
/// Primary ids carry a strictly increasing 100ns tick count per generator,
/// so identical wall-clock readings on any thread still yield distinct ids.
/// Index ids are derived from a caller timestamp plus random jitter and may
/// collide.
#[derive(Debug)]
pub struct UniqueIdGenerator {
    last_ticks: AtomicU64,
    clock_seq: u16,
    node_id: [u8; 6],
}

impl UniqueIdGenerator {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut node_id = [0u8; 6];
        rng.fill(&mut node_id);
        // Random node ids set the multicast bit so they never match a MAC.
        node_id[0] |= 0x01;
        Self {
            last_ticks: AtomicU64::new(0),
            clock_seq: rng.gen_range(0..0x4000),
            node_id,
        }
    }

    /// Time-ordered id for a primary row.
    pub fn new_primary_id(&self) -> Uuid {
        let clock = Utc::now();
        let now = millis_to_ticks(clock.timestamp_millis())
            + u64::from(clock.timestamp_subsec_nanos() % 1_000_000) / 100;
        let mut last = self.last_ticks.load(Ordering::Relaxed);
        let ticks = loop {
            let next = now.max(last + 1);
            match self
                .last_ticks
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break next,
                Err(current) => last = current,
            }
        };
        self.build(ticks)
    }

    /// Time-ordered id for an index column: `base_millis` plus a uniform
    /// jitter in `[0, 1000)` ms.
    pub fn new_index_id(&self, base_millis: i64) -> Uuid {
        let jitter = rand::thread_rng().gen_range(0..INDEX_JITTER_MS);
        self.build(millis_to_ticks(base_millis.saturating_add(jitter)))
    }

    fn build(&self, ticks: u64) -> Uuid {
        #[allow(deprecated)]
        let ts = Timestamp::from_rfc4122(ticks, self.clock_seq);
        Uuid::new_v1(ts, &self.node_id)
    }
}

impl Default for UniqueIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Negative millis clamp to the unix epoch.
fn millis_to_ticks(millis: i64) -> u64 {
    let millis = u64::try_from(millis).unwrap_or(0);
    GREGORIAN_OFFSET.saturating_add(millis.saturating_mul(TICKS_PER_MILLI))
}

/// Unix milliseconds embedded in a version-1 UUID.
pub fn id_millis(id: &Uuid) -> Option<i64> {
    let ticks = logwide_api::storage::time_ticks(id)?;
    let millis = ticks.checked_sub(GREGORIAN_OFFSET)? / TICKS_PER_MILLI;
    i64::try_from(millis).ok()
}
