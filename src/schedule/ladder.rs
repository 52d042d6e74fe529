//! The ladder queue itself: Top / Rungs / Bottom, grounded on the ladderq
//! design in `examples/original_source/src/LadderQueue.{hpp,cpp}` and §4.C.
use std::collections::HashSet;

use crate::event::Event;

const MAX_RUNG_CNT: usize = 8;
const THRESHOLD: usize = 50;
const MIN_BUCKET_WIDTH: u64 = 1;

#[derive(Default)]
struct Top {
    buffer: Vec<Event>,
    min_ts: Option<u64>,
    max_ts: Option<u64>,
}

impl Top {
    fn push(&mut self, event: Event) {
        self.min_ts = Some(self.min_ts.map_or(event.receive_time, |m| m.min(event.receive_time)));
        self.max_ts = Some(self.max_ts.map_or(event.receive_time, |m| m.max(event.receive_time)));
        self.buffer.push(event);
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn take(&mut self) -> (Vec<Event>, u64, u64) {
        let min = self.min_ts.unwrap_or(0);
        let max = self.max_ts.unwrap_or(0);
        self.min_ts = None;
        self.max_ts = None;
        (std::mem::take(&mut self.buffer), min, max)
    }
}

struct Rung {
    buckets: Vec<Vec<Event>>,
    bucket_width: u64,
    start_ts: u64,
}

impl Rung {
    /// Build a new rung sized to cover `[start, start + (span / len).max(MIN_BUCKET_WIDTH) * len]`
    /// and distribute `events` into its buckets.
    fn from_events(mut events: Vec<Event>, min_ts: u64, max_ts: u64) -> Self {
        let n = events.len().max(1);
        let span = max_ts.saturating_sub(min_ts) + 1;
        let bucket_width = (span / n as u64).max(MIN_BUCKET_WIDTH);
        let bucket_count = ((span + bucket_width - 1) / bucket_width).max(1) as usize;
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, Vec::new);
        for event in events.drain(..) {
            let idx = (((event.receive_time - min_ts) / bucket_width) as usize).min(bucket_count - 1);
            buckets[idx].push(event);
        }
        Self {
            buckets,
            bucket_width,
            start_ts: min_ts,
        }
    }

    fn bound_contains(&self, ts: u64) -> bool {
        ts >= self.start_ts && ts < self.start_ts + self.bucket_width * self.buckets.len() as u64
    }

    fn bucket_index(&self, ts: u64) -> usize {
        (((ts - self.start_ts) / self.bucket_width) as usize).min(self.buckets.len() - 1)
    }

    fn insert(&mut self, event: Event) {
        let idx = self.bucket_index(event.receive_time);
        self.buckets[idx].push(event);
    }

    fn first_nonempty_bucket(&self) -> Option<usize> {
        self.buckets.iter().position(|b| !b.is_empty())
    }

    fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }
}

/// A bounded-height ladder queue holding at most one event per LP in the
/// schedule queue (the kernel enforces the one-event-per-LP invariant at a
/// higher layer; this structure is a plain min-priority multiset).
///
/// `erase` is lazy: it tombstones an event's identity rather than walking
/// the ladder's tiers, per the REDESIGN FLAG resolution recorded in
/// `DESIGN.md`. Tombstoned events are dropped silently when they would
/// otherwise be dequeued.
#[derive(Default)]
pub struct LadderQueue {
    top: Top,
    rungs: Vec<Rung>,
    bottom: Vec<Event>,
    tombstones: HashSet<(u64, u64, usize, u64, u8)>,
}

fn tombstone_key(event: &Event) -> (u64, u64, usize, u64, u8) {
    let (rt, st, sender, gen) = event.identity();
    (rt, st, sender, gen, event.polarity as u8)
}

impl LadderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bottom.is_empty() && self.rungs.is_empty() && self.top.is_empty()
    }

    /// Insert `event` into whichever tier currently claims its timestamp.
    pub fn insert(&mut self, event: Event) {
        for rung in self.rungs.iter_mut().rev() {
            if rung.bound_contains(event.receive_time) {
                rung.insert(event);
                return;
            }
        }
        if let Some(rung) = self.rungs.first() {
            if event.receive_time < rung.start_ts {
                self.insert_sorted_bottom(event);
                return;
            }
        }
        if self.rungs.is_empty() {
            if let Some(last) = self.bottom.last() {
                if event.receive_time <= last.receive_time {
                    self.insert_sorted_bottom(event);
                    return;
                }
            }
        }
        self.top.push(event);
    }

    fn insert_sorted_bottom(&mut self, event: Event) {
        let idx = self.bottom.partition_point(|e| *e < event);
        self.bottom.insert(idx, event);
    }

    /// Tombstone `event` so a later dequeue silently drops it instead of
    /// returning it. Always succeeds; the actual removal is deferred.
    pub fn erase(&mut self, event: &Event) {
        self.tombstones.insert(tombstone_key(event));
    }

    fn is_tombstoned(&mut self, event: &Event) -> bool {
        self.tombstones.remove(&tombstone_key(event))
    }

    /// Pop and return the minimum event, skipping any tombstoned entries,
    /// per §4.C's descent algorithm.
    pub fn dequeue(&mut self) -> Option<Event> {
        loop {
            self.promote_until_bottom_ready();
            if self.bottom.is_empty() {
                return None;
            }
            let candidate = self.bottom.remove(0);
            if !self.is_tombstoned(&candidate) {
                return Some(candidate);
            }
        }
    }

    /// Non-destructively report the minimum event's timestamp, running the
    /// same tier-promotion descent a dequeue would.
    pub fn lowest_timestamp(&mut self) -> Option<u64> {
        self.promote_until_bottom_ready();
        self.bottom.first().map(|e| e.receive_time)
    }

    fn promote_until_bottom_ready(&mut self) {
        while self.bottom.is_empty() {
            if let Some(last) = self.rungs.last_mut() {
                let Some(bucket_idx) = last.first_nonempty_bucket() else {
                    // Rung fully drained; discard it and keep descending.
                    self.rungs.pop();
                    continue;
                };
                let bucket = std::mem::take(&mut last.buckets[bucket_idx]);
                if last.is_empty() {
                    self.rungs.pop();
                }
                if bucket.len() <= THRESHOLD {
                    let mut bucket = bucket;
                    bucket.sort();
                    self.bottom = bucket;
                } else if self.rungs.len() >= MAX_RUNG_CNT {
                    // At max depth: force the bucket into Bottom regardless
                    // of size rather than recursing forever.
                    let mut bucket = bucket;
                    bucket.sort();
                    self.bottom = bucket;
                } else {
                    let min = bucket.iter().map(|e| e.receive_time).min().unwrap_or(0);
                    let max = bucket.iter().map(|e| e.receive_time).max().unwrap_or(0);
                    self.rungs.push(Rung::from_events(bucket, min, max));
                }
            } else if !self.top.is_empty() {
                let (events, min, max) = self.top.take();
                self.rungs.push(Rung::from_events(events, min, max));
            } else {
                return;
            }
        }
    }
}
