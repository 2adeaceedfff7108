//! Time-bucketed storage and retention.

use tracing::{debug, trace};

use crate::{
    aggregation::PayloadAggregationKey,
    bucket::RawBucket,
    collections::FastHashMap,
    payload::{ClientStatsBucket, ClientStatsPayload},
};

/// Aligns a timestamp to the start of its bucket.
#[inline]
pub(crate) fn align_ts(ts: u64, bsize: u64) -> u64 {
    ts - ts % bsize
}

/// Buckets of stats keyed by their start timestamp, along with the watermark below which no bucket may be created.
pub(crate) struct BucketStore {
    /// Bucket duration in nanoseconds.
    bsize: u64,

    /// Number of buckets to buffer before flushing.
    buffer_len: u64,

    /// Timestamp of oldest allowed bucket. Spans ending before it are accounted to it instead.
    oldest_ts: u64,

    buckets: FastHashMap<u64, RawBucket>,
}

impl BucketStore {
    /// Creates an empty store. `bsize` and `buffer_len` must both be non-zero.
    pub fn new(bsize: u64, buffer_len: u64, now: u64) -> Self {
        Self {
            bsize,
            buffer_len,
            oldest_ts: align_ts(now, bsize),
            buckets: FastHashMap::default(),
        }
    }

    pub fn oldest_ts(&self) -> u64 {
        self.oldest_ts
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the bucket timestamps, in ascending order.
    pub fn timestamps(&self) -> Vec<u64> {
        let mut timestamps: Vec<u64> = self.buckets.keys().copied().collect();
        timestamps.sort_unstable();
        timestamps
    }

    /// Returns the timestamp of the bucket a span ending at `end` belongs to.
    pub fn bucket_timestamp(&self, end: u64) -> u64 {
        align_ts(end, self.bsize).max(self.oldest_ts)
    }

    /// Returns the bucket starting at `btime`, creating it if needed.
    ///
    /// Container tags are only recorded when the bucket is created.
    pub fn get_or_create(&mut self, btime: u64, container_id: &str, container_tags: &[String]) -> &mut RawBucket {
        let bsize = self.bsize;
        self.buckets.entry(btime).or_insert_with(|| {
            let mut bucket = RawBucket::new(btime, bsize);
            if !container_id.is_empty() && !container_tags.is_empty() {
                bucket.set_container_tags(container_id.to_string(), container_tags.to_vec());
            }
            bucket
        })
    }

    /// Removes and exports every bucket that is due at `now`, or every bucket at all if `force` is set.
    ///
    /// A bucket is kept when it is not forced out and its timestamp is within `buffer_len` bucket widths of `now`.
    /// Afterwards, the watermark moves up to the oldest bucket that can still be written to, and never moves down.
    pub fn sweep(&mut self, now: u64, force: bool) -> SweptBuckets {
        let window = self.buffer_len.saturating_mul(self.bsize);

        let mut timestamps: Vec<u64> = self.buckets.keys().copied().collect();
        timestamps.sort_unstable();

        let mut swept = SweptBuckets::default();
        for ts in timestamps {
            if !force && ts.saturating_add(window) > now {
                trace!(bucket_ts = ts, "Bucket is not old enough to be flushed. Keeping.");
                continue;
            }

            let Some(mut bucket) = self.buckets.remove(&ts) else {
                continue;
            };

            debug!(bucket_ts = ts, force, "Flushing bucket.");
            let container_tags = bucket.take_container_tags();
            for (key, stats_bucket) in bucket.export() {
                if let Some(tags) = container_tags.get(&key.container_id) {
                    swept.container_tags_by_id.insert(key.container_id.clone(), tags.clone());
                }
                swept.records.entry(key).or_default().push(stats_bucket);
            }
        }

        let new_oldest_ts = align_ts(now, self.bsize)
            .saturating_sub(self.buffer_len.saturating_sub(1).saturating_mul(self.bsize));
        if new_oldest_ts > self.oldest_ts {
            trace!(
                previous_oldest_ts = self.oldest_ts,
                oldest_ts = new_oldest_ts,
                "Advancing oldest bucket timestamp."
            );
            self.oldest_ts = new_oldest_ts;
        }

        swept
    }
}

/// Stats records removed from the store by a sweep, not yet shaped into payloads.
#[derive(Default)]
pub(crate) struct SweptBuckets {
    records: FastHashMap<PayloadAggregationKey, Vec<ClientStatsBucket>>,
    container_tags_by_id: FastHashMap<String, Vec<String>>,
}

impl SweptBuckets {
    /// Returns the number of stats records across all keys.
    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// Builds one client payload per aggregation key.
    ///
    /// Payloads are sorted by key. Within a payload, records are ordered by bucket timestamp.
    pub fn into_client_payloads(self) -> Vec<ClientStatsPayload> {
        let Self {
            records,
            container_tags_by_id,
        } = self;

        let mut records: Vec<_> = records.into_iter().collect();
        records.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        records
            .into_iter()
            .map(|(key, stats)| {
                let tags = container_tags_by_id.get(&key.container_id).cloned().unwrap_or_default();
                ClientStatsPayload::new(key.hostname, key.env, key.version)
                    .with_container_id(key.container_id)
                    .with_git_commit_sha(key.git_commit_sha)
                    .with_image_tag(key.image_tag)
                    .with_tags(tags)
                    .with_stats(stats)
            })
            .collect()
    }
}
