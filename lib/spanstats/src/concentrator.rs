//! Span concentrator.
//!
//! The concentrator buckets incoming spans by the time they ended, aggregates them per bucket, and periodically
//! flushes the buckets that are old enough to a [`StatsWriter`]. Ingestion and flushing can happen concurrently from
//! any number of threads: a single lock guards the buckets and the watermark, and is held only while spans are
//! accounted and while due buckets are swept out. Shaping the swept buckets into a payload happens after the lock is
//! released.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use snafu::Snafu;
use tokio::{
    pin, select,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    aggregation::PayloadAggregationKey,
    bucket::StatSpan,
    config::ConcentratorConfig,
    eligibility::{is_span_eligible, is_top_level},
    input::Input,
    payload::StatsPayload,
    peer_tags::resolve_peer_tag_keys,
    store::BucketStore,
    task::{spawn_guarded, ProcessShutdown, ShutdownHandle},
    trace::ProcessedTrace,
    weight::weight,
    writer::StatsWriter,
};

/// Concentrator error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConcentratorError {
    /// The bucket interval was zero, or too large to be represented in nanoseconds.
    #[snafu(display("Invalid bucket interval {:?}: must be non-zero and fit in 64-bit nanoseconds.", interval))]
    InvalidBucketInterval {
        /// The configured interval.
        interval: Duration,
    },

    /// The buffer length was zero.
    #[snafu(display("Buffer length must be at least 1."))]
    ZeroBufferLen,

    /// The background task was already started.
    #[snafu(display("Concentrator has already been started."))]
    AlreadyStarted,
}

/// Lifecycle state of a concentrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConcentratorState {
    /// Created, but the background task was never started.
    Created = 0,

    /// The background task is flushing on every tick.
    Running = 1,

    /// Shutdown was requested and the final flush is in progress.
    Draining = 2,

    /// The background task has exited.
    Stopped = 3,
}

impl ConcentratorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Returns the current wall clock time, in nanoseconds since the Unix epoch.
///
/// Clocks set before the epoch read as `0`.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

struct Inner {
    /// Bucket duration in nanoseconds.
    bsize: u64,

    agent_env: String,
    agent_hostname: String,
    agent_version: String,

    compute_stats_by_span_kind: bool,

    /// Peer tag keys to aggregate on. Empty when peer tags aggregation is disabled.
    peer_tag_keys: Vec<String>,

    store: Mutex<BucketStore>,
    state: AtomicU8,
    writer: Arc<dyn StatsWriter>,
}

impl Inner {
    fn lock_store(&self) -> MutexGuard<'_, BucketStore> {
        self.store.lock().unwrap_or_else(|poisoned| {
            warn!("Bucket store lock was poisoned by a panicking thread. Recovering.");
            self.store.clear_poison();
            poisoned.into_inner()
        })
    }

    fn set_state(&self, state: ConcentratorState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Aggregates spans into time-bucketed stats.
///
/// Cloning is cheap: clones share the same buckets, writer, and background task.
#[derive(Clone)]
pub struct Concentrator {
    inner: Arc<Inner>,
}

impl Concentrator {
    /// Creates a new `Concentrator`.
    ///
    /// `now` is the current time in nanoseconds since the Unix epoch. Only stats for the bucket containing `now`, and
    /// later ones, may be created: spans ending earlier are accounted to that bucket.
    ///
    /// # Errors
    ///
    /// If the bucket interval is zero or out of range, or the buffer length is zero, an error is returned.
    pub fn new(
        config: &ConcentratorConfig, writer: Arc<dyn StatsWriter>, now: u64,
    ) -> Result<Self, ConcentratorError> {
        let interval = config.bucket_interval();
        let bsize = match u64::try_from(interval.as_nanos()) {
            Ok(bsize) if bsize > 0 => bsize,
            _ => return InvalidBucketInterval { interval }.fail(),
        };

        if config.buffer_len() == 0 {
            return ZeroBufferLen.fail();
        }
        let buffer_len = config.buffer_len() as u64;

        let peer_tag_keys = resolve_peer_tag_keys(config);
        debug!(
            bucket_interval = ?interval,
            buffer_len,
            peer_tag_keys_len = peer_tag_keys.len(),
            "Created concentrator."
        );

        Ok(Self {
            inner: Arc::new(Inner {
                bsize,
                agent_env: config.default_env().to_string(),
                agent_hostname: config.hostname().to_string(),
                agent_version: config.agent_version().to_string(),
                compute_stats_by_span_kind: config.compute_stats_by_span_kind(),
                peer_tag_keys,
                store: Mutex::new(BucketStore::new(bsize, buffer_len, now)),
                state: AtomicU8::new(ConcentratorState::Created as u8),
                writer,
            }),
        })
    }

    /// Returns the bucket width.
    pub fn bucket_interval(&self) -> Duration {
        Duration::from_nanos(self.inner.bsize)
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConcentratorState {
        ConcentratorState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns the peer tag keys spans are aggregated on.
    pub fn peer_tag_keys(&self) -> &[String] {
        &self.inner.peer_tag_keys
    }

    /// Returns the number of buckets currently held in memory.
    pub fn bucket_count(&self) -> usize {
        self.inner.lock_store().len()
    }

    /// Returns the timestamp of the oldest bucket that can still be created, in nanoseconds.
    pub fn oldest_ts(&self) -> u64 {
        self.inner.lock_store().oldest_ts()
    }

    /// Returns the start timestamps of the buckets currently held in memory, in ascending order.
    pub fn bucket_timestamps(&self) -> Vec<u64> {
        self.inner.lock_store().timestamps()
    }

    /// Accounts the traces of the given input.
    ///
    /// The whole input is applied under a single acquisition of the lock, in order.
    pub fn add(&self, input: Input) {
        let mut store = self.inner.lock_store();
        for trace in input.traces() {
            self.add_trace(&mut store, trace, input.container_id(), input.container_tags());
        }
    }

    fn add_trace(
        &self, store: &mut BucketStore, trace: &ProcessedTrace, container_id: &str, container_tags: &[String],
    ) {
        let hostname = if trace.tracer_hostname().is_empty() {
            self.inner.agent_hostname.as_str()
        } else {
            trace.tracer_hostname()
        };
        let env = if trace.tracer_env().is_empty() {
            self.inner.agent_env.as_str()
        } else {
            trace.tracer_env()
        };
        let weight = trace.root().map(weight).unwrap_or(1.0);

        let payload_key = PayloadAggregationKey {
            env: env.to_string(),
            hostname: hostname.to_string(),
            version: trace.app_version().to_string(),
            container_id: container_id.to_string(),
            git_commit_sha: trace.git_commit_sha().to_string(),
            image_tag: trace.image_tag().to_string(),
        };

        let origin = trace.chunk().origin();
        for span in trace.chunk().spans() {
            if !is_span_eligible(span, self.inner.compute_stats_by_span_kind) {
                continue;
            }

            let btime = store.bucket_timestamp(span.end());
            let stat_span = StatSpan::new(span, is_top_level(span), &self.inner.peer_tag_keys);
            store
                .get_or_create(btime, container_id, container_tags)
                .handle_span(&stat_span, weight, origin, payload_key.clone());
        }
    }

    /// Flushes buckets that are due, as of the current wall clock time.
    ///
    /// With `force`, every bucket is flushed regardless of its age.
    pub fn flush(&self, force: bool) -> StatsPayload {
        self.flush_at(now_nanos(), force)
    }

    /// Flushes buckets that are due as of `now`, in nanoseconds since the Unix epoch.
    ///
    /// With `force`, every bucket is flushed regardless of its age.
    pub fn flush_at(&self, now: u64, force: bool) -> StatsPayload {
        let swept = {
            let mut store = self.inner.lock_store();
            store.sweep(now, force)
        };

        let bucket_count = swept.record_count();
        let stats = swept.into_client_payloads();
        debug!(now, force, payloads = stats.len(), buckets = bucket_count, "Flushed stats.");

        StatsPayload::new(
            self.inner.agent_hostname.clone(),
            self.inner.agent_env.clone(),
            self.inner.agent_version.clone(),
            stats,
        )
    }

    /// Runs the flush loop until `shutdown` resolves.
    ///
    /// Every bucket interval, due buckets are flushed and written. Once shutdown is requested, every remaining bucket
    /// is flushed and written exactly once before returning.
    pub async fn run(&self, mut shutdown: ProcessShutdown) {
        self.inner.set_state(ConcentratorState::Running);

        let mut flush_ticker = interval(self.bucket_interval());
        flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        flush_ticker.tick().await;

        debug!("Starting concentrator.");

        let shutdown_signal = shutdown.wait_for_shutdown();
        pin!(shutdown_signal);

        loop {
            select! {
                _ = flush_ticker.tick() => {
                    let payload = self.flush(false);
                    self.inner.writer.write(payload).await;
                },
                _ = &mut shutdown_signal => {
                    info!("Exiting concentrator, computing remaining stats.");
                    self.inner.set_state(ConcentratorState::Draining);

                    let payload = self.flush(true);
                    self.inner.writer.write(payload).await;
                    break;
                },
            }
        }

        self.inner.set_state(ConcentratorState::Stopped);
        debug!("Concentrator stopped.");
    }

    /// Starts the flush loop in a background task.
    ///
    /// A panic in the task is logged and ends the task, without affecting the rest of the process.
    ///
    /// # Errors
    ///
    /// If the concentrator was already started, an error is returned.
    pub fn start(&self) -> Result<RunningConcentrator, ConcentratorError> {
        if self
            .inner
            .state
            .compare_exchange(
                ConcentratorState::Created as u8,
                ConcentratorState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return AlreadyStarted.fail();
        }

        let (shutdown, shutdown_handle) = ProcessShutdown::paired();
        let this = self.clone();
        let task_handle = spawn_guarded("concentrator", async move { this.run(shutdown).await });

        Ok(RunningConcentrator {
            concentrator: self.clone(),
            shutdown_handle,
            task_handle,
        })
    }
}

/// Handle to a concentrator whose flush loop runs in the background.
pub struct RunningConcentrator {
    concentrator: Concentrator,
    shutdown_handle: ShutdownHandle,
    task_handle: JoinHandle<()>,
}

impl RunningConcentrator {
    /// Returns the concentrator.
    pub fn concentrator(&self) -> &Concentrator {
        &self.concentrator
    }

    /// Stops the flush loop, waiting for the final flush to be written and the task to exit.
    pub async fn stop(self) {
        self.shutdown_handle.trigger();

        if let Err(e) = self.task_handle.await {
            error!(error = %e, "Concentrator task did not complete.");
        }

        self.concentrator.inner.set_state(ConcentratorState::Stopped);
    }
}
