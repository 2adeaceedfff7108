//! Time-bucketed span stats.
//!
//! Spans are accounted into fixed-width time buckets keyed by when they ended, and grouped within each bucket by an
//! aggregation key describing where they came from and what they did. Buckets are flushed to a [`StatsWriter`] once
//! they are old enough that no more spans are expected for them, or all at once on shutdown.
#![deny(missing_docs)]

mod aggregation;
pub use self::aggregation::{PayloadAggregationKey, SpanKind};

mod bucket;

pub mod collections;

mod concentrator;
pub use self::concentrator::{now_nanos, Concentrator, ConcentratorError, ConcentratorState, RunningConcentrator};

mod config;
pub use self::config::{ConcentratorConfig, FEATURE_DISABLE_CID_STATS, FEATURE_ENABLE_CID_STATS};

pub mod eligibility;

mod input;
pub use self::input::Input;

pub mod payload;
pub use self::payload::StatsPayload;

pub mod peer_tags;

mod store;

pub mod task;

pub mod trace;

mod weight;
pub use self::weight::weight;

mod writer;
pub use self::writer::{ChannelWriter, StatsWriter};
