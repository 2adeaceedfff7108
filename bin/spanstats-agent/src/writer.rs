use std::io::Write as _;

use async_trait::async_trait;
use spanstats::{StatsPayload, StatsWriter};
use tracing::{debug, error, info};

/// A writer that logs a summary of every payload, and optionally prints each non-empty payload to stdout as JSON.
pub struct LogWriter {
    print_payloads: bool,
}

impl LogWriter {
    pub fn new(print_payloads: bool) -> Self {
        Self { print_payloads }
    }

    fn print(&self, payload: &StatsPayload) {
        let mut stdout = std::io::stdout().lock();
        let result = serde_json::to_writer(&mut stdout, payload)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(stdout));
        if let Err(e) = result {
            error!(error = %e, "Failed to print stats payload.");
        }
    }
}

#[async_trait]
impl StatsWriter for LogWriter {
    async fn write(&self, payload: StatsPayload) {
        if payload.is_empty() {
            debug!("No stats due for flushing.");
            return;
        }

        let groups: usize = payload
            .stats()
            .iter()
            .flat_map(|p| p.stats())
            .map(|b| b.stats().len())
            .sum();
        info!(
            payloads = payload.stats().len(),
            buckets = payload.bucket_count(),
            groups,
            "Flushed span stats."
        );

        if self.print_payloads {
            self.print(&payload);
        }
    }
}
