//! Faulty worker that submits forged candidates
//!
//! Never searches. Every interval it takes the current template, stamps it
//! with a hash that is not the checksum of the header and submits it. The
//! validator must reject every one of these.

use super::{mining_span, MiningWorker, WorkerStats};
use crate::checksum::{header_checksum, Checksum};
use crate::state::SharedState;
use crate::utils::{current_timestamp_secs, format_hash};
use crate::{BlockHeader, MinerId, Nonce, Result, Target, Template};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

/// Hash claimed by forged candidates (`0x00badbad`)
pub const FORGED_HASH: u32 = 12_245_933;

/// Pick the hash a forged candidate claims.
///
/// The result never equals `real`, so hash integrity fails for every forged
/// header. When the target allows it, the claim is also above the threshold.
pub fn forge_hash(real: u32, target: Target) -> u32 {
    let forged = FORGED_HASH.max(target.threshold().saturating_add(1));
    if forged == real {
        !real
    } else {
        forged
    }
}

/// Worker submitting invalid candidates at a fixed interval
#[derive(Clone)]
pub struct FaultyWorker {
    miner_id: MinerId,
    shared: Arc<SharedState>,
    checksum: Arc<dyn Checksum>,
    interval: Duration,
}

impl FaultyWorker {
    /// Create a faulty worker
    pub fn new(
        miner_id: MinerId,
        shared: Arc<SharedState>,
        checksum: Arc<dyn Checksum>,
        interval: Duration,
    ) -> Self {
        Self {
            miner_id,
            shared,
            checksum,
            interval,
        }
    }

    /// Delay between forged submissions
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Build a forged candidate for `template`
    pub fn forge_candidate(&self, template: &Template, nonce: Nonce) -> Result<BlockHeader> {
        let target = template.target()?;
        let mut header = template.fill(self.miner_id, current_timestamp_secs(), nonce);
        let real = header_checksum(self.checksum.as_ref(), &header);
        header.hash = forge_hash(real, target);
        Ok(header)
    }

    async fn submit_until_cancelled(&self, cancellation: CancellationToken) -> Result<WorkerStats> {
        let started = Instant::now();
        let mut stats = WorkerStats::new(self.miner_id, self.worker_type());
        let mut nonce = Nonce::default();

        info!(interval = ?self.interval(), "Faulty miner started");

        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                _ = sleep(self.interval()) => {}
            }

            let template = self.shared.snapshot();
            let forged = self.forge_candidate(&template, nonce)?;
            nonce.increment();

            info!(
                height = forged.height,
                hash = %format_hash(forged.hash),
                "Submitting forged candidate"
            );
            self.shared.submit(forged);
            stats.submitted += 1;
        }

        stats.elapsed = started.elapsed();
        info!(submitted = stats.submitted, "Faulty miner stopped");
        Ok(stats)
    }
}

#[async_trait]
impl MiningWorker for FaultyWorker {
    fn worker_type(&self) -> &'static str {
        "faulty"
    }

    fn miner_id(&self) -> MinerId {
        self.miner_id
    }

    async fn run(&mut self, cancellation: CancellationToken) -> Result<WorkerStats> {
        let span = mining_span(self.worker_type(), self.miner_id);
        self.submit_until_cancelled(cancellation)
            .instrument(span)
            .await
    }
}
