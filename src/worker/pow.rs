//! Honest proof-of-work worker
//!
//! Repeatedly snapshots the template and searches nonces until a checksum
//! meets the target. The search is abandoned as soon as the template height
//! moves past the one being mined, and on cancellation.

use super::{mining_span, MiningWorker, WorkerStats};
use crate::checksum::{header_checksum_with, Checksum};
use crate::state::SharedState;
use crate::utils::{current_timestamp_secs, format_hash, format_hash_rate};
use crate::{BlockHeader, Error, MinerId, Nonce, Result, Template};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How a single search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A header meeting the target, with `hash` filled in
    Found(BlockHeader),
    /// Another candidate already won this height
    Superseded,
    /// Stop signal observed
    Cancelled,
}

/// Where the next search starts.
///
/// Starts with no height so the first snapshot always begins at nonce 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SearchProgress {
    height: Option<u64>,
    next_nonce: Nonce,
}

impl SearchProgress {
    /// Nonce to start from when mining `template`
    fn resume(&mut self, template: &Template) -> Nonce {
        if self.height != Some(template.height) {
            self.height = Some(template.height);
            self.next_nonce = Nonce::default();
        }
        self.next_nonce
    }

    /// Record that `nonce` produced a candidate
    fn found(&mut self, nonce: Nonce) {
        self.next_nonce = nonce.next();
    }
}

/// Honest miner
#[derive(Clone)]
pub struct ProofOfWorkWorker {
    miner_id: MinerId,
    shared: Arc<SharedState>,
    checksum: Arc<dyn Checksum>,
}

impl ProofOfWorkWorker {
    /// Create a new miner
    pub fn new(miner_id: MinerId, shared: Arc<SharedState>, checksum: Arc<dyn Checksum>) -> Self {
        Self {
            miner_id,
            shared,
            checksum,
        }
    }

    /// Search nonces for `template` starting at `start`.
    ///
    /// Both stop conditions are polled before every attempt. Each computed
    /// checksum is added to `hashes`.
    pub fn search(
        &self,
        template: &Template,
        start: Nonce,
        cancellation: &CancellationToken,
        hashes: &mut u64,
    ) -> Result<SearchOutcome> {
        let target = template.target()?;
        let mut header = template.fill(self.miner_id, current_timestamp_secs(), start);
        let mut buf = Vec::with_capacity(64);

        loop {
            if cancellation.is_cancelled() {
                return Ok(SearchOutcome::Cancelled);
            }
            if self.shared.template_height() > template.height {
                return Ok(SearchOutcome::Superseded);
            }

            let checksum = header_checksum_with(self.checksum.as_ref(), &header, &mut buf);
            *hashes += 1;

            if target.is_met_by(checksum) {
                header.hash = checksum;
                return Ok(SearchOutcome::Found(header));
            }

            header.nonce.increment();
            header.timestamp = current_timestamp_secs();
        }
    }

    /// Mine until cancelled, blocking the current thread
    pub fn mine_blocking(&self, cancellation: &CancellationToken) -> Result<WorkerStats> {
        let started = Instant::now();
        let mut stats = WorkerStats::new(self.miner_id, self.worker_type());
        let mut progress = SearchProgress::default();

        info!("Miner started");

        while !cancellation.is_cancelled() {
            let template = self.shared.snapshot();
            let start = progress.resume(&template);

            match self.search(&template, start, cancellation, &mut stats.hashes)? {
                SearchOutcome::Found(header) => {
                    progress.found(header.nonce);
                    info!(
                        miner_id = %header.miner_id,
                        height = header.height,
                        hash = %format_hash(header.hash),
                        nonce = %header.nonce,
                        "Mined a new block"
                    );
                    self.shared.submit(header);
                    stats.submitted += 1;
                }
                SearchOutcome::Superseded => {
                    stats.superseded += 1;
                    debug!(height = template.height, "Height already won, taking new template");
                }
                SearchOutcome::Cancelled => break,
            }
        }

        stats.elapsed = started.elapsed();
        info!(
            hashes = stats.hashes,
            submitted = stats.submitted,
            hash_rate = %format_hash_rate(stats.hash_rate()),
            "Miner stopped"
        );

        Ok(stats)
    }
}

#[async_trait]
impl MiningWorker for ProofOfWorkWorker {
    fn worker_type(&self) -> &'static str {
        "pow"
    }

    fn miner_id(&self) -> MinerId {
        self.miner_id
    }

    async fn run(&mut self, cancellation: CancellationToken) -> Result<WorkerStats> {
        let worker = self.clone();
        let span = mining_span(self.worker_type(), self.miner_id);

        // The search is CPU-bound; give it a blocking-pool thread of its own.
        task::spawn_blocking(move || {
            let _entered = span.enter();
            worker.mine_blocking(&cancellation)
        })
        .await
        .map_err(|e| Error::worker("pow", format!("search thread failed: {}", e)))?
    }
}
