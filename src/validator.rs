//! Validator: the single consumer of mined candidates
//!
//! Sleeps until a worker signals a submission, checks the candidate in the
//! mailbox and either extends the chain or discards it. Once the head height
//! exceeds the configured bound the validator halts and broadcasts the stop
//! signal to every worker.

use crate::checksum::{header_checksum, Checksum};
use crate::state::SharedState;
use crate::utils::format_hash;
use crate::{BlockHeader, Template};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Validator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorState {
    /// Waiting for a submission
    Idle,
    /// Examining a candidate
    Checking,
    /// Chain reached its bound; nothing more is accepted
    Halted,
}

/// Why a candidate was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Claimed hash differs from the recomputed checksum
    #[error("hash {claimed:#010x} does not match recomputed checksum {computed:#010x}")]
    HashMismatch { claimed: u32, computed: u32 },

    /// Checksum is above the target threshold
    #[error("hash {hash:#010x} is above target {threshold:#010x}")]
    TargetNotMet { hash: u32, threshold: u32 },

    /// Claimed difficulty cannot describe a 32-bit target
    #[error("difficulty {claimed} is outside 0..=32")]
    InvalidDifficulty { claimed: u32 },

    /// Candidate is stale or from the future
    #[error("height {received} does not follow head, expected {expected}")]
    HeightMismatch { expected: u64, received: u64 },

    /// Candidate was built on another head
    #[error("prev_hash {received:#010x} does not link to head {expected:#010x}")]
    PrevHashMismatch { expected: u32, received: u32 },

    /// Candidate predates the head
    #[error("timestamp {received} is earlier than head timestamp {head}")]
    StaleTimestamp { head: u64, received: u64 },

    /// Candidate claims a difficulty the chain does not use
    #[error("difficulty {received} differs from chain difficulty {expected}")]
    DifficultyMismatch { expected: u32, received: u32 },
}

impl Rejection {
    /// Header field that caused the rejection
    pub fn field(&self) -> &'static str {
        match self {
            Rejection::HashMismatch { .. } | Rejection::TargetNotMet { .. } => "hash",
            Rejection::InvalidDifficulty { .. } | Rejection::DifficultyMismatch { .. } => {
                "difficulty"
            }
            Rejection::HeightMismatch { .. } => "height",
            Rejection::PrevHashMismatch { .. } => "prev_hash",
            Rejection::StaleTimestamp { .. } => "timestamp",
        }
    }
}

/// Check `candidate` against the current head.
///
/// Order: hash integrity, height continuity, prev_hash linkage, timestamp
/// monotonicity, then the chain difficulty. The first failure wins.
pub fn check_candidate(
    candidate: &BlockHeader,
    head: &BlockHeader,
    checksum: &dyn Checksum,
    difficulty: u32,
) -> Result<(), Rejection> {
    let target = candidate
        .target()
        .map_err(|_| Rejection::InvalidDifficulty {
            claimed: candidate.difficulty,
        })?;

    let computed = header_checksum(checksum, candidate);
    if computed != candidate.hash {
        return Err(Rejection::HashMismatch {
            claimed: candidate.hash,
            computed,
        });
    }
    if !target.is_met_by(computed) {
        return Err(Rejection::TargetNotMet {
            hash: computed,
            threshold: target.threshold(),
        });
    }

    if candidate.height != head.height + 1 {
        return Err(Rejection::HeightMismatch {
            expected: head.height + 1,
            received: candidate.height,
        });
    }

    if candidate.prev_hash != head.hash {
        return Err(Rejection::PrevHashMismatch {
            expected: head.hash,
            received: candidate.prev_hash,
        });
    }

    if !head.is_genesis() && candidate.timestamp < head.timestamp {
        return Err(Rejection::StaleTimestamp {
            head: head.timestamp,
            received: candidate.timestamp,
        });
    }

    if candidate.difficulty != difficulty {
        return Err(Rejection::DifficultyMismatch {
            expected: difficulty,
            received: candidate.difficulty,
        });
    }

    Ok(())
}

/// Result of examining one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Candidate became the new head
    Accepted {
        block: BlockHeader,
        template: Template,
    },
    /// Candidate was discarded
    Rejected {
        candidate: BlockHeader,
        reason: Rejection,
    },
}

impl Verdict {
    /// Whether the candidate was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

/// Validator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidatorStats {
    /// Candidates taken from the mailbox
    pub examined: u64,
    /// Candidates appended to the chain
    pub accepted: u64,
    /// Rejections keyed by offending field
    pub rejected: BTreeMap<&'static str, u64>,
}

impl ValidatorStats {
    fn record(&mut self, verdict: &Verdict) {
        self.examined += 1;
        match verdict {
            Verdict::Accepted { .. } => self.accepted += 1,
            Verdict::Rejected { reason, .. } => {
                *self.rejected.entry(reason.field()).or_default() += 1;
            }
        }
    }

    /// Total number of rejected candidates
    pub fn total_rejected(&self) -> u64 {
        self.rejected.values().sum()
    }

    /// Rejections attributed to `field`
    pub fn rejected_for(&self, field: &str) -> u64 {
        self.rejected.get(field).copied().unwrap_or(0)
    }
}

/// The chain's only writer
pub struct Validator {
    shared: Arc<SharedState>,
    checksum: Arc<dyn Checksum>,
    max_height: u64,
    state: ValidatorState,
    stats: ValidatorStats,
}

impl Validator {
    /// Create a validator that halts once the head height exceeds `max_height`
    pub fn new(shared: Arc<SharedState>, checksum: Arc<dyn Checksum>, max_height: u64) -> Self {
        Self {
            shared,
            checksum,
            max_height,
            state: ValidatorState::Idle,
            stats: ValidatorStats::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ValidatorState {
        self.state
    }

    /// Whether the chain reached its bound
    pub fn is_halted(&self) -> bool {
        self.state == ValidatorState::Halted
    }

    /// Counters so far
    pub fn stats(&self) -> &ValidatorStats {
        &self.stats
    }

    /// Examine the pending candidate, if any.
    ///
    /// Check, accept and republish all happen under one acquisition of the
    /// state lock. Returns `None` when the mailbox is empty or the validator
    /// has halted.
    pub fn process_pending(&mut self) -> Option<Verdict> {
        if self.is_halted() {
            return None;
        }

        let (verdict, head_height) = {
            let mut state = self.shared.lock();
            let candidate = state.take_candidate()?;
            self.state = ValidatorState::Checking;

            let verdict = match check_candidate(
                &candidate,
                state.head(),
                self.checksum.as_ref(),
                state.difficulty(),
            ) {
                Ok(()) => {
                    let template = self.shared.extend(&mut state, candidate);
                    Verdict::Accepted {
                        block: candidate,
                        template,
                    }
                }
                Err(reason) => Verdict::Rejected { candidate, reason },
            };

            (verdict, state.head().height)
        };

        self.stats.record(&verdict);
        log_verdict(&verdict);

        self.state = if head_height > self.max_height {
            info!(
                height = head_height,
                max_height = self.max_height,
                "Chain exceeded its height bound, halting"
            );
            ValidatorState::Halted
        } else {
            ValidatorState::Idle
        };

        Some(verdict)
    }

    /// Validate submissions until halted or cancelled.
    ///
    /// Halting cancels `cancellation` so every worker stops as well.
    pub async fn run(mut self, cancellation: CancellationToken) -> ValidatorStats {
        let shared = Arc::clone(&self.shared);

        info!(
            max_height = self.max_height,
            checksum = self.checksum.name(),
            "Validator started"
        );

        while !self.is_halted() {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    info!("Validator stopping on shutdown signal");
                    break;
                }
                _ = shared.wait_for_submission() => {}
            }

            if self.process_pending().is_none() {
                debug!("Woke up to an empty mailbox");
            }
        }

        if self.is_halted() {
            cancellation.cancel();
        }

        info!(
            examined = self.stats.examined,
            accepted = self.stats.accepted,
            rejected = self.stats.total_rejected(),
            "Validator finished"
        );

        self.stats
    }
}

fn log_verdict(verdict: &Verdict) {
    match verdict {
        Verdict::Accepted { block, template } => info!(
            miner_id = %block.miner_id,
            height = block.height,
            hash = %format_hash(block.hash),
            prev_hash = %format_hash(block.prev_hash),
            timestamp = block.timestamp,
            nonce = %block.nonce,
            next_height = template.height,
            "New block added"
        ),
        Verdict::Rejected { candidate, reason } => warn!(
            miner_id = %candidate.miner_id,
            height = candidate.height,
            hash = %format_hash(candidate.hash),
            field = reason.field(),
            %reason,
            "Candidate rejected"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Crc32Checksum;
    use crate::{MinerId, Nonce};
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Every preimage hashes to the same value
    struct FixedChecksum(u32);

    impl Checksum for FixedChecksum {
        fn checksum(&self, _bytes: &[u8]) -> u32 {
            self.0
        }
    }

    /// Known preimages hash to chosen values, everything else to `u32::MAX`
    #[derive(Default)]
    struct TableChecksum(HashMap<Vec<u8>, u32>);

    impl TableChecksum {
        fn insert(&mut self, header: &BlockHeader, value: u32) {
            self.0.insert(header.preimage(), value);
        }
    }

    impl Checksum for TableChecksum {
        fn checksum(&self, bytes: &[u8]) -> u32 {
            self.0.get(bytes).copied().unwrap_or(u32::MAX)
        }
    }

    fn setup(checksum: impl Checksum + 'static, max_height: u64) -> (Arc<SharedState>, Validator) {
        let shared = SharedState::new(16);
        let validator = Validator::new(Arc::clone(&shared), Arc::new(checksum), max_height);
        (shared, validator)
    }

    fn candidate(shared: &SharedState, miner: u32, timestamp: u64, hash: u32) -> BlockHeader {
        let mut header = shared
            .snapshot()
            .fill(MinerId::new(miner), timestamp, Nonce::new(0));
        header.hash = hash;
        header
    }

    #[test]
    fn test_accepts_valid_candidate() {
        let (shared, mut validator) = setup(FixedChecksum(40_000), 3);

        shared.submit(candidate(&shared, 1, 1_000, 40_000));
        let verdict = validator.process_pending().unwrap();

        assert_matches!(verdict, Verdict::Accepted { block, template } => {
            assert_eq!(block.height, 1);
            assert_eq!(template.height, 2);
            assert_eq!(template.prev_hash, 40_000);
        });
        assert_eq!(shared.chain().height(), 1);
        assert_eq!(shared.snapshot().height, 2);
        assert_eq!(shared.snapshot().prev_hash, 40_000);
        assert!(shared.lock().pending().is_none());
        assert_eq!(validator.state(), ValidatorState::Idle);
    }

    #[test]
    fn test_rejects_checksum_above_target() {
        let (shared, mut validator) = setup(FixedChecksum(70_000), 3);

        shared.submit(candidate(&shared, 1, 1_000, 70_000));
        let verdict = validator.process_pending().unwrap();

        assert_matches!(
            verdict,
            Verdict::Rejected { reason: Rejection::TargetNotMet { hash: 70_000, threshold: 65_535 }, .. }
        );
        assert_eq!(shared.chain().height(), 0);
        assert_eq!(validator.stats().rejected_for("hash"), 1);
    }

    #[test]
    fn test_rejects_forged_hash() {
        let (shared, mut validator) = setup(Crc32Checksum, 3);

        let forged = candidate(&shared, 5, 1_000, 12_245_933);
        shared.submit(forged);
        let verdict = validator.process_pending().unwrap();

        assert_matches!(verdict, Verdict::Rejected { reason: Rejection::HashMismatch { claimed: 12_245_933, .. }, .. });
        assert_eq!(shared.chain().len(), 1);
    }

    #[test]
    fn test_rejects_wrong_height_and_is_idempotent() {
        let (shared, mut validator) = setup(FixedChecksum(100), 10);

        let first = candidate(&shared, 1, 1_000, 100);
        shared.submit(first);
        assert!(validator.process_pending().unwrap().is_accepted());

        for _ in 0..3 {
            shared.submit(first);
            let verdict = validator.process_pending().unwrap();
            assert_matches!(
                verdict,
                Verdict::Rejected { reason: Rejection::HeightMismatch { expected: 2, received: 1 }, .. }
            );
        }

        let chain = shared.chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(*chain.head(), first);
    }

    #[test]
    fn test_rejects_future_height() {
        let (shared, mut validator) = setup(FixedChecksum(100), 10);

        let mut future = candidate(&shared, 1, 1_000, 100);
        future.height = 7;
        shared.submit(future);

        assert_matches!(
            validator.process_pending(),
            Some(Verdict::Rejected { reason: Rejection::HeightMismatch { expected: 1, received: 7 }, .. })
        );
    }

    #[test]
    fn test_rejects_prev_hash_mismatch() {
        let (shared, mut validator) = setup(FixedChecksum(100), 10);

        let mut fork = candidate(&shared, 1, 1_000, 100);
        fork.prev_hash = 0xabcd;
        shared.submit(fork);

        let verdict = validator.process_pending().unwrap();
        assert_matches!(verdict, Verdict::Rejected { reason, .. } => {
            assert_eq!(reason, Rejection::PrevHashMismatch { expected: 0, received: 0xabcd });
            assert_eq!(reason.field(), "prev_hash");
        });
    }

    #[test]
    fn test_rejects_timestamp_regression() {
        let (shared, mut validator) = setup(FixedChecksum(100), 10);

        shared.submit(candidate(&shared, 1, 1_000, 100));
        assert!(validator.process_pending().unwrap().is_accepted());

        shared.submit(candidate(&shared, 2, 999, 100));
        assert_matches!(
            validator.process_pending(),
            Some(Verdict::Rejected { reason: Rejection::StaleTimestamp { head: 1_000, received: 999 }, .. })
        );

        shared.submit(candidate(&shared, 2, 1_000, 100));
        assert!(validator.process_pending().unwrap().is_accepted());
    }

    #[test]
    fn test_genesis_timestamp_is_not_checked() {
        let (shared, mut validator) = setup(FixedChecksum(100), 10);

        shared.submit(candidate(&shared, 1, 0, 100));
        assert!(validator.process_pending().unwrap().is_accepted());
    }

    #[test]
    fn test_rejects_claimed_difficulty() {
        let (shared, mut validator) = setup(FixedChecksum(70_000), 10);

        // Difficulty 0 makes 70000 meet the claimed target, but not the chain's.
        let mut easy = candidate(&shared, 1, 1_000, 70_000);
        easy.difficulty = 0;
        shared.submit(easy);
        assert_matches!(
            validator.process_pending(),
            Some(Verdict::Rejected { reason: Rejection::DifficultyMismatch { expected: 16, received: 0 }, .. })
        );

        let mut nonsense = candidate(&shared, 1, 1_000, 70_000);
        nonsense.difficulty = 40;
        shared.submit(nonsense);
        assert_matches!(
            validator.process_pending(),
            Some(Verdict::Rejected { reason: Rejection::InvalidDifficulty { claimed: 40 }, .. })
        );
        assert_eq!(validator.stats().rejected_for("difficulty"), 2);
    }

    #[test]
    fn test_mailbox_overwrite_examines_one_candidate() {
        let shared = SharedState::new(16);
        let first = candidate(&shared, 1, 1_000, 100);
        let second = candidate(&shared, 2, 1_000, 200);

        let mut table = TableChecksum::default();
        table.insert(&first, 100);
        table.insert(&second, 200);
        let mut validator = Validator::new(Arc::clone(&shared), Arc::new(table), 10);

        shared.submit(first);
        shared.submit(second);

        assert!(validator.process_pending().unwrap().is_accepted());
        assert!(validator.process_pending().is_none());

        let chain = shared.chain();
        assert_eq!(chain.height(), 1);
        assert!([100, 200].contains(&chain.head().hash));
        assert_eq!(validator.stats().examined, 1);
        assert_eq!(validator.stats().accepted, 1);
    }

    #[test]
    fn test_halts_after_bound() {
        let (shared, mut validator) = setup(FixedChecksum(40_000), 100);

        for height in 1..=100u64 {
            shared.submit(candidate(&shared, 1, 1_000 + height, 40_000));
            assert!(validator.process_pending().unwrap().is_accepted());
            assert_eq!(validator.state(), ValidatorState::Idle);
        }

        shared.submit(candidate(&shared, 1, 2_000, 40_000));
        assert!(validator.process_pending().unwrap().is_accepted());
        assert!(validator.is_halted());
        assert_eq!(shared.chain().height(), 101);

        // Nothing further is examined once halted.
        shared.submit(candidate(&shared, 1, 2_001, 40_000));
        assert!(validator.process_pending().is_none());
        assert_eq!(shared.chain().height(), 101);
    }

    #[tokio::test]
    async fn test_run_broadcasts_stop_when_halted() {
        let (shared, validator) = setup(FixedChecksum(40_000), 1);
        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(validator.run(cancellation.clone()));

        for height in 1..=2u64 {
            shared.submit(candidate(&shared, 1, 1_000, 40_000));
            tokio::time::timeout(Duration::from_secs(5), async {
                while shared.chain().height() < height {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("validator should accept the candidate");
        }

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("validator should halt")
            .unwrap();

        assert!(cancellation.is_cancelled());
        assert_eq!(stats.accepted, 2);
        assert_eq!(shared.chain().height(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let (_shared, validator) = setup(FixedChecksum(40_000), 100);
        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(validator.run(cancellation.clone()));

        cancellation.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("validator should stop")
            .unwrap();
        assert_eq!(stats.examined, 0);
    }
}
