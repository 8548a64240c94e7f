//! Core types for the proof-of-work ledger
//!
//! Block headers, the mining template workers race on, and the numeric
//! difficulty target every accepted header must satisfy.

use crate::{Error, Result};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// Mining target: the highest checksum a header may have to be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    threshold: u32,
}

impl Target {
    /// Number of bits in a checksum
    pub const CHECKSUM_BITS: u32 = u32::BITS;

    /// Create a target from a raw threshold
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Target for a difficulty: `2^(32 - difficulty) - 1`
    pub fn from_difficulty(difficulty: u32) -> Result<Self> {
        if difficulty > Self::CHECKSUM_BITS {
            return Err(Error::config(format!(
                "Invalid difficulty {}: must be between 0 and {}",
                difficulty,
                Self::CHECKSUM_BITS
            )));
        }

        let threshold = (1u64 << (Self::CHECKSUM_BITS - difficulty)) - 1;
        Ok(Self::new(threshold as u32))
    }

    /// Highest acceptable checksum
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Check if a checksum meets this target
    pub fn is_met_by(&self, checksum: u32) -> bool {
        checksum <= self.threshold
    }

    /// Get difficulty level (number of leading zero bits required)
    pub fn difficulty_level(&self) -> u32 {
        self.threshold.leading_zeros()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.threshold)
    }
}

/// Proof-of-work nonce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the nonce value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Increment nonce
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// The nonce following this one
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the worker that relayed a header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinerId(pub u32);

impl MinerId {
    /// Reserved for the genesis block
    pub const GENESIS: MinerId = MinerId(0);

    /// Create a new miner ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the miner ID value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MinerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One chain entry, or a candidate for the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Position in the chain, genesis is 0
    pub height: u64,
    /// Seconds since the Unix epoch, set while mining
    pub timestamp: u64,
    /// Checksum of the preimage
    pub hash: u32,
    /// Hash of the predecessor
    pub prev_hash: u32,
    /// Leading zero bits implied by the target
    pub difficulty: u32,
    /// Varied by miners to change the checksum
    pub nonce: Nonce,
    /// Worker that produced this header
    pub miner_id: MinerId,
}

impl BlockHeader {
    /// The first block of every chain
    pub fn genesis(difficulty: u32) -> Self {
        Self {
            height: 0,
            timestamp: 0,
            hash: 0,
            prev_hash: 0,
            difficulty,
            nonce: Nonce::default(),
            miner_id: MinerId::GENESIS,
        }
    }

    /// Whether this is a genesis block
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    /// Write the hashed fields into `buf`, replacing its contents.
    ///
    /// The preimage is the decimal form of height, timestamp, prev_hash,
    /// nonce and miner id concatenated without separators. `hash` and
    /// `difficulty` are not part of it.
    pub fn write_preimage(&self, buf: &mut Vec<u8>) {
        buf.clear();
        // Writing into a Vec cannot fail.
        let _ = write!(
            buf,
            "{}{}{}{}{}",
            self.height,
            self.timestamp,
            self.prev_hash,
            self.nonce.value(),
            self.miner_id.value()
        );
    }

    /// The hashed fields as bytes
    pub fn preimage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        self.write_preimage(&mut buf);
        buf
    }

    /// Target implied by the claimed difficulty
    pub fn target(&self) -> Result<Target> {
        Target::from_difficulty(self.difficulty)
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mined_at = Utc
            .timestamp_opt(self.timestamp as i64, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| self.timestamp.to_string());

        write!(
            f,
            "#{} by miner {} (hash {:#010x}, prev_hash {:#010x}, difficulty {}, nonce {}, mined {})",
            self.height,
            self.miner_id,
            self.hash,
            self.prev_hash,
            self.difficulty,
            self.nonce,
            mined_at
        )
    }
}

/// The header currently being raced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Template {
    /// Height of the next block
    pub height: u64,
    /// Hash of the current head
    pub prev_hash: u32,
    /// Difficulty every candidate must meet
    pub difficulty: u32,
}

impl Template {
    /// Template for the block following `head`
    pub fn after(head: &BlockHeader, difficulty: u32) -> Self {
        Self {
            height: head.height + 1,
            prev_hash: head.hash,
            difficulty,
        }
    }

    /// Fill the worker-owned fields, leaving `hash` blank
    pub fn fill(&self, miner_id: MinerId, timestamp: u64, nonce: Nonce) -> BlockHeader {
        BlockHeader {
            height: self.height,
            timestamp,
            hash: 0,
            prev_hash: self.prev_hash,
            difficulty: self.difficulty,
            nonce,
            miner_id,
        }
    }

    /// Target candidates for this template must meet
    pub fn target(&self) -> Result<Target> {
        Target::from_difficulty(self.difficulty)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "template #{} (prev_hash {:#010x}, difficulty {})",
            self.height, self.prev_hash, self.difficulty
        )
    }
}
