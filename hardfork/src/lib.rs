//! Hard fork schedule tracking
//!
//! Consensus rule changes are declared up front as `(version, height,
//! time)` entries. Each block carries the version it was created under
//! (`major_version`) and the version it votes for (`minor_version`).
//! Promotion to a declared version happens at the first height, at or
//! past the declared one, where enough of the preceding blocks voted for
//! it.

use std::collections::VecDeque;

use ensure_macro::ensure;
use log::{debug, info};

/// Default width of the rolling vote window, in blocks
pub const DEFAULT_WINDOW_SIZE: usize = 10080;

/// Default percentage of window votes required to promote
pub const DEFAULT_THRESHOLD_PERCENT: u64 = 80;

/// Default grace period after a scheduled fork time before the operator
/// is told to update, in seconds
pub const DEFAULT_UPDATE_TIME: u64 = 30 * 86_400;

/// Default interval after a scheduled fork time beyond which this node
/// has likely been left on a dead branch, in seconds
pub const DEFAULT_FORKED_TIME: u64 = 90 * 86_400;

/// Default spacing of rollback checkpoints, in blocks
pub const DEFAULT_CHECKPOINT_PERIOD: u64 = 1000;

/// Type alias for schedule operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hard fork schedule operations
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// Returned when a fork entry does not strictly increase the schedule
    #[error("Fork entries must be strictly increasing in version, height and time")]
    InvalidSchedule,

    /// Returned when a block's version is not acceptable at its height
    #[error("Block version {version} rejected, current consensus version is {required}")]
    VersionRejected {
        /// The version the block carried
        version: u8,
        /// The version the schedule currently requires
        required: u8,
    },
}

/// Coarse operator-facing schedule state
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum State {
    /// This node knows every scheduled fork it has reached
    Ready,
    /// A scheduled fork time has passed without a local rule set for it
    UpdateNeeded,
    /// The schedule is so far behind that the network has likely forked
    /// away from this node
    LikelyForked,
}

/// One declared fork
#[derive(Clone, Copy, Debug)]
struct ForkEntry {
    version: u8,
    /// Earliest height at which this version may become current
    height: u64,
    /// Scheduled wall-clock activation estimate
    time: u64,
}

#[derive(Clone, Copy, Debug)]
struct Checkpoint {
    height: u64,
    fork_index: usize,
}

/// Read access to block versions, used to replay votes after a rollback
pub trait BlockVersionSource {
    /// Number of blocks on the chain
    fn height(&self) -> u64;
    /// `(major_version, minor_version)` of the block at the given height
    fn block_version(&self, height: u64) -> (u8, u8);
}

/// The hard fork schedule state machine
///
/// Holds the declared fork entries, the rolling vote window over the
/// last `window_size` blocks, and checkpoints for cheap rollback.
#[derive(Clone)]
pub struct HardFork {
    entries: Vec<ForkEntry>,
    /// Height at which each entry became current; `u64::MAX` while not
    /// yet promoted. Index-aligned with `entries`
    starting_heights: Vec<u64>,
    current_fork_index: usize,

    window_size: usize,
    threshold_percent: u64,
    update_time: u64,
    forked_time: u64,
    checkpoint_period: u64,

    votes: VecDeque<u8>,
    vote_counts: [u64; 256],
    checkpoints: Vec<Checkpoint>,
}

impl HardFork {
    /// Creates a schedule with the given base version and default tuning
    pub fn new(original_version: u8) -> Self {
        Self::with_params(
            original_version,
            DEFAULT_WINDOW_SIZE,
            DEFAULT_THRESHOLD_PERCENT,
            DEFAULT_UPDATE_TIME,
            DEFAULT_FORKED_TIME,
            DEFAULT_CHECKPOINT_PERIOD,
        )
    }

    /// Creates a schedule with explicit tuning constants
    pub fn with_params(
        original_version: u8,
        window_size: usize,
        threshold_percent: u64,
        update_time: u64,
        forked_time: u64,
        checkpoint_period: u64,
    ) -> Self {
        assert!(window_size > 0, "vote window cannot be empty");
        assert!(original_version > 0, "version 0 does not exist");
        HardFork {
            entries: vec![ForkEntry {
                version: original_version,
                height: 0,
                time: 0,
            }],
            starting_heights: vec![0],
            current_fork_index: 0,
            window_size,
            threshold_percent,
            update_time,
            forked_time,
            checkpoint_period,
            votes: VecDeque::with_capacity(window_size),
            vote_counts: [0; 256],
            checkpoints: Vec::new(),
        }
    }

    /// Declares a fork to `version` at the given height and time
    ///
    /// # Errors
    /// If the entry does not strictly increase the schedule in all of
    /// version, height and time
    pub fn add_fork(&mut self, version: u8, height: u64, time: u64) -> Result<()> {
        let last = self.entries.last().unwrap();
        ensure!(
            version > last.version && height > last.height && time > last.time,
            Error::InvalidSchedule
        );
        self.entries.push(ForkEntry {
            version,
            height,
            time,
        });
        self.starting_heights.push(u64::MAX);
        Ok(())
    }

    /// The version a newly produced block must use right now
    pub fn current_version(&self) -> u8 {
        self.entries[self.current_fork_index].version
    }

    /// The highest declared version
    pub fn ideal_version(&self) -> u8 {
        self.entries.last().unwrap().version
    }

    /// The version that governed the block at the given height
    ///
    /// Heights past the tip report the currently active version
    pub fn get(&self, height: u64) -> u8 {
        let mut version = self.entries[0].version;
        for (i, entry) in self.entries.iter().enumerate().skip(1) {
            if self.starting_heights[i] <= height {
                version = entry.version;
            } else {
                break;
            }
        }
        version
    }

    /// The height at which the given version became current
    ///
    /// Returns 0 for the base version and `u64::MAX` for versions that
    /// have not been promoted yet
    pub fn get_start_height(&self, version: u8) -> u64 {
        if version <= self.entries[0].version {
            return 0;
        }
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, entry)| entry.version >= version)
            .map(|(i, _)| self.starting_heights[i])
            .unwrap_or(u64::MAX)
    }

    /// Operator-facing schedule health at the given wall-clock time
    pub fn get_state(&self, now: u64) -> State {
        if self.current_fork_index + 1 == self.entries.len() {
            // Every declared fork has been reached
            return State::Ready;
        }
        let last_time = self.entries.last().unwrap().time;
        if now >= last_time + self.forked_time {
            State::LikelyForked
        } else if now >= last_time + self.update_time {
            State::UpdateNeeded
        } else {
            State::Ready
        }
    }

    /// The version a block at the given height would be required to meet,
    /// counting promotions the current vote window already justifies
    pub fn required_version_for(&self, height: u64) -> u8 {
        self.entries[self.promotions_for(height)].version
    }

    /// Checks whether a block with the given major version is acceptable
    /// at the given height, without recording anything
    pub fn check_block_version(&self, major_version: u8, height: u64) -> bool {
        let current = self.required_version_for(height);
        major_version != 0 && major_version >= current && major_version <= self.ideal_version()
    }

    /// Records an accepted block's version and vote at the given height
    ///
    /// Applies any promotion the preceding vote window justifies before
    /// checking the block itself.
    ///
    /// # Errors
    /// If the block's version is not acceptable at this height. The
    /// schedule still applies promotions in that case, but no vote is
    /// recorded
    pub fn add(&mut self, major_version: u8, minor_version: u8, height: u64) -> Result<()> {
        let target = self.promotions_for(height);
        while self.current_fork_index < target {
            self.current_fork_index += 1;
            self.starting_heights[self.current_fork_index] = height;
            self.push_checkpoint(height);
            info!(
                "Hard fork to version {} activates at height {}",
                self.current_version(),
                height
            );
        }

        let required = self.current_version();
        ensure!(
            major_version != 0 && major_version >= required && major_version <= self.ideal_version(),
            Error::VersionRejected {
                version: major_version,
                required,
            }
        );

        self.push_vote(std::cmp::max(major_version, minor_version));
        if self.checkpoint_period > 0 && height % self.checkpoint_period == 0 {
            self.push_checkpoint(height);
        }
        Ok(())
    }

    /// Restores the schedule to its state as of the given height
    ///
    /// Everything recorded for heights beyond `height` is forgotten: the
    /// current version is taken from the last surviving checkpoint and
    /// the vote window is replayed from the block versions still on the
    /// chain.
    pub fn reorganize_from<S: BlockVersionSource + ?Sized>(&mut self, source: &S, height: u64) {
        while matches!(self.checkpoints.last(), Some(cp) if cp.height > height) {
            self.checkpoints.pop();
        }
        for i in 1..self.entries.len() {
            if self.starting_heights[i] > height {
                self.starting_heights[i] = u64::MAX;
            }
        }
        self.current_fork_index = self
            .checkpoints
            .last()
            .map(|cp| cp.fork_index)
            .unwrap_or(0);
        debug!(
            "Hard fork schedule rewound to height {}, version {}",
            height,
            self.current_version()
        );

        self.votes.clear();
        self.vote_counts = [0; 256];
        if source.height() == 0 {
            return;
        }
        let tip = std::cmp::min(height, source.height() - 1);
        let first = (tip + 1).saturating_sub(self.window_size as u64);
        for h in first..=tip {
            let (major, minor) = source.block_version(h);
            self.push_vote(std::cmp::max(major, minor));
        }
    }

    /// Number of votes in the window for at least the given version
    fn quorum_votes(&self, version: u8) -> u64 {
        self.vote_counts[usize::from(version)..].iter().sum()
    }

    /// The fork index the vote window justifies for a block at `height`
    fn promotions_for(&self, height: u64) -> usize {
        let mut index = self.current_fork_index;
        while index + 1 < self.entries.len() {
            let next = &self.entries[index + 1];
            if height >= next.height
                && self.quorum_votes(next.version) * 100
                    >= self.window_size as u64 * self.threshold_percent
            {
                index += 1;
            } else {
                break;
            }
        }
        index
    }

    fn push_vote(&mut self, vote: u8) {
        let vote = std::cmp::max(vote, self.entries[0].version);
        while self.votes.len() >= self.window_size {
            let oldest = self.votes.pop_front().unwrap();
            self.vote_counts[usize::from(oldest)] -= 1;
        }
        self.votes.push_back(vote);
        self.vote_counts[usize::from(vote)] += 1;
    }

    fn push_checkpoint(&mut self, height: u64) {
        if let Some(last) = self.checkpoints.last_mut() {
            if last.height == height {
                last.fork_index = self.current_fork_index;
                return;
            }
        }
        self.checkpoints.push(Checkpoint {
            height,
            fork_index: self.current_fork_index,
        });
    }
}
