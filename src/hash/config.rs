// Matcher tuning.

/// Default indexed block width.
pub const DEFAULT_BLOCK_SIZE: usize = 16;

/// Default shortest COPY worth emitting.
pub const DEFAULT_MIN_MATCH: usize = 32;

/// Default number of chain entries examined per lookup.
pub const DEFAULT_MAX_PROBES: usize = 16;

/// Default shortest literal run emitted as RUN.
pub const DEFAULT_MIN_RUN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatcherConfig {
    /// Width of indexed blocks and of the rolling hash window.
    pub block_size: usize,
    /// Matches shorter than this are emitted as literals.
    pub min_match: usize,
    /// Candidates examined per hash bucket.
    pub max_probes: usize,
    /// Repeated-byte spans at least this long become RUN instructions.
    pub min_run: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            min_match: DEFAULT_MIN_MATCH,
            max_probes: DEFAULT_MAX_PROBES,
            min_run: DEFAULT_MIN_RUN,
        }
    }
}

impl MatcherConfig {
    /// Small blocks and a deep probe: slower, finds shorter matches.
    pub const THOROUGH: MatcherConfig = MatcherConfig {
        block_size: 8,
        min_match: 12,
        max_probes: 64,
        min_run: 4,
    };

    /// Large blocks and a single probe.
    pub const FAST: MatcherConfig = MatcherConfig {
        block_size: 32,
        min_match: 32,
        max_probes: 1,
        min_run: 8,
    };

    pub fn validate(&self) -> Result<(), String> {
        if self.block_size < 2 {
            return Err(format!("block size {} is below 2", self.block_size));
        }
        if self.min_match < self.block_size {
            return Err(format!(
                "minimum match {} is shorter than the block size {}",
                self.min_match, self.block_size
            ));
        }
        if self.max_probes == 0 {
            return Err("probe limit must be at least 1".into());
        }
        if self.min_run < 2 {
            return Err(format!("minimum run {} is below 2", self.min_run));
        }
        Ok(())
    }
}
