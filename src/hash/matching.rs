// Bentley-McIlroy match finding.
//
// For each target window:
//   1. Slide a `block_size` rolling hash across the window.
//   2. At each position probe the source index (and, when enabled, the
//      index of this window's already-covered bytes).
//   3. A verified match of at least `min_match` bytes, extended both ways,
//      becomes a COPY; the bytes before it become ADD/RUN literals.
//   4. Scanning resumes right after the match.
//
// The result is a list of `DeltaOp`s covering the window exactly once.

use super::config::MatcherConfig;
use super::rolling::RollingHash;
use super::table::{BlockHash, Match};
use crate::vcdiff::code_table::DeltaOp;

/// Match engine bound to one source dictionary.
pub struct MatchEngine<'s> {
    config: MatcherConfig,
    hasher: RollingHash,
    source: &'s [u8],
    source_index: BlockHash,
}

impl<'s> MatchEngine<'s> {
    /// Index `source`. `config` must pass [`MatcherConfig::validate`].
    pub fn new(config: MatcherConfig, source: &'s [u8]) -> Self {
        let hasher = RollingHash::new(config.block_size);
        let source_index = BlockHash::for_dictionary(source, &hasher, 0);
        log::debug!(
            "indexed {} source blocks of {} bytes",
            source_index.blocks_added(),
            config.block_size
        );
        Self {
            config,
            hasher,
            source,
            source_index,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn source_len(&self) -> u64 {
        self.source.len() as u64
    }

    /// Partition `target` into ADD/COPY/RUN operations.
    ///
    /// COPY addresses are in the window's address space: the whole source
    /// dictionary followed by `target` itself. Target self-references are
    /// only produced when `look_for_target_matches` is set.
    pub fn find_matches(&self, target: &[u8], look_for_target_matches: bool) -> Vec<DeltaOp> {
        let bs = self.config.block_size;
        let mut ops = Vec::new();

        if target.len() < bs {
            push_literals(&mut ops, target, self.config.min_run);
            return ops;
        }

        let mut target_index =
            look_for_target_matches.then(|| BlockHash::new(target.len(), bs, self.source_len()));

        let mut next_encode = 0usize;
        let mut pos = 0usize;
        let mut hash = self.hasher.hash(target);

        loop {
            let mut best = Match::default();
            self.source_index.find_best_match(
                hash,
                self.source,
                target,
                pos,
                next_encode,
                self.config.max_probes,
                &mut best,
            );
            if let Some(index) = &target_index {
                index.find_best_match(
                    hash,
                    target,
                    target,
                    pos,
                    next_encode,
                    self.config.max_probes,
                    &mut best,
                );
            }

            if best.len >= self.config.min_match {
                push_literals(&mut ops, &target[next_encode..best.target_start], self.config.min_run);
                log::trace!(
                    "copy {} bytes at {} from address {}",
                    best.len,
                    best.target_start,
                    best.addr
                );
                ops.push(DeltaOp::Copy {
                    len: best.len as u32,
                    addr: best.addr,
                });
                next_encode = best.target_start + best.len;
                if let Some(index) = target_index.as_mut() {
                    index.add_all_blocks_through_index(target, next_encode, &self.hasher);
                }

                pos = next_encode;
                if pos + bs > target.len() {
                    break;
                }
                hash = self.hasher.hash(&target[pos..]);
                continue;
            }

            if let Some(index) = target_index.as_mut() {
                index.add_one_index_hash(pos, hash);
            }
            if pos + bs >= target.len() {
                break;
            }
            hash = self.hasher.update(hash, target[pos], target[pos + bs]);
            pos += 1;
        }

        push_literals(&mut ops, &target[next_encode..], self.config.min_run);
        ops
    }
}

/// Emit `bytes` as ADDs, splitting out spans of one repeated byte at least
/// `min_run` long as RUNs.
fn push_literals(ops: &mut Vec<DeltaOp>, bytes: &[u8], min_run: usize) {
    let mut add_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        let run_end = bytes[i..]
            .iter()
            .position(|&b| b != byte)
            .map_or(bytes.len(), |n| i + n);
        if run_end - i >= min_run {
            if add_start < i {
                ops.push(DeltaOp::Add {
                    len: (i - add_start) as u32,
                });
            }
            ops.push(DeltaOp::Run {
                len: (run_end - i) as u32,
            });
            add_start = run_end;
        }
        i = run_end;
    }
    if add_start < bytes.len() {
        ops.push(DeltaOp::Add {
            len: (bytes.len() - add_start) as u32,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn total_len(ops: &[DeltaOp]) -> u64 {
        ops.iter().map(|op| u64::from(op.len())).sum()
    }

    /// Rebuild the target from `ops` the way a decoder would.
    fn apply(ops: &[DeltaOp], source: &[u8], target: &[u8]) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        for op in ops {
            match *op {
                DeltaOp::Add { len } => {
                    let at = out.len();
                    out.extend_from_slice(&target[at..at + len as usize]);
                }
                DeltaOp::Run { len } => {
                    let byte = target[out.len()];
                    out.resize(out.len() + len as usize, byte);
                }
                DeltaOp::Copy { len, addr } => {
                    for i in 0..len as u64 {
                        let a = (addr + i) as usize;
                        let byte = if a < source.len() { source[a] } else { out[a - source.len()] };
                        out.push(byte);
                    }
                }
            }
        }
        out
    }

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut x = seed | 1;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                (x >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn no_source_no_repeats_is_one_add() {
        let engine = MatchEngine::new(MatcherConfig::default(), &[]);
        let target = b"Hello, world!";
        assert_eq!(
            engine.find_matches(target, true),
            vec![DeltaOp::Add { len: 13 }]
        );
    }

    #[test]
    fn identical_source_is_one_copy() {
        let source = pseudo_random(4096, 1);
        let engine = MatchEngine::new(MatcherConfig::default(), &source);
        let ops = engine.find_matches(&source, true);
        assert_eq!(ops, vec![DeltaOp::Copy { len: 4096, addr: 0 }]);
    }

    #[test]
    fn edit_in_the_middle() {
        let source = pseudo_random(2048, 2);
        let mut target = source.clone();
        target[1000..1010].copy_from_slice(b"0123456789");

        let engine = MatchEngine::new(MatcherConfig::default(), &source);
        let ops = engine.find_matches(&target, true);
        assert_eq!(total_len(&ops), target.len() as u64);
        assert_eq!(apply(&ops, &source, &target), target);
        let copied: u64 = ops
            .iter()
            .filter(|op| matches!(op, DeltaOp::Copy { .. }))
            .map(|op| u64::from(op.len()))
            .sum();
        assert!(copied >= 2000, "copied only {copied} bytes: {ops:?}");
    }

    #[test]
    fn target_self_copy_only_when_enabled() {
        let block = pseudo_random(100, 9);
        let mut target = block.clone();
        target.extend_from_slice(&block);
        let engine = MatchEngine::new(MatcherConfig::default(), &[]);

        let with = engine.find_matches(&target, true);
        assert!(with.iter().any(|op| matches!(op, DeltaOp::Copy { .. })));
        assert_eq!(apply(&with, &[], &target), target);

        let without = engine.find_matches(&target, false);
        assert!(without.iter().all(|op| !matches!(op, DeltaOp::Copy { .. })));
        assert_eq!(total_len(&without), 200);
    }

    #[test]
    fn target_copy_addresses_follow_source() {
        let source = pseudo_random(64, 41);
        let block = pseudo_random(80, 43);
        let mut target = block.clone();
        target.extend_from_slice(&block);

        let engine = MatchEngine::new(MatcherConfig::default(), &source);
        let ops = engine.find_matches(&target, true);
        assert!(ops.contains(&DeltaOp::Copy { len: 80, addr: 64 }), "{ops:?}");
        assert_eq!(apply(&ops, &source, &target), target);
    }

    #[test]
    fn literal_runs_become_run_ops() {
        let engine = MatchEngine::new(MatcherConfig::default(), &[]);
        let mut target = b"ab".to_vec();
        target.extend_from_slice(&[b'z'; 9]);
        target.extend_from_slice(b"cd");
        let ops = engine.find_matches(&target, false);
        assert_eq!(
            ops,
            vec![
                DeltaOp::Add { len: 2 },
                DeltaOp::Run { len: 9 },
                DeltaOp::Add { len: 2 },
            ]
        );
    }

    #[test]
    fn short_targets_are_literal() {
        let source = b"abcdefghijklmnopqrstuvwxyz".to_vec();
        let engine = MatchEngine::new(MatcherConfig::default(), &source);
        for len in 0..16 {
            let ops = engine.find_matches(&source[..len], true);
            assert_eq!(total_len(&ops), len as u64);
            assert!(ops.iter().all(|op| !matches!(op, DeltaOp::Copy { .. })));
        }
    }

    #[test]
    fn source_shorter_than_block_never_copies() {
        let source = b"short".to_vec();
        let engine = MatchEngine::new(MatcherConfig::default(), &source);
        let target = pseudo_random(300, 6);
        let ops = engine.find_matches(&target, false);
        assert_eq!(ops, vec![DeltaOp::Add { len: 300 }]);
    }

    #[test]
    fn thorough_preset_finds_shorter_matches() {
        let source = pseudo_random(512, 7);
        let mut target = Vec::new();
        for chunk in source.chunks(20).take(10) {
            target.extend_from_slice(chunk);
            target.extend_from_slice(b"##");
        }
        let default = MatchEngine::new(MatcherConfig::default(), &source).find_matches(&target, false);
        let thorough = MatchEngine::new(MatcherConfig::THOROUGH, &source).find_matches(&target, false);
        let copies = |ops: &[DeltaOp]| ops.iter().filter(|op| matches!(op, DeltaOp::Copy { .. })).count();
        assert_eq!(copies(&default), 0);
        assert!(copies(&thorough) > 0);
        assert_eq!(apply(&thorough, &source, &target), target);
    }
}
