// Block index for Bentley-McIlroy matching.
//
// Data is cut into aligned blocks of `block_size` bytes. Each block's
// rolling hash selects a bucket; buckets hold the most recently added
// block and every block links to the previous one in its bucket, so a
// lookup walks candidates newest first.
//
// The source dictionary is indexed once up front. The target window gets
// its own index, filled block by block as encoding advances, so only
// bytes already covered by earlier instructions are ever referenced.

use super::rolling::{HASH_BASE, RollingHash};

/// Empty bucket / end of chain.
const NO_BLOCK: u32 = u32::MAX;

/// Best match found so far at one target position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Match {
    /// Start of the match in the target window (after left extension).
    pub target_start: usize,
    pub len: usize,
    /// Address in the window's combined source + target space.
    pub addr: u64,
}

impl Match {
    /// Longer wins; equal lengths prefer the larger (more recent) address.
    #[inline]
    pub fn replace_if_better(&mut self, len: usize, target_start: usize, addr: u64) -> bool {
        if len > self.len || (len == self.len && len > 0 && addr > self.addr) {
            *self = Match {
                target_start,
                len,
                addr,
            };
            true
        } else {
            false
        }
    }
}

pub struct BlockHash {
    block_size: usize,
    /// Address of data byte 0 in the combined address space.
    starting_offset: u64,
    data_len: usize,
    buckets: Vec<u32>,
    next_block: Vec<u32>,
    mask: u32,
    /// Start of the next block `add_one_index_hash` will accept.
    next_index_to_add: usize,
}

impl BlockHash {
    pub fn new(data_len: usize, block_size: usize, starting_offset: u64) -> Self {
        debug_assert!(block_size >= 2);
        let blocks = data_len / block_size;
        // One bucket per block is plenty; more than the hash range is waste.
        let bucket_count = blocks
            .max(1)
            .next_power_of_two()
            .min(HASH_BASE as usize);
        Self {
            block_size,
            starting_offset,
            data_len,
            buckets: vec![NO_BLOCK; bucket_count],
            next_block: vec![NO_BLOCK; blocks],
            mask: (bucket_count - 1) as u32,
            next_index_to_add: 0,
        }
    }

    /// Index every full block of `data` (the source dictionary).
    pub fn for_dictionary(data: &[u8], hasher: &RollingHash, starting_offset: u64) -> Self {
        let mut index = Self::new(data.len(), hasher.window_size(), starting_offset);
        index.add_all_blocks_through_index(data, data.len(), hasher);
        index
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn starting_offset(&self) -> u64 {
        self.starting_offset
    }

    /// Number of blocks indexed so far.
    pub fn blocks_added(&self) -> usize {
        self.next_index_to_add / self.block_size
    }

    fn add_block(&mut self, hash: u32) {
        let block = self.next_index_to_add / self.block_size;
        self.next_index_to_add += self.block_size;
        let (Some(slot), Ok(id)) = (self.next_block.get_mut(block), u32::try_from(block)) else {
            return;
        };
        if id == NO_BLOCK {
            return;
        }
        let bucket = (hash & self.mask) as usize;
        *slot = self.buckets[bucket];
        self.buckets[bucket] = id;
    }

    /// Add the block starting at `index` if it is the next one due.
    /// `hash` must be the rolling hash of that block.
    #[inline]
    pub fn add_one_index_hash(&mut self, index: usize, hash: u32) {
        if index == self.next_index_to_add && index + self.block_size <= self.data_len {
            self.add_block(hash);
        }
    }

    /// Add every pending block that starts before `end_index`.
    pub fn add_all_blocks_through_index(&mut self, data: &[u8], end_index: usize, hasher: &RollingHash) {
        let Some(last_legal) = self.data_len.checked_sub(self.block_size) else {
            return;
        };
        let end = end_index.min(last_legal + 1);
        while self.next_index_to_add < end {
            let start = self.next_index_to_add;
            let hash = hasher.hash(&data[start..]);
            self.add_block(hash);
        }
    }

    /// Probe up to `max_probes` candidate blocks for `hash` and record the
    /// longest verified match in `best`.
    ///
    /// `data` is the indexed buffer (source dictionary, or the target window
    /// itself). The match is extended left no further than
    /// `unencoded_start` and right as far as both buffers agree.
    #[allow(clippy::too_many_arguments)]
    pub fn find_best_match(
        &self,
        hash: u32,
        data: &[u8],
        target: &[u8],
        target_pos: usize,
        unencoded_start: usize,
        max_probes: usize,
        best: &mut Match,
    ) {
        let bs = self.block_size;
        let Some(probe) = target.get(target_pos..target_pos + bs) else {
            return;
        };

        let mut block = self.buckets[(hash & self.mask) as usize];
        let mut probes = 0;
        while block != NO_BLOCK && probes < max_probes {
            probes += 1;
            let cand = block as usize * bs;
            block = self.next_block[block as usize];

            // Same bucket does not mean same bytes.
            if &data[cand..cand + bs] != probe {
                continue;
            }

            let max_left = cand.min(target_pos - unencoded_start);
            let mut left = 0;
            while left < max_left && data[cand - left - 1] == target[target_pos - left - 1] {
                left += 1;
            }

            let max_right = (data.len() - cand).min(target.len() - target_pos);
            let mut right = bs;
            while right < max_right && data[cand + right] == target[target_pos + right] {
                right += 1;
            }

            best.replace_if_better(
                left + right,
                target_pos - left,
                self.starting_offset + (cand - left) as u64,
            );
        }
    }
}
