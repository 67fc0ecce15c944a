// Reverse index over a code table, used by the encoder to turn instructions
// into opcodes.
//
// The single map finds the lowest opcode whose entry is exactly one
// instruction of a given (kind, size, mode). The compound map finds an
// opcode that encodes an already-chosen single opcode followed by one more
// instruction.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use super::code_table::{CodeTable, CodeTableError, InstKind, Instruction};

#[derive(Debug, Clone)]
pub struct InstructionMap {
    max_mode: u8,
    /// `single[slot][size]`, slot = ADD, RUN, then one per COPY mode.
    single: Vec<[Option<u8>; 256]>,
    compound: HashMap<(u8, Instruction), u8>,
}

static STANDARD: LazyLock<Arc<InstructionMap>> =
    LazyLock::new(|| Arc::new(InstructionMap::index(CodeTable::standard(), 8)));

impl InstructionMap {
    /// Map for the default code table with its nine address modes.
    pub fn standard() -> Arc<InstructionMap> {
        Arc::clone(&STANDARD)
    }

    /// Index `table` for an address cache with modes `0..=max_mode`.
    ///
    /// Fails if any instruction the encoder may emit (ADD, RUN, and COPY in
    /// every mode) lacks a size-0 opcode to fall back on.
    pub fn build(table: &CodeTable, max_mode: u8) -> Result<Self, CodeTableError> {
        let map = Self::index(table, max_mode);
        let required = [Instruction::add(0), Instruction::run(0)]
            .into_iter()
            .chain((0..=max_mode).map(|mode| Instruction::copy(0, mode)));
        for inst in required {
            if map.lookup_single(inst).is_none() {
                return Err(CodeTableError::NoFallback {
                    kind: inst.kind,
                    mode: inst.mode,
                });
            }
        }
        Ok(map)
    }

    fn index(table: &CodeTable, max_mode: u8) -> Self {
        let mut map = InstructionMap {
            max_mode,
            single: vec![[None; 256]; 3 + max_mode as usize],
            compound: HashMap::new(),
        };

        // Lowest opcode wins for each single instruction.
        for op in 0..=255u8 {
            let entry = table.get(op);
            let inst = if entry.second.is_noop() {
                entry.first
            } else if entry.first.is_noop() {
                entry.second
            } else {
                continue;
            };
            if let Some(slot) = map.slot(inst) {
                let cell = &mut map.single[slot][inst.size as usize];
                if cell.is_none() {
                    *cell = Some(op);
                }
            }
        }

        for op in 0..=255u8 {
            let entry = table.get(op);
            if !entry.is_compound() {
                continue;
            }
            let Some(prior) = map.lookup_single(entry.first) else {
                continue;
            };
            if map.slot(entry.second).is_none() {
                continue;
            }
            map.compound
                .entry((prior, canonical(entry.second)))
                .or_insert(op);
        }

        map
    }

    pub fn max_mode(&self) -> u8 {
        self.max_mode
    }

    fn slot(&self, inst: Instruction) -> Option<usize> {
        match inst.kind {
            InstKind::Noop => None,
            InstKind::Add => Some(0),
            InstKind::Run => Some(1),
            InstKind::Copy if inst.mode <= self.max_mode => Some(2 + inst.mode as usize),
            InstKind::Copy => None,
        }
    }

    /// Opcode encoding exactly `inst` and nothing else.
    #[inline]
    pub fn lookup_single(&self, inst: Instruction) -> Option<u8> {
        let slot = self.slot(inst)?;
        self.single[slot][inst.size as usize]
    }

    /// Opcode encoding the instruction(s) of `first_opcode` followed by `inst`.
    #[inline]
    pub fn lookup_combined(&self, first_opcode: u8, inst: Instruction) -> Option<u8> {
        self.compound
            .get(&(first_opcode, canonical(inst)))
            .copied()
    }
}

/// Non-COPY instructions carry no mode.
#[inline]
fn canonical(inst: Instruction) -> Instruction {
    if inst.kind == InstKind::Copy {
        inst
    } else {
        Instruction { mode: 0, ..inst }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcdiff::code_table::CodeTableEntry;

    #[test]
    fn single_lookup_is_canonical() {
        let table = CodeTable::standard();
        let map = InstructionMap::standard();
        for op in 0..=255u8 {
            let entry = table.get(op);
            if entry.is_compound() {
                continue;
            }
            let found = map.lookup_single(entry.first).unwrap();
            assert!(found <= op, "opcode {op} mapped to {found}");
            assert_eq!(table.get(found).first, entry.first);
        }
    }

    #[test]
    fn compound_lookup_reproduces_opcode() {
        let table = CodeTable::standard();
        let map = InstructionMap::standard();
        for op in 0..=255u8 {
            let entry = table.get(op);
            if !entry.is_compound() {
                continue;
            }
            let first = map.lookup_single(entry.first).unwrap();
            assert_eq!(map.lookup_combined(first, entry.second), Some(op));
        }
    }

    #[test]
    fn known_opcodes() {
        let map = InstructionMap::standard();
        assert_eq!(map.lookup_single(Instruction::run(0)), Some(0));
        assert_eq!(map.lookup_single(Instruction::add(0)), Some(1));
        assert_eq!(map.lookup_single(Instruction::add(17)), Some(18));
        assert_eq!(map.lookup_single(Instruction::add(18)), None);
        assert_eq!(map.lookup_single(Instruction::copy(4, 0)), Some(20));
        assert_eq!(map.lookup_single(Instruction::copy(0, 1)), Some(35));
        assert_eq!(map.lookup_single(Instruction::run(5)), None);

        // ADD(1) + COPY(4, mode 0)
        assert_eq!(map.lookup_combined(2, Instruction::copy(4, 0)), Some(163));
        // ADD(2) + COPY(4, mode 6)
        assert_eq!(map.lookup_combined(3, Instruction::copy(4, 6)), Some(236));
        // COPY(4, mode 0) + ADD(1)
        assert_eq!(map.lookup_combined(20, Instruction::add(1)), Some(247));
        assert_eq!(map.lookup_combined(20, Instruction::add(2)), None);
    }

    #[test]
    fn missing_fallback_is_a_configuration_error() {
        let mut entries = *CodeTable::standard().entries();
        // Replace RUN size 0 with another ADD.
        entries[0] = CodeTableEntry {
            first: Instruction::add(3),
            second: Instruction::NOOP,
        };
        let table = CodeTable::from_entries(entries);
        assert_eq!(
            InstructionMap::build(&table, 8).unwrap_err(),
            CodeTableError::NoFallback {
                kind: InstKind::Run,
                mode: 0
            }
        );
    }

    #[test]
    fn fewer_modes_ignore_higher_copy_entries() {
        let map = InstructionMap::build(CodeTable::standard(), 2).unwrap();
        assert_eq!(map.lookup_single(Instruction::copy(0, 2)), Some(51));
        assert_eq!(map.lookup_single(Instruction::copy(0, 3)), None);
    }
}
