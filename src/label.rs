use std::fmt;

use crate::inst::{InstSet, NUM_NOPS};
use crate::memory::MemorySpace;

/// Longest label a read will collect.
pub const MAX_LABEL_SIZE: usize = 10;

/// Longest label naming a memory space (`Mem-Set`, `Inject`).
pub const MAX_SPACE_LABEL_SIZE: usize = 3;

/// A sequence of nop values read from consecutive label instructions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeLabel {
    nops: Vec<u8>,
}

impl CodeLabel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nops(nops: &[u8]) -> Self {
        let mut label = Self::new();
        for &n in nops {
            label.add_nop(n as usize);
        }
        label
    }

    pub fn len(&self) -> usize {
        self.nops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nops.is_empty()
    }

    pub fn nops(&self) -> &[u8] {
        &self.nops
    }

    pub fn clear(&mut self) {
        self.nops.clear();
    }

    /// Append one nop value. Ignored once the label is full.
    pub fn add_nop(&mut self, nop: usize) {
        if self.nops.len() < MAX_LABEL_SIZE {
            self.nops.push((nop % NUM_NOPS) as u8);
        }
    }

    /// Shift every nop by `rot` within `base`. Rotating by 2 in base 4 gives
    /// the complement label used by template search.
    pub fn rotate(&mut self, rot: usize, base: usize) {
        for n in &mut self.nops {
            *n = ((*n as usize + rot) % base) as u8;
        }
    }

    /// Numeric value of the label read as digits in `base`.
    pub fn as_int(&self, base: usize) -> u32 {
        self.nops
            .iter()
            .fold(0u32, |acc, &n| acc.wrapping_mul(base as u32).wrapping_add(n as u32))
    }

    /// Parse the text form written by `Display`.
    pub fn parse(text: &str) -> Option<Self> {
        if text == "-" {
            return Some(Self::new());
        }
        let mut label = Self::new();
        for c in text.chars() {
            let n = (c as u32).checked_sub('A' as u32)? as usize;
            if n >= NUM_NOPS {
                return None;
            }
            label.add_nop(n);
        }
        Some(label)
    }
}

/// Nop letters `A`..`D`, or `-` for the empty label.
impl fmt::Display for CodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nops.is_empty() {
            return f.write_str("-");
        }
        for &n in &self.nops {
            write!(f, "{}", (b'A' + n) as char)?;
        }
        Ok(())
    }
}

fn nop_at(space: &MemorySpace, inst_set: &InstSet, pos: i64) -> Option<usize> {
    inst_set.nop_mod(space.get(pos as usize))
}

fn matches_at(label: &CodeLabel, space: &MemorySpace, inst_set: &InstSet, offset: i64) -> bool {
    label
        .nops()
        .iter()
        .enumerate()
        .all(|(i, &n)| nop_at(space, inst_set, offset + i as i64) == Some(n as usize))
}

/// Search forward from `pos` for `label` within any run of nops.
///
/// Strides by the label length. Every window of a run found along the way is
/// tested; the result is the position just past the matching window.
pub fn find_forward(
    label: &CodeLabel,
    space: &MemorySpace,
    inst_set: &InstSet,
    pos: usize,
) -> Option<usize> {
    if label.is_empty() {
        return Some(pos);
    }
    let size = space.len() as i64;
    let label_size = label.len() as i64;
    let search_start = pos as i64;
    let mut pos = search_start + label_size;

    while pos < size {
        if nop_at(space, inst_set, pos).is_some() {
            let mut start = pos;
            let mut end = pos + 1;
            while start > search_start && nop_at(space, inst_set, start - 1).is_some() {
                start -= 1;
            }
            while end < size && nop_at(space, inst_set, end).is_some() {
                end += 1;
            }

            let max_offset = end - start - label_size + 1;
            for offset in start..start + max_offset {
                if matches_at(label, space, inst_set, offset) {
                    return Some((offset + label_size) as usize);
                }
            }
            pos = end;
        }
        pos += label_size;
    }
    None
}

/// Search backward from `pos` toward the start of the space.
///
/// Runs are bounded above by the starting position. The result is the end of
/// the run holding the match.
pub fn find_backward(
    label: &CodeLabel,
    space: &MemorySpace,
    inst_set: &InstSet,
    pos: i64,
) -> Option<usize> {
    if label.is_empty() {
        return Some(pos.max(0) as usize);
    }
    let size = space.len() as i64;
    let label_size = label.len() as i64;
    let search_start = pos.min(size);
    let mut pos = search_start - label_size;

    while pos >= 0 {
        if nop_at(space, inst_set, pos).is_some() {
            let mut start = pos;
            let mut end = pos + 1;
            while start > 0 && nop_at(space, inst_set, start - 1).is_some() {
                start -= 1;
            }
            while end < search_start && nop_at(space, inst_set, end).is_some() {
                end += 1;
            }

            let max_offset = end - start - label_size + 1;
            for offset in start..start + max_offset {
                if matches_at(label, space, inst_set, offset) {
                    return Some(end as usize);
                }
            }
            pos = start - 1;
        }
        pos -= label_size;
    }
    None
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::inst::Instruction;
    use proptest::prelude::*;

    /// Nops for values below `NUM_NOPS`, a plain instruction otherwise.
    fn space_of(ops: &[u8]) -> MemorySpace {
        let genome: Vec<Instruction> = ops
            .iter()
            .map(|&op| Instruction::new(if (op as usize) < NUM_NOPS { op } else { 8 }))
            .collect();
        MemorySpace::from_genome(&genome)
    }

    proptest! {
        #[test]
        fn backward_search_finds_forward_hit(
            ops in prop::collection::vec(0u8..6, 0..60),
            nops in prop::collection::vec(0u8..NUM_NOPS as u8, 1..4),
            start in 0usize..61,
        ) {
            let set = InstSet::standard();
            let space = space_of(&ops);
            let label = CodeLabel::from_nops(&nops);
            let pos = start.min(ops.len());
            if let Some(q) = find_forward(&label, &space, &set, pos) {
                prop_assert!(q >= pos + label.len() && q <= space.len());
                let back = find_backward(&label, &space, &set, q as i64);
                prop_assert!(back.is_some());
                let back = back.unwrap();
                prop_assert!(back >= pos && back <= q, "pos {} q {} back {}", pos, q, back);
            }
        }
    }
}
