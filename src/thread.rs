use crate::head::Head;
use crate::label::CodeLabel;
use crate::memory::HardwareId;
use crate::stack::{CpuStack, NUM_LOCAL_STACKS};

pub const NUM_HEADS: usize = 4;
pub const HEAD_IP: usize = 0;
pub const HEAD_READ: usize = 1;
pub const HEAD_WRITE: usize = 2;
pub const HEAD_FLOW: usize = 3;

/// Upper bound on live threads per hardware instance; ids come from a 32-bit
/// chart.
pub const MAX_THREAD_IDS: usize = 32;

/// Index of a genotype in a table owned by the surrounding simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenotypeId(pub u64);

/// One cooperative execution context.
#[derive(Clone, Debug, PartialEq)]
pub struct ThreadContext {
    pub id: usize,
    pub heads: [Head; NUM_HEADS],
    /// Head selected by head-relative instructions when no nop overrides it.
    pub cur_head: usize,
    pub stacks: [CpuStack; NUM_LOCAL_STACKS],
    pub read_label: CodeLabel,
    pub next_label: CodeLabel,
    pub advance_ip: bool,
    /// Genotype that started this thread, for injected code only.
    pub owner: Option<GenotypeId>,
}

impl ThreadContext {
    pub fn new(id: usize, home: HardwareId, space: usize) -> Self {
        Self {
            id,
            heads: [Head::new(home, space); NUM_HEADS],
            cur_head: HEAD_IP,
            stacks: Default::default(),
            read_label: CodeLabel::new(),
            next_label: CodeLabel::new(),
            advance_ip: true,
            owner: None,
        }
    }

    pub fn reset(&mut self, id: usize, home: HardwareId, space: usize) {
        *self = Self::new(id, home, space);
    }

    /// Rewind every head to the start of `space` and empty the private stacks.
    pub fn reset_heads_and_stacks(&mut self, space: usize) {
        for head in &mut self.heads {
            let home = head.home();
            head.reset(home, space);
        }
        for stack in &mut self.stacks {
            stack.clear();
        }
        self.cur_head = HEAD_IP;
    }

    /// Copy of this context for a forked thread: same heads and labels,
    /// fresh private stacks.
    pub fn fork(&self, id: usize) -> Self {
        Self {
            id,
            heads: self.heads,
            cur_head: self.cur_head,
            stacks: Default::default(),
            read_label: self.read_label.clone(),
            next_label: self.next_label.clone(),
            advance_ip: true,
            owner: self.owner,
        }
    }

    pub fn ip(&self) -> &Head {
        &self.heads[HEAD_IP]
    }
}

/// Bit chart of thread ids currently in use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadIdChart(u32);

impl ThreadIdChart {
    /// Claim the lowest free id.
    pub fn claim(&mut self) -> Option<usize> {
        let id = (!self.0).trailing_zeros() as usize;
        if id >= MAX_THREAD_IDS {
            return None;
        }
        self.0 |= 1 << id;
        Some(id)
    }

    pub fn mark(&mut self, id: usize) {
        if id < MAX_THREAD_IDS {
            self.0 |= 1 << id;
        }
    }

    pub fn release(&mut self, id: usize) {
        if id < MAX_THREAD_IDS {
            self.0 &= !(1 << id);
        }
    }

    pub fn contains(&self, id: usize) -> bool {
        id < MAX_THREAD_IDS && self.0 & (1 << id) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}
