use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::HardwareConfig;
use crate::environment::Environment;
use crate::error::Result;
use crate::fault::{Fault, FaultLocation, FaultSeverity};
use crate::head::Head;
use crate::inst::{InstSet, Instruction};
use crate::label::{self, CodeLabel};
use crate::memory::{HardwareId, MemorySpace, SiteFlags, SpaceBank};
use crate::mutation::MutationStats;
use crate::stack::{CpuStack, NUM_GLOBAL_STACKS, NUM_STACKS, StackSlot, stack_slot};
use crate::thread::{HEAD_IP, NUM_HEADS, ThreadContext, ThreadIdChart};

/// Counters an external tracer can read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HardwareStats {
    pub mutations: MutationStats,
    /// Calls to `single_process`.
    pub cycles: u64,
    /// Instructions whose handler ran.
    pub executed: u64,
    /// Instructions that lost the failure roll.
    pub failed: u64,
    pub faults: u64,
    pub divides: u64,
    pub injects: u64,
}

/// One organism's virtual CPU.
///
/// Owns its memory spaces, the shared stack bank and the thread contexts.
/// The instruction set and configuration are shared, read-only handles.
pub struct Hardware {
    pub(crate) id: HardwareId,
    pub(crate) config: Arc<HardwareConfig>,
    pub(crate) inst_set: Arc<InstSet>,
    pub(crate) spaces: SpaceBank,
    pub(crate) global_stacks: [CpuStack; NUM_GLOBAL_STACKS],
    pub(crate) threads: Vec<ThreadContext>,
    pub(crate) cur_thread: usize,
    pub(crate) thread_ids: ThreadIdChart,
    pub(crate) space_labels: BTreeMap<CodeLabel, usize>,
    /// Length of the genome last loaded, the reference for divide bounds.
    pub(crate) genome_len: usize,
    pub(crate) inst_cost: Vec<u32>,
    pub(crate) ft_cost: Vec<u32>,
    pub(crate) stats: HardwareStats,
}

impl Hardware {
    pub fn new(id: HardwareId, config: Arc<HardwareConfig>, inst_set: Arc<InstSet>) -> Self {
        let spaces = SpaceBank::new(id, config.write_protect);
        let mut hw = Self {
            id,
            config,
            inst_set,
            spaces,
            global_stacks: Default::default(),
            threads: Vec::new(),
            cur_thread: 0,
            thread_ids: ThreadIdChart::default(),
            space_labels: BTreeMap::new(),
            genome_len: 0,
            inst_cost: Vec::new(),
            ft_cost: Vec::new(),
            stats: HardwareStats::default(),
        };
        hw.reset();
        hw
    }

    /// Build a hardware instance running `genome`.
    pub fn with_genome(
        id: HardwareId,
        config: Arc<HardwareConfig>,
        inst_set: Arc<InstSet>,
        genome: &[Instruction],
    ) -> Result<Self> {
        let mut hw = Self::new(id, config, inst_set);
        hw.load_genome(genome)?;
        Ok(hw)
    }

    /// Return to a freshly started state: one thread at the start of the main
    /// genome, empty stacks, no extra memory spaces. Genome contents are kept.
    pub fn reset(&mut self) {
        self.spaces.retain_main();
        self.global_stacks = Default::default();
        self.thread_ids.clear();
        self.threads.clear();
        let id = self.thread_ids.claim().unwrap_or(0);
        self.threads.push(ThreadContext::new(id, self.id, 0));
        self.cur_thread = 0;
        self.space_labels.clear();
        self.reset_costs();
    }

    pub(crate) fn reset_costs(&mut self) {
        self.inst_cost = self.inst_set.entries().iter().map(|e| e.cost).collect();
        self.ft_cost = self
            .inst_set
            .entries()
            .iter()
            .map(|e| e.first_time_cost)
            .collect();
    }

    /// Replace the main genome and reset. Fails on an empty genome or one
    /// holding opcodes outside the instruction set.
    pub fn load_genome(&mut self, genome: &[Instruction]) -> Result<()> {
        self.inst_set.check_genome(genome)?;
        self.spaces.reset(genome);
        self.genome_len = genome.len();
        self.stats = HardwareStats::default();
        self.reset();
        Ok(())
    }

    pub fn id(&self) -> HardwareId {
        self.id
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    pub fn inst_set(&self) -> &InstSet {
        &self.inst_set
    }

    pub fn spaces(&self) -> &SpaceBank {
        &self.spaces
    }

    pub fn spaces_mut(&mut self) -> &mut SpaceBank {
        &mut self.spaces
    }

    pub fn memory(&self, space: usize) -> &MemorySpace {
        self.spaces.get(space)
    }

    /// Current contents of the main genome.
    pub fn genome(&self) -> Vec<Instruction> {
        self.spaces.get(0).genome()
    }

    pub fn genome_len(&self) -> usize {
        self.genome_len
    }

    pub fn stats(&self) -> &HardwareStats {
        &self.stats
    }

    /// True once a head homed elsewhere has written into this hardware.
    pub fn modified(&self) -> bool {
        self.spaces.modified()
    }

    // --------  Threads  --------

    pub fn threads(&self) -> &[ThreadContext] {
        &self.threads
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn cur_thread(&self) -> usize {
        self.cur_thread
    }

    pub fn thread(&self) -> &ThreadContext {
        &self.threads[self.cur_thread]
    }

    pub fn thread_mut(&mut self) -> &mut ThreadContext {
        &mut self.threads[self.cur_thread]
    }

    pub fn next_thread(&mut self) {
        self.cur_thread += 1;
        if self.cur_thread >= self.threads.len() {
            self.cur_thread = 0;
        }
    }

    pub fn prev_thread(&mut self) {
        if self.cur_thread == 0 {
            self.cur_thread = self.threads.len() - 1;
        } else {
            self.cur_thread -= 1;
        }
    }

    pub fn select_thread(&mut self, index: usize) -> bool {
        if index >= self.threads.len() {
            return false;
        }
        self.cur_thread = index;
        true
    }

    /// Clone the current thread. The copy shares heads and labels but gets
    /// fresh private stacks. Fails at the thread limit.
    pub fn fork_thread(&mut self) -> bool {
        if self.threads.len() >= self.config.max_threads {
            return false;
        }
        let Some(id) = self.thread_ids.claim() else {
            return false;
        };
        let child = self.threads[self.cur_thread].fork(id);
        self.threads.push(child);
        trace!(hardware = self.id.0, thread = id, "forked thread");
        true
    }

    /// Remove the current thread. The last remaining thread cannot be killed.
    ///
    /// Later threads shift down and keep their order. Selection steps back one
    /// thread so the next cycle's rotation lands on the thread that followed
    /// the killed one.
    pub fn kill_thread(&mut self) -> bool {
        if self.threads.len() <= 1 {
            return false;
        }
        let kill = self.cur_thread;
        let killed = self.threads.remove(kill);
        self.thread_ids.release(killed.id);
        self.cur_thread = if kill == 0 {
            self.threads.len() - 1
        } else {
            kill - 1
        };
        trace!(hardware = self.id.0, thread = killed.id, "killed thread");
        true
    }

    // --------  Heads  --------

    /// Copy of head `id` of the current thread.
    pub fn head(&self, id: usize) -> Head {
        self.threads[self.cur_thread].heads[id % NUM_HEADS]
    }

    pub fn set_head(&mut self, id: usize, head: Head) {
        self.threads[self.cur_thread].heads[id % NUM_HEADS] = head;
    }

    pub fn ip(&self) -> Head {
        self.head(HEAD_IP)
    }

    /// Re-adjust every head of every thread, after the memory they point
    /// into changed shape.
    pub fn adjust_heads(&mut self) {
        for thread in &mut self.threads {
            for head in &mut thread.heads {
                head.adjust(&self.spaces);
            }
        }
    }

    pub(crate) fn advance_head(&mut self, id: usize) {
        let mut head = self.head(id);
        head.advance(&self.spaces);
        self.set_head(id, head);
    }

    // --------  Stacks  --------

    /// Stack `id` as seen by the current thread.
    pub fn stack(&self, id: usize) -> &CpuStack {
        match stack_slot(id) {
            StackSlot::Local(i) => &self.threads[self.cur_thread].stacks[i],
            StackSlot::Global(i) => &self.global_stacks[i],
        }
    }

    pub fn stack_mut(&mut self, id: usize) -> &mut CpuStack {
        match stack_slot(id) {
            StackSlot::Local(i) => &mut self.threads[self.cur_thread].stacks[i],
            StackSlot::Global(i) => &mut self.global_stacks[i],
        }
    }

    pub fn global_stacks(&self) -> &[CpuStack] {
        &self.global_stacks
    }

    #[inline(always)]
    pub(crate) fn push(&mut self, id: usize, value: i32) {
        self.stack_mut(id).push(value);
    }

    #[inline(always)]
    pub(crate) fn pop(&mut self, id: usize) -> i32 {
        self.stack_mut(id).pop()
    }

    #[inline(always)]
    pub(crate) fn top(&self, id: usize) -> i32 {
        self.stack(id).top()
    }

    // --------  Labels  --------

    /// Nop value of the instruction after the IP, if it is a label nop.
    fn next_nop(&self) -> Option<usize> {
        let next = self.ip().next_inst(&self.spaces)?;
        self.inst_set.nop_mod(next)
    }

    /// Step the IP onto the following nop, marking it executed, and return
    /// its value.
    pub(crate) fn consume_nop(&mut self) -> Option<usize> {
        let m = self.next_nop()?;
        let mut ip = self.ip();
        ip.advance(&self.spaces);
        ip.set_flag(&mut self.spaces, SiteFlags::EXECUTED);
        self.set_head(HEAD_IP, ip);
        Some(m)
    }

    /// Collect up to `max` nops following the IP into the current thread's
    /// label register, leaving the IP on the last one read.
    pub fn read_label(&mut self, max: usize) {
        let exe_limit = self.config.max_label_exe_size;
        let t = self.cur_thread;
        self.threads[t].next_label.clear();
        let mut count = 0;
        while count < max {
            let Some(m) = self.next_nop() else {
                break;
            };
            count += 1;
            let mut ip = self.ip();
            ip.advance(&self.spaces);
            let label = &mut self.threads[t].next_label;
            label.add_nop(m);
            if label.len() <= exe_limit {
                ip.set_flag(&mut self.spaces, SiteFlags::EXECUTED);
            }
            self.set_head(HEAD_IP, ip);
        }
    }

    /// Label register filled by the last `read_label`.
    pub fn label(&self) -> &CodeLabel {
        &self.threads[self.cur_thread].next_label
    }

    pub(crate) fn label_mut(&mut self) -> &mut CodeLabel {
        &mut self.threads[self.cur_thread].next_label
    }

    /// Locate the current label in the IP's space. Negative `direction`
    /// searches backward from the IP, positive forward from the IP, zero
    /// forward from the start of the space.
    ///
    /// Returns a head on the last nop of the match, or the IP itself when
    /// nothing matches.
    pub fn find_label(&self, direction: i32) -> Head {
        let ip = self.ip();
        let label = self.label();
        if label.is_empty() {
            return ip;
        }
        let space = ip.memory(&self.spaces);
        let found = if direction < 0 {
            label::find_backward(
                label,
                space,
                &self.inst_set,
                ip.position() as i64 - label.len() as i64,
            )
        } else if direction > 0 {
            label::find_forward(label, space, &self.inst_set, ip.pos())
        } else {
            label::find_forward(label, space, &self.inst_set, 0)
        };
        match found {
            Some(pos) => {
                let mut head = ip;
                head.set(pos as i32 - 1, &self.spaces);
                head
            }
            None => ip,
        }
    }

    /// Record what `Inst-Read` pulled in: nops extend the read label, any
    /// other instruction clears it.
    pub(crate) fn read_inst(&mut self, inst: Instruction) {
        let nop = self.inst_set.nop_mod(inst);
        let label = &mut self.threads[self.cur_thread].read_label;
        match nop {
            Some(m) => label.add_nop(m),
            None => label.clear(),
        }
    }

    // --------  Memory spaces  --------

    /// Space registered under `label`. An empty label names the main genome.
    /// Unknown labels get a new single-instruction space.
    pub fn find_space_label(&mut self, label: &CodeLabel) -> usize {
        if label.is_empty() {
            return 0;
        }
        if let Some(&space) = self.space_labels.get(label) {
            return space;
        }
        let fill = self.inst_set.default_inst();
        let space = self.spaces.push(MemorySpace::from_genome(&[fill]));
        self.space_labels.insert(label.clone(), space);
        space
    }

    pub fn space_label(&self, label: &CodeLabel) -> Option<usize> {
        if label.is_empty() {
            return Some(0);
        }
        self.space_labels.get(label).copied()
    }

    // --------  Faults  --------

    /// Report a fault to the environment and the log. Always returns `false`
    /// so handlers can end with it.
    pub(crate) fn fault<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        location: FaultLocation,
        severity: FaultSeverity,
        message: impl Into<String>,
    ) -> bool {
        let fault = Fault::new(location, severity, message);
        debug!(
            hardware = self.id.0,
            thread = self.threads[self.cur_thread].id,
            location = fault.location.name(),
            severity = ?fault.severity,
            "{}",
            fault.message
        );
        self.stats.faults += 1;
        env.fault(self.id, &fault);
        false
    }
}

/// Current thread status, one item per line.
impl fmt::Display for Hardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let thread = self.thread();
        writeln!(
            f,
            "hardware {} thread {} ({} of {})",
            self.id.0,
            thread.id,
            self.cur_thread + 1,
            self.threads.len()
        )?;
        for (name, head) in ["IP", "RH", "WH", "FH"].iter().zip(thread.heads.iter()) {
            let inst = head.inst(&self.spaces);
            writeln!(
                f,
                "{name}: {}:{} {}",
                head.space(),
                head.position(),
                self.inst_set.opcode(inst).name()
            )?;
        }
        for id in 0..NUM_STACKS {
            let stack = self.stack(id);
            write!(f, "{}X:", (b'A' + id as u8) as char)?;
            for depth in 0..3 {
                write!(f, " {}", stack.get(depth))?;
            }
            writeln!(f)?;
        }
        writeln!(f, "label: {} read: {}", thread.next_label, thread.read_label)
    }
}
