use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::environment::{Environment, Offspring, Parasite};
use crate::fault::{FaultLocation, FaultSeverity};
use crate::hardware::Hardware;
use crate::head::Head;
use crate::inst::{InstSet, Instruction};
use crate::label::{CodeLabel, MAX_SPACE_LABEL_SIZE};
use crate::memory::{MemorySpace, SiteFlags, SpaceBank};
use crate::mutation::{mutate_offspring, substitute_sites};
use crate::thread::{GenotypeId, HEAD_WRITE, ThreadContext};

/// What happens to the parent after a successful divide.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivideMethod {
    /// The parent carries on where it was.
    #[default]
    Offspring,
    /// The parent hardware is reset as if newly born.
    Split,
    /// Only the dividing thread starts over, or dies if others remain.
    Birth,
}

/// How new sites in a growing memory space are filled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocMethod {
    /// Neutral fill with the default instruction.
    #[default]
    Default,
    /// Reuse whatever the space held before it was last vacated.
    Necro,
    /// Uniformly random instructions.
    Random,
}

impl AllocMethod {
    /// Grow `space` to `len` sites.
    pub(crate) fn grow(
        self,
        space: &mut MemorySpace,
        len: usize,
        inst_set: &InstSet,
        rng: &mut SmallRng,
    ) {
        let old = space.len();
        let fill = inst_set.default_inst();
        match self {
            AllocMethod::Default => space.resize(len, fill),
            AllocMethod::Necro => space.resize_reusing(len, fill),
            AllocMethod::Random => {
                space.resize(len, fill);
                for pos in old..len {
                    space.set(pos, inst_set.random_inst(rng));
                }
            }
        }
    }

    /// Shrink `space` back to the single site a fresh space holds.
    pub(crate) fn vacate(self, space: &mut MemorySpace, inst_set: &InstSet, rng: &mut SmallRng) {
        match self {
            AllocMethod::Default => space.reset_to(&[inst_set.default_inst()]),
            AllocMethod::Necro => {
                space.truncate(0);
                space.resize_reusing(1, inst_set.default_inst());
                space.clear_flags();
            }
            AllocMethod::Random => space.reset_to(&[inst_set.random_inst(rng)]),
        }
    }
}

/// Site counts a viability check looks at.
#[derive(Clone, Copy, Debug)]
struct DivideSizes {
    /// Length of the genome the organism was born with.
    genome: usize,
    /// Length of the main space after the child leaves.
    parent: usize,
    child: usize,
    executed: usize,
    copied: usize,
}

impl Hardware {
    /// Index of the free space the write head is building, if it is one.
    fn write_space(&self, write: &Head) -> Option<usize> {
        let space = write.space() % self.spaces.len();
        (space != 0 && write.current() == self.id).then_some(space)
    }

    fn divide_sizes(&self, space: usize, write: &Head) -> DivideSizes {
        let main = self.spaces.get(0);
        let building = self.spaces.get(space);
        let child = write.pos().min(building.len());
        DivideSizes {
            genome: self.genome_len,
            parent: main.len(),
            child,
            executed: main.count_flag(SiteFlags::EXECUTED),
            copied: building.sites()[..child]
                .iter()
                .filter(|s| s.flags.contains(SiteFlags::COPIED))
                .count(),
        }
    }

    /// Allowed child and parent lengths: the absolute genome bounds, narrowed
    /// by `child_size_range` around the birth genome length when set.
    fn size_bounds(&self, genome: usize) -> (usize, usize) {
        let config = &self.config;
        match config.child_size_range {
            Some(range) => (
                config.min_genome_size.max((genome as f64 / range) as usize),
                config.max_genome_size.min((genome as f64 * range) as usize),
            ),
            None => (config.min_genome_size, config.max_genome_size),
        }
    }

    /// Reason a divide of this size must be refused, or `None` when viable.
    ///
    /// Line thresholds truncate, so a 9-site parent needs 4 executed sites at
    /// a 0.5 ratio.
    fn divide_rejection(&self, sizes: DivideSizes) -> Option<String> {
        let config = &self.config;
        let (min, max) = self.size_bounds(sizes.genome);
        if !(min..=max).contains(&sizes.child) {
            return Some(format!("child size {} outside {min}..={max}", sizes.child));
        }
        if !(min..=max).contains(&sizes.parent) {
            return Some(format!("parent size {} outside {min}..={max}", sizes.parent));
        }
        let min_executed = (sizes.parent as f64 * config.min_exe_lines) as usize;
        if sizes.executed < min_executed {
            return Some(format!(
                "only {} of {} parent sites executed",
                sizes.executed, sizes.parent
            ));
        }
        let min_copied = (sizes.child as f64 * config.min_copied_lines) as usize;
        if sizes.copied < min_copied {
            return Some(format!(
                "only {} of {} child sites copied",
                sizes.copied, sizes.child
            ));
        }
        None
    }

    /// Split off the space under construction as a child.
    ///
    /// On rejection a Divide error is raised and nothing changes. On success
    /// the child, after divide-time mutations, is handed to the environment
    /// and the write space is vacated under the allocation policy.
    pub fn divide<E: Environment + ?Sized>(&mut self, env: &mut E) -> bool {
        if !env.replication_ready() {
            return self.fault(
                env,
                FaultLocation::Divide,
                FaultSeverity::Error,
                "organism is not ready to replicate",
            );
        }
        if self.ip().space() % self.spaces.len() != 0 {
            return self.fault(
                env,
                FaultLocation::Divide,
                FaultSeverity::Error,
                "divide executed outside the main genome",
            );
        }
        let write = self.head(HEAD_WRITE);
        let Some(space) = self.write_space(&write) else {
            return self.fault(
                env,
                FaultLocation::Divide,
                FaultSeverity::Error,
                "write head is not in an offspring space",
            );
        };
        let sizes = self.divide_sizes(space, &write);
        if let Some(reason) = self.divide_rejection(sizes) {
            return self.fault(env, FaultLocation::Divide, FaultSeverity::Error, reason);
        }

        let genome: Vec<Instruction> = self.spaces.get(space).sites()[..sizes.child]
            .iter()
            .map(|s| s.inst)
            .collect();
        let mut child = SpaceBank::new(self.id, self.config.write_protect);
        child.reset(&genome);
        let mut mutations = mutate_offspring(
            &mut child,
            &self.inst_set,
            env.rng(),
            self.config.mutation.divide_rates(),
            self.config.min_genome_size,
            self.config.max_genome_size,
        );
        mutations.parent = substitute_sites(
            self.spaces.get_mut(0),
            &self.inst_set,
            env.rng(),
            self.config.mutation.parent_mut_prob,
            SiteFlags::MUTATED,
        );
        self.stats.mutations.record_divide(&mutations);
        self.stats.divides += 1;

        self.config
            .alloc_method
            .vacate(self.spaces.get_mut(space), &self.inst_set, env.rng());
        self.adjust_heads();
        self.ft_cost = self
            .inst_set
            .entries()
            .iter()
            .map(|e| e.first_time_cost)
            .collect();

        let offspring = Offspring {
            genome: child.get(0).genome(),
            parent: self.id,
            lineage: env.genotype(),
            mutations,
            parent_size: sizes.parent,
            executed_size: sizes.executed,
            copied_size: sizes.copied,
        };
        trace!(
            hardware = self.id.0,
            size = offspring.genome.len(),
            mutations = mutations.total(),
            "divide"
        );
        if !env.receive_offspring(offspring) {
            return true;
        }

        match self.config.divide_method {
            DivideMethod::Offspring => return true,
            DivideMethod::Split => self.reset(),
            DivideMethod::Birth => {
                let threads = self.threads.len();
                if (!self.modified() && threads > 1) || threads > 2 {
                    self.kill_thread();
                } else {
                    let t = self.cur_thread;
                    self.threads[t].reset_heads_and_stacks(0);
                }
            }
        }
        self.thread_mut().advance_ip = false;
        true
    }

    /// Grow the write head's space by `size` sites under the allocation
    /// policy. Returns the new length.
    pub(crate) fn allocate<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        size: i32,
    ) -> Option<usize> {
        if size <= 0 {
            self.fault(
                env,
                FaultLocation::Alloc,
                FaultSeverity::Error,
                format!("cannot allocate {size} sites"),
            );
            return None;
        }
        let write = self.head(HEAD_WRITE);
        let Some(space) = self.write_space(&write) else {
            self.fault(
                env,
                FaultLocation::Alloc,
                FaultSeverity::Error,
                "write head is not in an offspring space",
            );
            return None;
        };
        let len = self.spaces.get(space).len();
        if len > 1 {
            self.fault(
                env,
                FaultLocation::Alloc,
                FaultSeverity::Error,
                "space already allocated",
            );
            return None;
        }
        let new_len = len + size as usize;
        if new_len > self.config.max_genome_size {
            self.fault(
                env,
                FaultLocation::Alloc,
                FaultSeverity::Error,
                format!(
                    "allocation to {new_len} exceeds {}",
                    self.config.max_genome_size
                ),
            );
            return None;
        }
        self.config
            .alloc_method
            .grow(self.spaces.get_mut(space), new_len, &self.inst_set, env.rng());
        Some(new_len)
    }

    /// Send the write head's space out as parasite code, labelled by the
    /// nops following the instruction.
    pub fn inject<E: Environment + ?Sized>(&mut self, env: &mut E) -> bool {
        self.read_label(MAX_SPACE_LABEL_SIZE);
        let label = self.label().clone();
        let write = self.head(HEAD_WRITE);
        let Some(space) = self.write_space(&write) else {
            return self.fault(
                env,
                FaultLocation::Inject,
                FaultSeverity::Error,
                "write head is not in an offspring space",
            );
        };
        let end = write.pos().min(self.spaces.get(space).len());
        if end == 0 {
            return self.fault(
                env,
                FaultLocation::Inject,
                FaultSeverity::Error,
                "empty memory space",
            );
        }
        if end < self.config.min_inject_size {
            self.config
                .alloc_method
                .vacate(self.spaces.get_mut(space), &self.inst_set, env.rng());
            self.adjust_heads();
            return self.fault(
                env,
                FaultLocation::Inject,
                FaultSeverity::Error,
                format!("{end} sites is too short to inject"),
            );
        }

        let code: Vec<Instruction> = self.spaces.get(space).sites()[..end]
            .iter()
            .map(|s| s.inst)
            .collect();
        let mut bank = SpaceBank::new(self.id, self.config.write_protect);
        bank.reset(&code);
        mutate_offspring(
            &mut bank,
            &self.inst_set,
            env.rng(),
            self.config.mutation.inject_rates(),
            self.config.min_inject_size,
            self.config.max_genome_size,
        );
        self.config
            .alloc_method
            .vacate(self.spaces.get_mut(space), &self.inst_set, env.rng());
        self.adjust_heads();

        let parasite = Parasite {
            label,
            code: bank.get(0).genome(),
            source: self.id,
            owner: env.genotype(),
        };
        if !env.inject_parasite(parasite) {
            return self.fault(
                env,
                FaultLocation::Inject,
                FaultSeverity::Warning,
                "no host accepted the injection",
            );
        }
        self.stats.injects += 1;
        trace!(hardware = self.id.0, size = end, "inject");
        true
    }

    /// Host side of an injection: install `code` in a new space registered
    /// under `label` and start a thread at its first site.
    ///
    /// Refused for an empty label or code, a label already in use, or when
    /// no thread slot is free.
    pub fn inject_host(
        &mut self,
        label: &CodeLabel,
        code: &[Instruction],
        owner: Option<GenotypeId>,
    ) -> bool {
        if label.is_empty() || self.space_labels.contains_key(label) {
            return false;
        }
        if self.inst_set.check_genome(code).is_err() {
            return false;
        }
        if self.threads.len() >= self.config.max_threads {
            return false;
        }
        let Some(id) = self.thread_ids.claim() else {
            return false;
        };
        let mut space = MemorySpace::from_genome(code);
        for pos in 0..space.len() {
            space.set_flag(pos, SiteFlags::INJECTED);
        }
        let index = self.spaces.push(space);
        self.space_labels.insert(label.clone(), index);
        let mut thread = ThreadContext::new(id, self.id, index);
        thread.owner = owner;
        self.threads.push(thread);
        trace!(hardware = self.id.0, space = index, thread = id, "parasite installed");
        true
    }
}
