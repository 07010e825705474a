use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hardware::Hardware;
use crate::head::Head;
use crate::inst::InstSet;
use crate::memory::{MemorySpace, SiteFlags, SpaceBank};
use crate::thread::HEAD_IP;

/// Mutation probabilities. Every rate is a probability in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationRates {
    /// Chance per update of one substitution somewhere in the main genome.
    pub update_mut_prob: f64,
    /// Chance per executed instruction of a substitution at that site.
    pub exec_mut_prob: f64,
    /// Per-site substitution rate over the main genome, applied once per update.
    pub point_mut_prob: f64,
    /// Chance that a single copied instruction is replaced by a random one.
    pub copy_mut_prob: f64,
    /// Chance per copy of inserting a random instruction at the write head.
    pub copy_ins_prob: f64,
    /// Chance per copy of deleting the instruction at the write head.
    pub copy_del_prob: f64,
    /// Chance per divide of one substitution in the child.
    pub divide_mut_prob: f64,
    /// Per-site substitution rate applied to the child at divide.
    pub div_site_mut_prob: f64,
    /// Chance per divide of one insertion in the child.
    pub divide_ins_prob: f64,
    /// Chance per divide of one deletion in the child.
    pub divide_del_prob: f64,
    /// Per-site substitution rate applied to the parent at divide.
    pub parent_mut_prob: f64,
    pub inject_mut_prob: f64,
    pub inject_ins_prob: f64,
    pub inject_del_prob: f64,
}

impl Default for MutationRates {
    fn default() -> Self {
        Self {
            update_mut_prob: 0.0,
            exec_mut_prob: 0.0,
            point_mut_prob: 0.0,
            copy_mut_prob: 0.0075,
            copy_ins_prob: 0.0,
            copy_del_prob: 0.0,
            divide_mut_prob: 0.0,
            div_site_mut_prob: 0.0,
            divide_ins_prob: 0.05,
            divide_del_prob: 0.05,
            parent_mut_prob: 0.0,
            inject_mut_prob: 0.0,
            inject_ins_prob: 0.0,
            inject_del_prob: 0.0,
        }
    }
}

impl MutationRates {
    /// No mutation of any kind.
    pub fn none() -> Self {
        Self {
            copy_mut_prob: 0.0,
            divide_ins_prob: 0.0,
            divide_del_prob: 0.0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("update_mut_prob", self.update_mut_prob),
            ("exec_mut_prob", self.exec_mut_prob),
            ("point_mut_prob", self.point_mut_prob),
            ("copy_mut_prob", self.copy_mut_prob),
            ("copy_ins_prob", self.copy_ins_prob),
            ("copy_del_prob", self.copy_del_prob),
            ("divide_mut_prob", self.divide_mut_prob),
            ("div_site_mut_prob", self.div_site_mut_prob),
            ("divide_ins_prob", self.divide_ins_prob),
            ("divide_del_prob", self.divide_del_prob),
            ("parent_mut_prob", self.parent_mut_prob),
            ("inject_mut_prob", self.inject_mut_prob),
            ("inject_ins_prob", self.inject_ins_prob),
            ("inject_del_prob", self.inject_del_prob),
        ];
        for (name, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a probability, got {rate}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn divide_rates(&self) -> StructuralRates {
        StructuralRates {
            single: self.divide_mut_prob,
            per_site: self.div_site_mut_prob,
            insert: self.divide_ins_prob,
            delete: self.divide_del_prob,
        }
    }

    pub(crate) fn inject_rates(&self) -> StructuralRates {
        StructuralRates {
            single: 0.0,
            per_site: self.inject_mut_prob,
            insert: self.inject_ins_prob,
            delete: self.inject_del_prob,
        }
    }
}

/// Events that can fire a configured mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationTrigger {
    /// Once per update, anywhere in the main genome.
    Update,
    /// After an instruction executes, at the instruction pointer.
    Execute,
}

/// Edits applied to one child at divide time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DivideMutations {
    pub substitutions: u32,
    pub insertions: u32,
    pub deletions: u32,
    pub parent: u32,
}

impl DivideMutations {
    pub fn total(&self) -> u32 {
        self.substitutions + self.insertions + self.deletions
    }
}

/// Running mutation counts for one hardware instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MutationStats {
    pub point: u64,
    pub update: u64,
    pub exec: u64,
    pub copy: u64,
    pub copy_ins: u64,
    pub copy_del: u64,
    pub divide_sub: u64,
    pub divide_ins: u64,
    pub divide_del: u64,
    pub parent: u64,
}

impl MutationStats {
    pub(crate) fn record_divide(&mut self, m: &DivideMutations) {
        self.divide_sub += m.substitutions as u64;
        self.divide_ins += m.insertions as u64;
        self.divide_del += m.deletions as u64;
        self.parent += m.parent as u64;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct StructuralRates {
    pub single: f64,
    pub per_site: f64,
    pub insert: f64,
    pub delete: f64,
}

/// Bernoulli draw that tolerates a zero rate without touching the generator.
#[inline(always)]
pub(crate) fn roll(rng: &mut SmallRng, p: f64) -> bool {
    p > 0.0 && rng.r#gen::<f64>() < p
}

/// Sample from geometric distribution via CDF inversion.
/// Returns the number of sites to skip before the next hit.
/// `inv_log` should be `1.0 / ln(1 - rate)` (precomputed).
fn geometric_skip(rng: &mut SmallRng, inv_log: f64) -> usize {
    let u: f64 = rng.r#gen::<f64>();
    if u < 1e-300 {
        return usize::MAX;
    }
    (u.ln() * inv_log) as usize
}

/// Indices hit by independent per-site trials at `rate`, in increasing order.
///
/// Skips straight to the next hit instead of drawing once per site.
pub fn sample_sites(rng: &mut SmallRng, len: usize, rate: f64) -> Vec<usize> {
    if rate <= 0.0 || len == 0 {
        return Vec::new();
    }
    if rate >= 1.0 {
        return (0..len).collect();
    }
    let inv_log = 1.0 / (1.0 - rate).ln();
    let mut hits = Vec::new();
    let mut pos = geometric_skip(rng, inv_log);
    while pos < len {
        hits.push(pos);
        pos = pos.saturating_add(1).saturating_add(geometric_skip(rng, inv_log));
    }
    hits
}

/// Replace each site independently with probability `rate`.
pub(crate) fn substitute_sites(
    space: &mut MemorySpace,
    inst_set: &InstSet,
    rng: &mut SmallRng,
    rate: f64,
    flags: SiteFlags,
) -> u32 {
    let hits = sample_sites(rng, space.len(), rate);
    for &pos in &hits {
        space.set(pos, inst_set.random_inst(rng));
        space.set_flag(pos, flags);
    }
    hits.len() as u32
}

/// Replace one uniformly chosen site.
pub(crate) fn substitute_one(
    space: &mut MemorySpace,
    inst_set: &InstSet,
    rng: &mut SmallRng,
    flags: SiteFlags,
) -> bool {
    if space.is_empty() {
        return false;
    }
    let pos = rng.gen_range(0..space.len());
    space.set(pos, inst_set.random_inst(rng));
    space.set_flag(pos, flags);
    true
}

/// Apply divide-style edits to space 0 of `bank`: substitutions first, then
/// at most one insertion and one deletion, each kept within `[min, max]` sites.
///
/// Structural edits go through a head so the bank's gating applies.
pub(crate) fn mutate_offspring(
    bank: &mut SpaceBank,
    inst_set: &InstSet,
    rng: &mut SmallRng,
    rates: StructuralRates,
    min_size: usize,
    max_size: usize,
) -> DivideMutations {
    let mut m = DivideMutations::default();
    let flags = SiteFlags::MUTATED;

    if roll(rng, rates.single) && substitute_one(bank.get_mut(0), inst_set, rng, flags) {
        m.substitutions += 1;
    }
    m.substitutions += substitute_sites(bank.get_mut(0), inst_set, rng, rates.per_site, flags);

    let mut head = Head::new(bank.owner(), 0);
    let len = bank.get(0).len();
    if roll(rng, rates.insert) && len < max_size {
        let pos = rng.gen_range(0..=len);
        head.abs_set(pos as i32);
        if head.insert_inst(bank, inst_set.random_inst(rng)) {
            bank.get_mut(0).set_flag(pos, flags);
            m.insertions += 1;
        }
    }

    let len = bank.get(0).len();
    if roll(rng, rates.delete) && len > min_size && len > 1 {
        head.abs_set(rng.gen_range(0..len) as i32);
        if head.remove_inst(bank) {
            m.deletions += 1;
        }
    }
    m
}

impl Hardware {
    /// Independent per-site substitutions over the main genome at `rate`.
    /// Returns the number of sites changed.
    pub fn point_mutate(&mut self, rate: f64, rng: &mut SmallRng) -> u32 {
        let count = substitute_sites(
            self.spaces.get_mut(0),
            &self.inst_set,
            rng,
            rate,
            SiteFlags::MUTATED | SiteFlags::POINT_MUT,
        );
        self.stats.mutations.point += count as u64;
        count
    }

    /// Fire the mutation bound to `trigger`. Returns whether anything changed.
    pub fn trigger_mutations(&mut self, trigger: MutationTrigger, rng: &mut SmallRng) -> bool {
        let flags = SiteFlags::MUTATED | SiteFlags::POINT_MUT;
        match trigger {
            MutationTrigger::Update => {
                let mut hit = false;
                if roll(rng, self.config.mutation.update_mut_prob)
                    && substitute_one(self.spaces.get_mut(0), &self.inst_set, rng, flags)
                {
                    self.stats.mutations.update += 1;
                    hit = true;
                }
                let rate = self.config.mutation.point_mut_prob;
                self.point_mutate(rate, rng) > 0 || hit
            }
            MutationTrigger::Execute => {
                if !roll(rng, self.config.mutation.exec_mut_prob) {
                    return false;
                }
                let ip = self.threads[self.cur_thread].heads[HEAD_IP];
                let inst = self.inst_set.random_inst(rng);
                if !ip.set_inst(&mut self.spaces, inst) {
                    return false;
                }
                ip.set_flag(&mut self.spaces, flags);
                self.stats.mutations.exec += 1;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::tests::{config, hardware, hardware_with};
    use crate::inst::{Instruction, Opcode};
    use crate::memory::HardwareId;
    use rand::SeedableRng;

    fn bank_of(len: usize) -> SpaceBank {
        let mut bank = SpaceBank::new(HardwareId(0), false);
        bank.reset(&vec![Instruction::new(4); len]);
        bank
    }

    #[test]
    fn test_sample_sites_zero_rate() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(sample_sites(&mut rng, 100, 0.0).is_empty());
    }

    #[test]
    fn test_sample_sites_full_rate() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(sample_sites(&mut rng, 5, 1.0), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sample_sites_rate_is_roughly_right() {
        let mut rng = SmallRng::seed_from_u64(3);
        let hits = sample_sites(&mut rng, 100_000, 0.01);
        assert!(hits.len() > 800 && hits.len() < 1200, "got {}", hits.len());
        assert!(hits.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_mutate_offspring_disabled() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut bank = bank_of(20);
        let before = bank.get(0).clone();
        let rates = MutationRates::none().divide_rates();
        let m = mutate_offspring(&mut bank, &InstSet::standard(), &mut rng, rates, 1, 100);
        assert_eq!(m, DivideMutations::default());
        assert_eq!(bank.get(0), &before);
    }

    #[test]
    fn test_mutate_offspring_insert_and_delete() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut bank = bank_of(20);
        let rates = StructuralRates {
            single: 0.0,
            per_site: 0.0,
            insert: 1.0,
            delete: 0.0,
        };
        let m = mutate_offspring(&mut bank, &InstSet::standard(), &mut rng, rates, 1, 100);
        assert_eq!(m.insertions, 1);
        assert_eq!(bank.get(0).len(), 21);

        let rates = StructuralRates {
            insert: 0.0,
            delete: 1.0,
            ..rates
        };
        let m = mutate_offspring(&mut bank, &InstSet::standard(), &mut rng, rates, 1, 100);
        assert_eq!(m.deletions, 1);
        assert_eq!(bank.get(0).len(), 20);
    }

    #[test]
    fn test_mutate_offspring_respects_bounds() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut bank = bank_of(10);
        let rates = StructuralRates {
            single: 0.0,
            per_site: 0.0,
            insert: 1.0,
            delete: 1.0,
        };
        let m = mutate_offspring(&mut bank, &InstSet::standard(), &mut rng, rates, 10, 10);
        assert_eq!(m.insertions, 0);
        assert_eq!(m.deletions, 0);
        assert_eq!(bank.get(0).len(), 10);
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let rates = MutationRates {
            copy_mut_prob: 1.5,
            ..Default::default()
        };
        assert!(rates.validate().is_err());
        assert!(MutationRates::default().validate().is_ok());
    }

    #[test]
    fn test_point_mutate_full_rate_marks_every_site() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut hw = hardware(&[Opcode::NopA; 16]);
        assert_eq!(hw.point_mutate(1.0, &mut rng), 16);
        assert_eq!(hw.stats().mutations.point, 16);
        for pos in 0..16 {
            let flags = hw.memory(0).flags(pos);
            assert!(flags.contains(SiteFlags::POINT_MUT | SiteFlags::MUTATED));
        }
    }

    #[test]
    fn test_point_mutate_zero_rate_changes_nothing() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut hw = hardware(&[Opcode::ValInc, Opcode::NopB, Opcode::Divide, Opcode::NopC]);
        let before = hw.memory(0).clone();
        assert_eq!(hw.point_mutate(0.0, &mut rng), 0);
        assert_eq!(hw.memory(0), &before);
        assert_eq!(hw.stats().mutations.point, 0);
    }

    #[test]
    fn test_update_trigger_applies_point_rate() {
        let mut cfg = config();
        cfg.mutation.point_mut_prob = 1.0;
        let mut hw = hardware_with(cfg, &[Opcode::NopA; 12]);
        let mut rng = SmallRng::seed_from_u64(9);
        assert!(hw.trigger_mutations(MutationTrigger::Update, &mut rng));
        assert_eq!(hw.stats().mutations.point, 12);
        assert_eq!(hw.stats().mutations.update, 0);

        let mut hw = hardware(&[Opcode::NopA; 12]);
        assert!(!hw.trigger_mutations(MutationTrigger::Update, &mut rng));
        assert_eq!(hw.stats().mutations.point, 0);
    }
}
