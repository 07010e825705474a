use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rayon::prelude::*;
use tracing::debug;

use crate::config::HardwareConfig;
use crate::environment::{BasicEnvironment, Offspring, Parasite};
use crate::error::{Error, Result};
use crate::hardware::Hardware;
use crate::inst::{InstSet, Instruction, Opcode};
use crate::memory::HardwareId;
use crate::mutation::MutationTrigger;

/// A minimal self-replicator.
///
/// Allocates a child space, moves the flow head past its own end marker, then
/// copies itself one instruction per loop until the copied `Nop-A Nop-B` tail
/// matches the complement of the loop's `If-Label`, and divides.
pub const ANCESTOR: [Opcode; 18] = [
    Opcode::MemSet,
    Opcode::NopA,
    Opcode::HeadMove,
    Opcode::NopC,
    Opcode::Search,
    Opcode::NopC,
    Opcode::NopC,
    Opcode::NopX,
    Opcode::NopA,
    Opcode::NopA,
    Opcode::InstCopy,
    Opcode::IfLabel,
    Opcode::NopC,
    Opcode::NopD,
    Opcode::Divide,
    Opcode::HeadMove,
    Opcode::NopA,
    Opcode::NopB,
];

/// The ancestor expressed in `inst_set`.
pub fn ancestor_genome(inst_set: &InstSet) -> Result<Vec<Instruction>> {
    ANCESTOR
        .iter()
        .map(|&op| {
            inst_set
                .find(op)
                .ok_or_else(|| Error::UnknownInstruction(op.name().to_string()))
        })
        .collect()
}

/// Configuration for a well-mixed population.
#[derive(Clone, Debug)]
pub struct PopulationConfig {
    /// Number of organism slots.
    pub capacity: usize,
    /// Cycles each organism runs per update.
    pub cycles_per_update: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            capacity: 1 << 10,
            cycles_per_update: 30,
        }
    }
}

/// One occupied slot.
pub struct Organism {
    pub hardware: Hardware,
    pub env: BasicEnvironment,
}

/// What happened during one update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub births: usize,
    pub infections: usize,
}

/// A fixed number of slots; any offspring may land in any slot.
pub struct Population {
    pub organisms: Vec<Option<Organism>>,
    pub config: PopulationConfig,
    hw_config: Arc<HardwareConfig>,
    inst_set: Arc<InstSet>,
    rng: SmallRng,
    next_id: u32,
    updates: u64,
}

impl Population {
    /// Create a population holding one copy of `ancestor` in slot 0.
    pub fn new(
        config: PopulationConfig,
        hw_config: Arc<HardwareConfig>,
        inst_set: Arc<InstSet>,
        ancestor: &[Instruction],
        seed: u64,
    ) -> Result<Self> {
        if config.capacity == 0 {
            return Err(Error::InvalidConfig("population capacity must be positive".into()));
        }
        let mut organisms = Vec::with_capacity(config.capacity);
        organisms.resize_with(config.capacity, || None);
        let mut pop = Self {
            organisms,
            config,
            hw_config,
            inst_set,
            rng: SmallRng::seed_from_u64(seed),
            next_id: 0,
            updates: 0,
        };
        let first = pop.spawn(ancestor)?;
        pop.organisms[0] = Some(first);
        Ok(pop)
    }

    fn spawn(&mut self, genome: &[Instruction]) -> Result<Organism> {
        let id = HardwareId(self.next_id);
        let hardware = Hardware::with_genome(
            id,
            self.hw_config.clone(),
            self.inst_set.clone(),
            genome,
        )?;
        self.next_id = self.next_id.wrapping_add(1);
        let env = BasicEnvironment::new(self.rng.r#gen::<u64>());
        Ok(Organism { hardware, env })
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn occupied(&self) -> usize {
        self.organisms.iter().filter(|o| o.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Organism> {
        self.organisms.iter().flatten()
    }

    /// Main genomes of every living organism, in slot order.
    pub fn genomes(&self) -> Vec<Vec<Instruction>> {
        self.iter().map(|o| o.hardware.genome()).collect()
    }

    /// Every genome concatenated as opcode bytes.
    pub fn population_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for org in self.iter() {
            buf.extend(org.hardware.memory(0).sites().iter().map(|s| s.inst.op()));
        }
        buf
    }

    /// Run one update: step every organism, place offspring, deliver
    /// parasites, then apply per-update mutations.
    pub fn update(&mut self) -> UpdateReport {
        let cycles = self.config.cycles_per_update;
        self.organisms
            .par_iter_mut()
            .filter_map(|slot| slot.as_mut())
            .for_each(|org| {
                for _ in 0..cycles {
                    org.hardware.single_process(&mut org.env);
                }
            });

        // Collect in slot order so placement does not depend on scheduling.
        let mut births: Vec<Offspring> = Vec::new();
        let mut parasites: Vec<Parasite> = Vec::new();
        for org in self.organisms.iter_mut().flatten() {
            births.append(&mut org.env.offspring);
            parasites.append(&mut org.env.parasites);
            org.env.clear_records();
        }

        let mut report = UpdateReport::default();
        for child in births {
            let slot = self.rng.gen_range(0..self.organisms.len());
            match self.spawn(&child.genome) {
                Ok(org) => {
                    self.organisms[slot] = Some(org);
                    report.births += 1;
                }
                Err(err) => debug!(%err, parent = child.parent.0, "offspring discarded"),
            }
        }

        for parasite in parasites {
            let slot = self.rng.gen_range(0..self.organisms.len());
            let Some(host) = self.organisms[slot].as_mut() else {
                continue;
            };
            if host.hardware.id() == parasite.source {
                continue;
            }
            if host
                .hardware
                .inject_host(&parasite.label, &parasite.code, parasite.owner)
            {
                report.infections += 1;
            }
        }

        for org in self.organisms.iter_mut().flatten() {
            org.hardware
                .trigger_mutations(MutationTrigger::Update, &mut org.env.rng);
        }

        self.updates += 1;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::tests::config;

    fn population(capacity: usize, cfg: HardwareConfig, seed: u64) -> Population {
        let set = InstSet::standard();
        let ancestor = ancestor_genome(&set).unwrap();
        let config = PopulationConfig {
            capacity,
            cycles_per_update: 50,
        };
        Population::new(config, Arc::new(cfg), Arc::new(set), &ancestor, seed).unwrap()
    }

    #[test]
    fn test_new_seeds_one_organism() {
        let pop = population(8, config(), 1);
        assert_eq!(pop.occupied(), 1);
        assert_eq!(pop.genomes()[0].len(), ANCESTOR.len());
        assert_eq!(pop.population_bytes().len(), ANCESTOR.len());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let set = InstSet::standard();
        let ancestor = ancestor_genome(&set).unwrap();
        let config = PopulationConfig {
            capacity: 0,
            ..Default::default()
        };
        let hw_config = Arc::new(HardwareConfig::new(false));
        let result = Population::new(config, hw_config, Arc::new(set), &ancestor, 0);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_ancestor_rejected() {
        let set = InstSet::standard();
        let result = Population::new(
            PopulationConfig::default(),
            Arc::new(config()),
            Arc::new(set),
            &[],
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ancestor_missing_from_set() {
        let set = InstSet::from_names(&["Nop-A", "Nop-B", "Nop-C", "Nop-D", "Divide"]).unwrap();
        assert!(matches!(ancestor_genome(&set), Err(Error::UnknownInstruction(_))));
    }

    #[test]
    fn test_population_grows() {
        let mut pop = population(32, config(), 7);
        let mut births = 0;
        for _ in 0..20 {
            births += pop.update().births;
        }
        assert!(births > 0);
        assert!(pop.occupied() > 1, "population never grew");
        assert_eq!(pop.updates(), 20);
        // Without mutation every organism is the ancestor.
        let ancestor = pop.genomes()[0].clone();
        assert!(pop.genomes().iter().all(|g| *g == ancestor));
    }

    #[test]
    fn test_deterministic_simulation() {
        let run = |seed: u64| -> Vec<Vec<Instruction>> {
            let mut cfg = config();
            cfg.mutation.copy_mut_prob = 0.02;
            cfg.mutation.point_mut_prob = 0.001;
            let mut pop = population(16, cfg, seed);
            for _ in 0..15 {
                pop.update();
            }
            pop.genomes()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_update_mutations_applied() {
        let mut cfg = config();
        cfg.mutation.update_mut_prob = 1.0;
        let mut pop = population(4, cfg, 3);
        pop.config.cycles_per_update = 0;
        pop.update();
        let org = pop.iter().next().unwrap();
        assert_eq!(org.hardware.stats().mutations.update, 1);
    }

    #[test]
    fn test_point_mutations_applied_each_update() {
        let mut cfg = config();
        cfg.mutation.point_mut_prob = 1.0;
        let mut pop = population(4, cfg, 3);
        pop.config.cycles_per_update = 0;
        let len = pop.genomes()[0].len() as u64;
        pop.update();
        pop.update();
        let org = pop.iter().next().unwrap();
        assert_eq!(org.hardware.stats().mutations.point, 2 * len);
    }
}
