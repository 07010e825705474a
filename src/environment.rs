use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::fault::Fault;
use crate::inst::Instruction;
use crate::label::CodeLabel;
use crate::memory::HardwareId;
use crate::mutation::DivideMutations;
use crate::thread::GenotypeId;

/// A child genome handed off by a successful divide.
#[derive(Clone, Debug, PartialEq)]
pub struct Offspring {
    pub genome: Vec<Instruction>,
    pub parent: HardwareId,
    /// Parent genotype, when the environment tracks lineage.
    pub lineage: Option<GenotypeId>,
    pub mutations: DivideMutations,
    /// Parent genome length at divide time.
    pub parent_size: usize,
    pub executed_size: usize,
    pub copied_size: usize,
}

/// Code sent out by an `Inject` instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Parasite {
    pub label: CodeLabel,
    pub code: Vec<Instruction>,
    pub source: HardwareId,
    pub owner: Option<GenotypeId>,
}

/// The world around one hardware instance.
///
/// Everything the core needs from outside an organism goes through here:
/// randomness, IO, offspring placement, parasite delivery and the fault sink.
/// Calls are synchronous and complete before the instruction that issued them.
pub trait Environment {
    fn rng(&mut self) -> &mut SmallRng;

    /// Next value read by an `IO` instruction.
    fn get_input(&mut self) -> i32;

    /// Value written by an `IO` instruction.
    fn do_output(&mut self, value: i32) {
        let _ = value;
    }

    /// Resource levels visible to the organism.
    fn resources(&self) -> &[f64] {
        &[]
    }

    /// Deliver a message. Returns `false` when nobody can receive it.
    fn send_message(&mut self, value: i32) -> bool {
        let _ = value;
        false
    }

    /// Whether the organism may divide right now.
    fn replication_ready(&self) -> bool {
        true
    }

    /// Genotype of the organism running on this hardware.
    fn genotype(&self) -> Option<GenotypeId> {
        None
    }

    /// Take ownership of a child. Returns `false` if the parent did not
    /// survive the placement.
    fn receive_offspring(&mut self, offspring: Offspring) -> bool;

    /// Deliver injected code to some host. Returns `true` on infection.
    fn inject_parasite(&mut self, parasite: Parasite) -> bool {
        let _ = parasite;
        false
    }

    /// Telemetry sink for every raised fault.
    fn fault(&mut self, hw: HardwareId, fault: &Fault) {
        let _ = (hw, fault);
    }
}

/// Standard input words; the low 24 bits are randomized per environment.
const INPUT_PATTERNS: [u32; 3] = [0x0f00_0000, 0x3300_0000, 0x5500_0000];

/// A self-contained environment that records everything it is told.
#[derive(Clone, Debug)]
pub struct BasicEnvironment {
    pub rng: SmallRng,
    pub inputs: Vec<i32>,
    input_pointer: usize,
    pub outputs: Vec<i32>,
    pub resources: Vec<f64>,
    pub messages: Vec<i32>,
    pub offspring: Vec<Offspring>,
    pub parasites: Vec<Parasite>,
    pub faults: Vec<Fault>,
    pub ready: bool,
    pub genotype: Option<GenotypeId>,
}

impl BasicEnvironment {
    pub fn new(seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let inputs = INPUT_PATTERNS
            .iter()
            .map(|&pattern| (pattern | (rng.r#gen::<u32>() & 0x00ff_ffff)) as i32)
            .collect();
        Self {
            rng,
            inputs,
            input_pointer: 0,
            outputs: Vec::new(),
            resources: Vec::new(),
            messages: Vec::new(),
            offspring: Vec::new(),
            parasites: Vec::new(),
            faults: Vec::new(),
            ready: true,
            genotype: None,
        }
    }

    /// Forget recorded outputs, offspring, parasites and faults.
    pub fn clear_records(&mut self) {
        self.outputs.clear();
        self.messages.clear();
        self.offspring.clear();
        self.parasites.clear();
        self.faults.clear();
    }
}

impl Environment for BasicEnvironment {
    fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    fn get_input(&mut self) -> i32 {
        if self.inputs.is_empty() {
            return 0;
        }
        let value = self.inputs[self.input_pointer % self.inputs.len()];
        self.input_pointer = (self.input_pointer + 1) % self.inputs.len();
        value
    }

    fn do_output(&mut self, value: i32) {
        self.outputs.push(value);
    }

    fn resources(&self) -> &[f64] {
        &self.resources
    }

    fn send_message(&mut self, value: i32) -> bool {
        self.messages.push(value);
        true
    }

    fn replication_ready(&self) -> bool {
        self.ready
    }

    fn genotype(&self) -> Option<GenotypeId> {
        self.genotype
    }

    fn receive_offspring(&mut self, offspring: Offspring) -> bool {
        self.offspring.push(offspring);
        true
    }

    fn inject_parasite(&mut self, parasite: Parasite) -> bool {
        self.parasites.push(parasite);
        true
    }

    fn fault(&mut self, _hw: HardwareId, fault: &Fault) {
        self.faults.push(fault.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_cycle() {
        let mut env = BasicEnvironment::new(1);
        let a = env.get_input();
        let b = env.get_input();
        let c = env.get_input();
        assert_eq!(env.get_input(), a);
        assert_eq!((a as u32) >> 24, 0x0f);
        assert_eq!((b as u32) >> 24, 0x33);
        assert_eq!((c as u32) >> 24, 0x55);
    }

    #[test]
    fn test_deterministic_inputs() {
        assert_eq!(BasicEnvironment::new(9).inputs, BasicEnvironment::new(9).inputs);
        assert_ne!(BasicEnvironment::new(9).inputs, BasicEnvironment::new(10).inputs);
    }
}
