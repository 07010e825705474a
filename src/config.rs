use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::divide::{AllocMethod, DivideMethod};
use crate::error::{Error, Result};
use crate::inst::{InstEntry, InstSet, Opcode};
use crate::mutation::MutationRates;
use crate::thread::MAX_THREAD_IDS;

/// How many threads run per call to `single_process`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadSlicing {
    /// One instruction from one thread.
    #[default]
    One,
    /// One instruction from every live thread.
    All,
}

/// One instruction set entry as written in a configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstConfig {
    pub name: String,
    #[serde(default)]
    pub cost: u32,
    #[serde(default)]
    pub first_time_cost: u32,
    #[serde(default)]
    pub prob_fail: f64,
}

/// Settings shared by every hardware instance in a run.
///
/// `write_protect` has no default: a configuration must say whether heads may
/// write into hardware they do not belong to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Drop writes by heads into foreign hardware instead of marking it modified.
    pub write_protect: bool,
    /// Maximum live threads per organism.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    #[serde(default)]
    pub thread_slicing: ThreadSlicing,
    /// Label nops longer than this are read but not marked executed.
    #[serde(default = "default_max_label_exe_size")]
    pub max_label_exe_size: usize,
    /// Absolute lower bound on genome length.
    #[serde(default = "default_min_genome_size")]
    pub min_genome_size: usize,
    /// Absolute upper bound on genome length.
    #[serde(default = "default_max_genome_size")]
    pub max_genome_size: usize,
    /// Child length must lie within parent/range..=parent*range when set.
    #[serde(default = "default_child_size_range")]
    pub child_size_range: Option<f64>,
    /// Fraction of the parent that must have executed before a divide.
    #[serde(default = "default_min_fraction")]
    pub min_exe_lines: f64,
    /// Fraction of the child that must have been copied before a divide.
    #[serde(default = "default_min_fraction")]
    pub min_copied_lines: f64,
    #[serde(default)]
    pub divide_method: DivideMethod,
    #[serde(default)]
    pub alloc_method: AllocMethod,
    /// Copy-mutation divisor used by `Inst-Copy-EC`.
    #[serde(default = "default_copy_error_reduction")]
    pub copy_error_reduction: f64,
    /// Shortest code an `Inject` may send.
    #[serde(default = "default_min_inject_size")]
    pub min_inject_size: usize,
    #[serde(default)]
    pub mutation: MutationRates,
    /// Instruction set, in opcode order. Empty selects the standard set.
    #[serde(default, rename = "instruction")]
    pub instructions: Vec<InstConfig>,
}

fn default_max_threads() -> usize {
    4
}

fn default_max_label_exe_size() -> usize {
    1
}

fn default_min_genome_size() -> usize {
    8
}

fn default_max_genome_size() -> usize {
    2048
}

fn default_child_size_range() -> Option<f64> {
    Some(2.0)
}

fn default_min_fraction() -> f64 {
    0.5
}

fn default_copy_error_reduction() -> f64 {
    1.0
}

fn default_min_inject_size() -> usize {
    8
}

impl HardwareConfig {
    /// Defaults for everything but the write-protection choice.
    pub fn new(write_protect: bool) -> Self {
        Self {
            write_protect,
            max_threads: default_max_threads(),
            thread_slicing: ThreadSlicing::default(),
            max_label_exe_size: default_max_label_exe_size(),
            min_genome_size: default_min_genome_size(),
            max_genome_size: default_max_genome_size(),
            child_size_range: default_child_size_range(),
            min_exe_lines: default_min_fraction(),
            min_copied_lines: default_min_fraction(),
            divide_method: DivideMethod::default(),
            alloc_method: AllocMethod::default(),
            copy_error_reduction: default_copy_error_reduction(),
            min_inject_size: default_min_inject_size(),
            mutation: MutationRates::default(),
            instructions: Vec::new(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 || self.max_threads > MAX_THREAD_IDS {
            return Err(Error::InvalidConfig(format!(
                "max_threads must be in 1..={MAX_THREAD_IDS}, got {}",
                self.max_threads
            )));
        }
        if self.min_genome_size == 0 || self.min_genome_size > self.max_genome_size {
            return Err(Error::InvalidConfig(format!(
                "genome size bounds {}..={} are empty",
                self.min_genome_size, self.max_genome_size
            )));
        }
        if let Some(range) = self.child_size_range {
            if range < 1.0 {
                return Err(Error::InvalidConfig(format!(
                    "child_size_range must be at least 1, got {range}"
                )));
            }
        }
        for (name, value) in [
            ("min_exe_lines", self.min_exe_lines),
            ("min_copied_lines", self.min_copied_lines),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a fraction, got {value}"
                )));
            }
        }
        if self.copy_error_reduction < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "copy_error_reduction must be at least 1, got {}",
                self.copy_error_reduction
            )));
        }
        self.mutation.validate()
    }

    /// Build the instruction set this configuration names. Any unknown name
    /// is an error, so no organism can run on a half-understood set.
    pub fn inst_set(&self) -> Result<InstSet> {
        if self.instructions.is_empty() {
            return Ok(InstSet::standard());
        }
        let entries = self
            .instructions
            .iter()
            .map(|inst| {
                let opcode = Opcode::from_name(&inst.name)
                    .ok_or_else(|| Error::UnknownInstruction(inst.name.clone()))?;
                if !(0.0..=1.0).contains(&inst.prob_fail) {
                    return Err(Error::InvalidConfig(format!(
                        "prob_fail of {} must be a probability",
                        inst.name
                    )));
                }
                Ok(InstEntry {
                    opcode,
                    cost: inst.cost,
                    first_time_cost: inst.first_time_cost,
                    prob_fail: inst.prob_fail,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        InstSet::new(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_valid() {
        assert!(HardwareConfig::new(true).validate().is_ok());
    }

    #[test]
    fn test_write_protect_is_required() {
        assert!(HardwareConfig::from_toml_str("max_threads = 2").is_err());
    }

    #[test]
    fn test_parse_minimal() {
        let config = HardwareConfig::from_toml_str("write_protect = false").unwrap();
        assert_eq!(config, HardwareConfig::new(false));
    }

    #[test]
    fn test_parse_full() {
        let text = r#"
            write_protect = true
            max_threads = 8
            thread_slicing = "all"
            divide_method = "split"
            alloc_method = "necro"

            [mutation]
            copy_mut_prob = 0.01
            divide_ins_prob = 0.0

            [[instruction]]
            name = "Nop-A"

            [[instruction]]
            name = "Val-Add"
            cost = 3
            prob_fail = 0.25
        "#;
        let config = HardwareConfig::from_toml_str(text).unwrap();
        assert_eq!(config.thread_slicing, ThreadSlicing::All);
        assert_eq!(config.divide_method, DivideMethod::Split);
        assert_eq!(config.alloc_method, AllocMethod::Necro);
        assert_eq!(config.mutation.copy_mut_prob, 0.01);
        assert_eq!(config.mutation.divide_del_prob, 0.05);

        let set = config.inst_set().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.entries()[1].cost, 3);
        assert_eq!(set.entries()[1].prob_fail, 0.25);
    }

    #[test]
    fn test_unknown_instruction_is_fatal() {
        let text = r#"
            write_protect = false
            [[instruction]]
            name = "Nop-A"
            [[instruction]]
            name = "Teleport"
        "#;
        let config = HardwareConfig::from_toml_str(text).unwrap();
        assert!(matches!(config.inst_set(), Err(Error::UnknownInstruction(n)) if n == "Teleport"));
    }

    #[test]
    fn test_validate_bounds() {
        let mut config = HardwareConfig::new(false);
        config.max_threads = 0;
        assert!(config.validate().is_err());

        let mut config = HardwareConfig::new(false);
        config.min_genome_size = 100;
        config.max_genome_size = 10;
        assert!(config.validate().is_err());

        let mut config = HardwareConfig::new(false);
        config.copy_error_reduction = 0.5;
        assert!(config.validate().is_err());
    }
}
