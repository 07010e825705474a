use std::collections::HashSet;

use crate::inst::{InstSet, Instruction};
use crate::population::Population;

/// Compute the high-order entropy (HOE) of a byte slice.
///
/// HOE = compressed_size / raw_size, where compression uses brotli at quality 2.
/// This approximates the normalized Kolmogorov complexity of the data.
///
/// Returns a value typically between 0 and 1, where:
/// - ~1.0 means the data is incompressible (random)
/// - <<1.0 means the data is highly structured/repetitive
pub fn high_order_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut compressed = Vec::new();
    let params = brotli::enc::BrotliEncoderParams {
        quality: 2,
        ..Default::default()
    };
    match brotli::BrotliCompress(&mut &data[..], &mut compressed, &params) {
        Ok(_) => compressed.len() as f64 / data.len() as f64,
        // Treated as incompressible.
        Err(_) => 1.0,
    }
}

/// Count the number of distinct genomes.
pub fn unique_genome_count(genomes: &[Vec<Instruction>]) -> usize {
    let set: HashSet<&[Instruction]> = genomes.iter().map(|g| g.as_slice()).collect();
    set.len()
}

/// Occurrences of each instruction of `inst_set` across all genomes.
pub fn opcode_histogram(genomes: &[Vec<Instruction>], inst_set: &InstSet) -> Vec<usize> {
    let mut hist = vec![0usize; inst_set.len()];
    for inst in genomes.iter().flatten() {
        if let Some(count) = hist.get_mut(inst.op() as usize) {
            *count += 1;
        }
    }
    hist
}

pub fn mean_genome_len(genomes: &[Vec<Instruction>]) -> f64 {
    if genomes.is_empty() {
        return 0.0;
    }
    genomes.iter().map(Vec::len).sum::<usize>() as f64 / genomes.len() as f64
}

/// One CSV row of population statistics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Snapshot {
    pub update: u64,
    pub organisms: usize,
    pub unique: usize,
    pub mean_len: f64,
    pub hoe: f64,
}

impl Snapshot {
    pub const CSV_HEADER: &'static str = "update,organisms,unique,mean_len,hoe";

    pub fn of(pop: &Population) -> Self {
        let genomes = pop.genomes();
        Self {
            update: pop.updates(),
            organisms: genomes.len(),
            unique: unique_genome_count(&genomes),
            mean_len: mean_genome_len(&genomes),
            hoe: high_order_entropy(&pop.population_bytes()),
        }
    }

    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{:.2},{:.6}",
            self.update, self.organisms, self.unique, self.mean_len, self.hoe
        )
    }
}
