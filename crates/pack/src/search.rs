//! Genetic-algorithm search for the context/weight configuration that compresses one specific
//! payload best.
//!
//! The search is seeded by probing every plausible single context mask on its own, then evolves a
//! small population of full configurations: keep the best quarter, cross pairs of survivors,
//! nudge duplicates apart, and refill the rest with mutated clones. Fitness is simply the
//! compressed size in bytes.

use crate::error::Result;
use crate::{Coder, CompressionParameters};

/// Number of context planes every evolved genome uses.
const CONTEXT_COUNT: usize = 8;

/// Population size of the genetic search.
pub const GENOME_SIZE: usize = 48;

/// Default number of generations to run.
pub const GENOME_ITERATIONS: usize = 100;

/// Largest mixing weight the search will hand out.
pub const MAX_WEIGHT: u8 = 60;

/// Tuning of the search loop. The defaults match the full search.
#[derive(Clone, Copy, Debug)]
pub struct SearchConfig {
    /// Generations to evolve. Zero skips the search entirely and encodes with the caller's
    /// parameters as they are.
    pub generations: usize,
    /// Seed for the search's own PRNG. Identical payload and seed give a bit-identical result.
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { generations: GENOME_ITERATIONS, seed: 0x00C0_FFEE }
    }
}

/// xorshift64*; small, seedable, and plenty for mutation decisions.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u32 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        (self.0.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 32) as u32
    }

    fn below(&mut self, bound: usize) -> usize {
        self.next() as usize % bound
    }
}

#[derive(Clone, Copy)]
struct Pattern {
    mask: u8,
    size: usize,
}

#[derive(Clone, Copy)]
struct Genome {
    params: CompressionParameters,
    fitness: usize,
}

/// Deterministic ordering: fitness first, then the parameter bytes as a tie break.
fn compare(a: &Genome, b: &Genome) -> core::cmp::Ordering {
    a.fitness.cmp(&b.fitness).then_with(|| {
        for i in 0..CONTEXT_COUNT {
            let by_weight = a.params.weights[i].cmp(&b.params.weights[i]);
            if by_weight != core::cmp::Ordering::Equal {
                return by_weight;
            }
            let by_context = a.params.contexts[i].cmp(&b.params.contexts[i]);
            if by_context != core::cmp::Ordering::Equal {
                return by_context;
            }
        }
        core::cmp::Ordering::Equal
    })
}

/// The genome as a flat byte vector for crossover and mutation: even positions are weights, odd
/// positions are context masks.
fn gene(params: &CompressionParameters, k: usize) -> u8 {
    if k & 1 == 1 { params.contexts[k >> 1] } else { params.weights[k >> 1] }
}

fn set_gene(params: &mut CompressionParameters, k: usize, value: u8) {
    if k & 1 == 1 {
        params.contexts[k >> 1] = value;
    } else {
        params.weights[k >> 1] = value;
    }
}

fn mutate(params: &mut CompressionParameters, patterns: &[Pattern], rng: &mut Rng) {
    let byte = rng.below(2 * CONTEXT_COUNT);
    if byte < CONTEXT_COUNT {
        params.contexts[byte] = patterns[rng.below(patterns.len())].mask;
    } else {
        params.weights[byte - CONTEXT_COUNT] = rng.below(usize::from(MAX_WEIGHT)) as u8 + 1;
    }
}

/// Runs the full search and returns the canonical encoded stream for the winning parameters.
///
/// `params` doubles as input and output: a non-empty set joins the initial population, and on
/// return it holds the best configuration found.
///
/// # Errors
/// Returns [`BufferOverflow`](crate::Error::BufferOverflow) if even the winning parameters
/// cannot fit the payload under `max_len` bytes.
pub fn optimize(
    coder: &mut Coder, params: &mut CompressionParameters, input: &[u8], max_len: usize,
    config: &SearchConfig,
) -> Result<Vec<u8>> {
    if config.generations == 0 {
        return coder.compress(params, input, max_len);
    }

    let mut rng = Rng::new(config.seed);

    // Probe every odd mask with at most four participating bytes on its own to find out which
    // single contexts model this payload well. The best quartile seeds the population.
    let mut patterns = Vec::new();
    for mask in (3u16..256).step_by(2) {
        let mask = mask as u8;
        if mask.count_ones() > 4 {
            continue;
        }
        let mut probe = CompressionParameters { context_count: 2, ..Default::default() };
        probe.weights[0] = 8;
        probe.contexts[0] = mask;
        probe.weights[1] = 1;
        probe.contexts[1] = 1;
        let size = coder.compress(&probe, input, max_len).map_or(max_len, |out| out.len());
        patterns.push(Pattern { mask, size });
    }
    patterns.sort_by_key(|pattern| (pattern.size, pattern.mask));
    for (rank, pattern) in patterns.iter().enumerate() {
        log::trace!("Pattern {rank:2} [{:02x}] = {} bytes", pattern.mask, pattern.size);
    }
    let pool = patterns.len() / 4;

    let mut genomes = Vec::with_capacity(GENOME_SIZE);
    for i in 0..GENOME_SIZE {
        let mut candidate = CompressionParameters { context_count: CONTEXT_COUNT, ..Default::default() };
        candidate.contexts[0] = 1;
        candidate.weights[0] = 1;
        for j in 1..CONTEXT_COUNT {
            if i == 0 {
                candidate.contexts[j] = patterns[j - 1].mask;
                candidate.weights[j] = 20;
            } else {
                candidate.contexts[j] = patterns[rng.below(pool)].mask;
                candidate.weights[j] = rng.below(usize::from(MAX_WEIGHT)) as u8 + 1;
            }
        }
        genomes.push(Genome { params: candidate, fitness: 0 });
    }
    if !params.is_empty() {
        genomes[1].params = *params;
    }

    let keep = GENOME_SIZE / 4;
    for generation in 0..config.generations {
        for genome in &mut genomes {
            genome.fitness =
                coder.compress(&genome.params, input, max_len).map_or(max_len, |out| out.len());
        }
        genomes.sort_by(compare);
        for (rank, genome) in genomes.iter().take(3).enumerate() {
            log::debug!("I[{generation:3},{rank}]: {} {}", genome.fitness, genome.params);
        }
        *params = genomes[0].params;

        for genome in &mut genomes {
            genome.fitness = 0;
        }

        // Crossover: children in the second quarter from random pairs of survivors, exchanging
        // the gene-vector suffix past a random cut.
        let mut j = keep;
        while j < GENOME_SIZE / 2 {
            let m1 = rng.below(keep);
            let mut m2 = rng.below(keep);
            while m2 == m1 {
                m2 = rng.below(keep);
            }
            let cut = rng.below(2 * CONTEXT_COUNT);
            let p1 = genomes[m1].params;
            let p2 = genomes[m2].params;
            for k in 0..2 * CONTEXT_COUNT {
                let (first, second) = if k >= cut { (&p2, &p1) } else { (&p1, &p2) };
                set_gene(&mut genomes[j].params, k, gene(first, k));
                set_gene(&mut genomes[j + 1].params, k, gene(second, k));
            }
            j += 2;
        }

        // Identical neighbors in the surviving half collapse the gene pool; kick one byte.
        genomes[..GENOME_SIZE / 2].sort_by(compare);
        for j in 1..GENOME_SIZE / 2 {
            if genomes[j].params == genomes[j - 1].params {
                mutate(&mut genomes[j - 1].params, &patterns, &mut rng);
            }
        }

        // Refill the second half with mutated clones of the keep set.
        for j in GENOME_SIZE / 2..GENOME_SIZE {
            genomes[j] = Genome { params: genomes[j % keep].params, fitness: 0 };
            for _ in 0..3 {
                mutate(&mut genomes[j].params, &patterns, &mut rng);
            }
        }
    }

    let out = coder.compress(params, input, max_len)?;
    log::info!("Final: {} bytes with params {params}", out.len());
    Ok(out)
}
