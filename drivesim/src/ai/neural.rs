use crate::core::controller::Policy;
use anyhow::Context;
use helpers::general::InputValueError;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Genome is a flat list of network weights. It is persisted as a plain JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Genome {
    pub weights: Vec<f64>,
}

impl Genome {
    /// random creates a genome with weights drawn uniformly from [-1, 1].
    pub fn random<R: Rng>(length: usize, rng: &mut R) -> Genome {
        Genome {
            weights: (0..length).map(|_| rng.gen_range(-1.0..=1.0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// mutate adds uniform noise from [-scale, scale] to every weight with probability rate.
    pub fn mutate<R: Rng>(&mut self, rate: f64, scale: f64, rng: &mut R) {
        for w in self.weights.iter_mut() {
            if rng.gen::<f64>() < rate {
                *w += rng.gen_range(-scale..=scale);
            }
        }
    }

    /// mutate_gaussian adds normally distributed noise with standard deviation sigma to every
    /// weight with probability rate.
    pub fn mutate_gaussian<R: Rng>(
        &mut self,
        rate: f64,
        sigma: f64,
        rng: &mut R,
    ) -> Result<(), InputValueError> {
        let normal = Normal::new(0.0, sigma)
            .map_err(|_| InputValueError::new("sigma", "must be finite and non-negative"))?;

        for w in self.weights.iter_mut() {
            if rng.gen::<f64>() < rate {
                *w += normal.sample(rng);
            }
        }
        Ok(())
    }

    /// crossover combines the head of a with the tail of b at a random cut point in
    /// [1, len - 1].
    pub fn crossover<R: Rng>(a: &Genome, b: &Genome, rng: &mut R) -> Result<Genome, InputValueError> {
        if a.len() != b.len() {
            return Err(InputValueError::new(
                "genome",
                &format!("cannot cross genomes of length {} and {}", a.len(), b.len()),
            ));
        }
        if a.len() < 2 {
            return Ok(a.to_owned());
        }

        let cut = rng.gen_range(1..a.len());
        let mut weights = a.weights[..cut].to_vec();
        weights.extend_from_slice(&b.weights[cut..]);
        Ok(Genome { weights })
    }

    pub fn save(&self, filepath: &Path) -> anyhow::Result<()> {
        let mut fh = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(filepath)
            .context(format!(
                "Failed to open genome file {}!",
                filepath.to_string_lossy()
            ))?;

        serde_json::to_writer(&mut fh, self).context(format!(
            "Failed to write genome file {}!",
            filepath.to_string_lossy()
        ))?;
        fh.flush()?;
        Ok(())
    }

    pub fn load(filepath: &Path) -> anyhow::Result<Genome> {
        let fh = OpenOptions::new()
            .read(true)
            .open(filepath)
            .context(format!(
                "Failed to open genome file {}!",
                filepath.to_string_lossy()
            ))?;
        let genome = serde_json::from_reader(&fh).context(format!(
            "Failed to parse genome file {}!",
            filepath.to_string_lossy()
        ))?;
        Ok(genome)
    }
}

/// NeuralNet is a single-layer network without bias: output j = tanh(sum_i w[j * n_in + i] *
/// x[i]).
#[derive(Debug, Clone)]
pub struct NeuralNet {
    genome: Genome,
    no_inputs: usize,
    no_outputs: usize,
}

impl NeuralNet {
    pub fn new(genome: Genome, no_inputs: usize, no_outputs: usize) -> Result<NeuralNet, InputValueError> {
        if genome.len() != no_inputs * no_outputs {
            return Err(InputValueError::new(
                "genome",
                &format!(
                    "length {} does not fit a {}x{} network",
                    genome.len(),
                    no_inputs,
                    no_outputs
                ),
            ));
        }

        Ok(NeuralNet {
            genome,
            no_inputs,
            no_outputs,
        })
    }

    pub fn genome_length(no_inputs: usize, no_outputs: usize) -> usize {
        no_inputs * no_outputs
    }
}

impl Policy for NeuralNet {
    fn no_inputs(&self) -> usize {
        self.no_inputs
    }

    fn no_outputs(&self) -> usize {
        self.no_outputs
    }

    fn activate(&self, inputs: &[f64]) -> Vec<f64> {
        self.genome
            .weights
            .chunks(self.no_inputs)
            .map(|row| {
                row.iter()
                    .zip(inputs.iter())
                    .map(|(w, x)| w * x)
                    .sum::<f64>()
                    .tanh()
            })
            .collect()
    }
}
