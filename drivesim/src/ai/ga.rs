use crate::ai::neural::Genome;
use helpers::general::{argmax, argsort, InputValueError, SortOrder};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

/// * `pop_size` - Number of genomes per generation
/// * `retain` - Fraction of the best genomes kept as parents
/// * `random_select` - Probability of keeping one of the remaining genomes as parent
/// * `mutate_rate` - Probability of mutating a single weight of a child
/// * `mutate_scale` - Mutation magnitude (half width of the uniform noise or standard deviation
/// of the Gaussian noise)
/// * `gaussian` - Use Gaussian instead of uniform mutation noise
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GaPars {
    pub pop_size: usize,
    pub retain: f64,
    pub random_select: f64,
    pub mutate_rate: f64,
    pub mutate_scale: f64,
    pub gaussian: bool,
}

impl Default for GaPars {
    fn default() -> Self {
        GaPars {
            pop_size: 20,
            retain: 0.2,
            random_select: 0.05,
            mutate_rate: 0.1,
            mutate_scale: 0.5,
            gaussian: false,
        }
    }
}

impl GaPars {
    pub fn validate(&self) -> Result<(), InputValueError> {
        if self.pop_size < 2 {
            return Err(InputValueError::new("pop_size", "must be at least 2"));
        }
        if !(0.0..=1.0).contains(&self.retain)
            || !(0.0..=1.0).contains(&self.random_select)
            || !(0.0..=1.0).contains(&self.mutate_rate)
        {
            return Err(InputValueError::new(
                "retain/random_select/mutate_rate",
                "must lie in the range [0.0, 1.0]",
            ));
        }
        if self.mutate_scale < 0.0 {
            return Err(InputValueError::new("mutate_scale", "must not be negative"));
        }
        Ok(())
    }
}

/// Ga is a plain generational genetic algorithm over flat genomes.
#[derive(Debug)]
pub struct Ga {
    pub population: Vec<Genome>,
    pub generation: u32,
    pars: GaPars,
    rng: StdRng,
}

impl Ga {
    pub fn new(pars: &GaPars, genome_length: usize, seed: Option<u64>) -> Result<Ga, InputValueError> {
        pars.validate()?;

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let population = (0..pars.pop_size)
            .map(|_| Genome::random(genome_length, &mut rng))
            .collect();

        Ok(Ga {
            population,
            generation: 0,
            pars: pars.to_owned(),
            rng,
        })
    }

    /// evolve creates the next generation from the fitness values of the current population
    /// (same order). The best genomes are kept unchanged, a few others survive at random, and
    /// the population is refilled with mutated crossover children.
    pub fn evolve(&mut self, fitness: &[f64]) -> Result<(), InputValueError> {
        if fitness.len() != self.population.len() {
            return Err(InputValueError::new(
                "fitness",
                &format!(
                    "got {} values for {} genomes",
                    fitness.len(),
                    self.population.len()
                ),
            ));
        }

        let graded = argsort(fitness, SortOrder::Descending);

        // at least two parents are required for crossover
        let retain_length = ((graded.len() as f64 * self.pars.retain) as usize)
            .max(2)
            .min(graded.len());

        let mut parents: Vec<Genome> = graded[..retain_length]
            .iter()
            .map(|&idx| self.population[idx].to_owned())
            .collect();

        for &idx in graded[retain_length..].iter() {
            if self.rng.gen::<f64>() < self.pars.random_select {
                parents.push(self.population[idx].to_owned());
            }
        }

        let desired = self.population.len().saturating_sub(parents.len());
        let mut children = Vec::with_capacity(desired);

        while children.len() < desired {
            let pair: Vec<&Genome> = parents.choose_multiple(&mut self.rng, 2).collect();
            let mut child = Genome::crossover(pair[0], pair[1], &mut self.rng)?;

            if self.pars.gaussian {
                child.mutate_gaussian(self.pars.mutate_rate, self.pars.mutate_scale, &mut self.rng)?;
            } else {
                child.mutate(self.pars.mutate_rate, self.pars.mutate_scale, &mut self.rng);
            }
            children.push(child);
        }

        parents.extend(children);
        self.population = parents;
        self.generation += 1;
        Ok(())
    }

    /// best returns the genome with the highest fitness.
    pub fn best<'a>(&'a self, fitness: &[f64]) -> Option<&'a Genome> {
        argmax(fitness).and_then(|idx| self.population.get(idx))
    }
}
