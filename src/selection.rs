//! Parent selection policies.
//!
//! Every policy works on a population already sorted best-first.

use std::cmp::Ordering;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::genome::Creature;

/// How parents are drawn for crossover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Selection {
    /// Rank-based: index `floor(r^power * len)` for uniform `r`.
    Power { power: f32 },
    /// Roulette wheel over scores shifted so the worst finite score is zero.
    FitnessProportionate,
    /// Best of `size` random entrants wins with `probability`, the runner-up
    /// with `probability * (1 - probability)`, and so on.
    Tournament { size: usize, probability: f32 },
}

impl Default for Selection {
    fn default() -> Self {
        Self::Power { power: 4.0 }
    }
}

fn finite_score(creature: &Creature) -> Option<f32> {
    creature.score.filter(|s| s.is_finite())
}

fn by_score_desc(a: &Creature, b: &Creature) -> Ordering {
    let sa = a.score.unwrap_or(f32::NEG_INFINITY);
    let sb = b.score.unwrap_or(f32::NEG_INFINITY);
    sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
}

impl Selection {
    /// Pick one parent, or `None` for an empty population.
    pub fn select<'a, R: Rng>(&self, population: &'a [Creature], rng: &mut R) -> Option<&'a Creature> {
        if population.is_empty() {
            return None;
        }
        let len = population.len();
        let index = match *self {
            Self::Power { power } => {
                let r: f32 = rng.random();
                ((r.powf(power.max(0.0)) * len as f32).floor() as usize).min(len - 1)
            }
            Self::FitnessProportionate => Self::roulette(population, rng),
            Self::Tournament { size, probability } => {
                return Some(Self::tournament(population, size, probability, rng));
            }
        };
        population.get(index)
    }

    fn roulette<R: Rng>(population: &[Creature], rng: &mut R) -> usize {
        let min = population
            .iter()
            .filter_map(finite_score)
            .fold(f32::INFINITY, f32::min);
        let shift = if min < 0.0 { -min } else { 0.0 };
        let weights: Vec<f32> = population
            .iter()
            .map(|c| finite_score(c).map_or(0.0, |s| s + shift))
            .collect();
        let total: f32 = weights.iter().sum();

        if !total.is_finite() || total <= 0.0 {
            return rng.random_range(0..population.len());
        }

        let mut spin = rng.random::<f32>() * total;
        for (i, w) in weights.iter().enumerate() {
            spin -= w;
            if spin <= 0.0 {
                return i;
            }
        }
        population.len() - 1
    }

    fn tournament<'a, R: Rng>(
        population: &'a [Creature],
        size: usize,
        probability: f32,
        rng: &mut R,
    ) -> &'a Creature {
        let mut entrants: Vec<&Creature> = (0..size.max(1))
            .map(|_| &population[rng.random_range(0..population.len())])
            .collect();
        entrants.sort_by(|a, b| by_score_desc(a, b));

        let probability = f64::from(probability.clamp(0.0, 1.0));
        for &entrant in &entrants {
            if rng.random_bool(probability) {
                return entrant;
            }
        }
        entrants[entrants.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::CreatureConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn scored(scores: &[f32]) -> Vec<Creature> {
        scores
            .iter()
            .map(|&s| {
                let mut c = Creature::minimal(&CreatureConfig::new(1, 1));
                c.score = Some(s);
                c
            })
            .collect()
    }

    fn counts(selection: Selection, population: &[Creature], draws: usize) -> Vec<usize> {
        let mut rng = test_rng();
        let mut counts = vec![0; population.len()];
        for _ in 0..draws {
            let picked = selection.select(population, &mut rng).unwrap();
            let i = population
                .iter()
                .position(|c| std::ptr::eq(c, picked))
                .unwrap();
            counts[i] += 1;
        }
        counts
    }

    #[test]
    fn test_power_prefers_top_ranks() {
        let population = scored(&[-0.1, -0.2, -0.3, -0.4, -0.5]);
        let counts = counts(Selection::default(), &population, 2000);
        assert!(counts[0] > counts[4] * 3);
    }

    #[test]
    fn test_roulette_shifts_negative_scores() {
        let population = scored(&[-1.0, -2.0, -3.0]);
        let counts = counts(Selection::FitnessProportionate, &population, 3000);
        // Shifted weights are 2, 1, 0.
        assert_eq!(counts[2], 0);
        assert!(counts[0] > counts[1]);
    }

    #[test]
    fn test_roulette_ignores_infinite_scores() {
        let population = scored(&[-1.0, f32::NEG_INFINITY, -2.0]);
        let counts = counts(Selection::FitnessProportionate, &population, 500);
        assert_eq!(counts[1], 0);
    }

    #[test]
    fn test_tournament_certain_winner() {
        let population = scored(&[-0.1, -0.9]);
        let selection = Selection::Tournament {
            size: 8,
            probability: 1.0,
        };
        let counts = counts(selection, &population, 200);
        assert!(counts[0] > 190);
    }

    #[test]
    fn test_empty_population() {
        let mut rng = test_rng();
        assert!(Selection::default().select(&[], &mut rng).is_none());
    }

    #[test]
    fn test_serde_tagged() {
        let json = serde_json::to_string(&Selection::FitnessProportionate).unwrap();
        assert_eq!(json, r#"{"kind":"FITNESS_PROPORTIONATE"}"#);
        let back: Selection = serde_json::from_str(r#"{"kind":"POWER","power":2.0}"#).unwrap();
        assert_eq!(back, Selection::Power { power: 2.0 });
    }
}
