//! Content-addressed deduplication of a new generation.

use std::collections::HashSet;

use rand::Rng;
use rayon::prelude::*;

use crate::experiment::ExperimentStore;
use crate::genome::{Creature, CreatureError};
use crate::mutation::MutationConfig;

/// Outcome of a deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Creatures that collided and were regenerated.
    pub collisions: usize,
    /// Creatures still colliding after every retry.
    pub exhausted: usize,
}

/// Identity of every creature, hashed in parallel.
#[must_use]
pub fn identities(population: &[Creature]) -> Vec<String> {
    population.par_iter().map(Creature::identity).collect()
}

/// Make every identity in `population` unique.
///
/// A creature collides when an earlier creature has the same identity or,
/// past the first `keep_first` entries, when `store` has already recorded
/// it. Colliding creatures are mutated once and re-hashed, up to `retries`
/// times; a creature that still collides is kept as-is with a warning. The
/// population size never changes.
pub fn deduplicate<R: Rng>(
    population: &mut [Creature],
    keep_first: usize,
    mut store: Option<&mut ExperimentStore>,
    config: &MutationConfig,
    retries: usize,
    rng: &mut R,
) -> Result<DedupStats, CreatureError> {
    let hashes = identities(population);
    let mut seen: HashSet<String> = HashSet::with_capacity(population.len());
    let mut stats = DedupStats::default();

    for (i, (creature, mut hash)) in population.iter_mut().zip(hashes).enumerate() {
        let check_store = i >= keep_first;
        let mut collides = |hash: &str, seen: &HashSet<String>| {
            seen.contains(hash)
                || (check_store
                    && store.as_deref_mut().is_some_and(|s| {
                        s.contains(hash).unwrap_or_else(|e| {
                            log::warn!("experiment store lookup failed: {e}");
                            false
                        })
                    }))
        };

        if collides(&hash, &seen) {
            stats.collisions += 1;
            let mut tries = 0;
            while tries < retries && collides(&hash, &seen) {
                creature.mutate_random(config, 1, rng)?;
                hash = creature.identity();
                tries += 1;
            }
            if collides(&hash, &seen) {
                stats.exhausted += 1;
                log::warn!("creature {i} still duplicates after {retries} retries");
            }
            creature.score = None;
        }
        seen.insert(hash);
    }
    Ok(stats)
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

    #[test]
    fn test_clones_become_unique() {
        let mut rng = test_rng();
        let original = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        let mut population = vec![original; 12];

        let stats = deduplicate(
            &mut population,
            0,
            None,
            &MutationConfig::default(),
            50,
            &mut rng,
        )
        .unwrap();
        assert_eq!(population.len(), 12);
        assert_eq!(stats.collisions, 11);
        assert_eq!(stats.exhausted, 0);

        let unique: HashSet<String> = identities(&population).into_iter().collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn test_store_hits_are_regenerated() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ExperimentStore::open(tmp.path()).unwrap();
        let mut rng = test_rng();
        let elite = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        store.record(&elite.identity(), -0.5).unwrap();

        let mut population = vec![elite.clone(), elite.clone()];
        population[0].score = Some(-0.5);
        deduplicate(
            &mut population,
            1,
            Some(&mut store),
            &MutationConfig::default(),
            50,
            &mut rng,
        )
        .unwrap();

        assert_eq!(population[0].identity(), elite.identity());
        assert_eq!(population[0].score, Some(-0.5));
        assert_ne!(population[1].identity(), elite.identity());
        assert!(!store.contains(&population[1].identity()).unwrap());
    }

    #[test]
    fn test_zero_retries_keeps_duplicates() {
        let mut rng = test_rng();
        let original = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        let mut population = vec![original; 3];
        let stats = deduplicate(
            &mut population,
            0,
            None,
            &MutationConfig::default(),
            0,
            &mut rng,
        )
        .unwrap();
        assert_eq!(stats.exhausted, 2);
        assert_eq!(population.len(), 3);
    }
}
