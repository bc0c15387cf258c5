//! Population ordering, elitism and anti-flooding.

use std::cmp::Ordering;

use crate::genome::Creature;

/// Tag naming how a creature was produced (`fine`, `trained`, ...).
pub const TAG_APPROACH: &str = "approach";
/// Tag holding the score of the creature this one was derived from.
pub const TAG_PRIOR_SCORE: &str = "prior-score";

/// Best-first order: higher score, then fewer connections, then fewer nodes.
///
/// Unscored creatures sort as negative infinity.
#[must_use]
pub fn compare(a: &Creature, b: &Creature) -> Ordering {
    let sa = a.score.unwrap_or(f32::NEG_INFINITY);
    let sb = b.score.unwrap_or(f32::NEG_INFINITY);
    sb.partial_cmp(&sa)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.connection_count().cmp(&b.connection_count()))
        .then_with(|| a.node_count().cmp(&b.node_count()))
}

/// Sort best-first.
pub fn sort(population: &mut [Creature]) {
    population.sort_by(compare);
}

/// Copies of the top `count` creatures of a sorted population.
#[must_use]
pub fn elitists(population: &[Creature], count: usize) -> Vec<Creature> {
    population.iter().take(count).cloned().collect()
}

/// Score recorded by [`mark_prior`], if any.
#[must_use]
pub fn prior_score(creature: &Creature) -> Option<f32> {
    creature.tags.get(TAG_PRIOR_SCORE)?.parse().ok()
}

/// Remember `score` as the score `creature` has to beat.
pub fn mark_prior(creature: &mut Creature, approach: &str, score: f32) {
    creature
        .tags
        .insert(TAG_APPROACH.to_string(), approach.to_string());
    creature
        .tags
        .insert(TAG_PRIOR_SCORE.to_string(), score.to_string());
}

/// Whether a creature failed to improve on the score it was derived from.
#[must_use]
pub fn is_flood(creature: &Creature) -> bool {
    match (creature.score, prior_score(creature)) {
        (Some(score), Some(prior)) => score <= prior,
        _ => false,
    }
}

/// Drop creatures that did not improve on their prior score.
///
/// When every creature would be dropped the population is left untouched.
/// Returns the number removed.
pub fn anti_flood(population: &mut Vec<Creature>) -> usize {
    let before = population.len();
    if population.iter().all(is_flood) {
        return 0;
    }
    population.retain(|c| !is_flood(c));
    let removed = before - population.len();
    if removed > 0 {
        log::debug!("anti-flood removed {removed} creatures");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::CreatureConfig;
    use crate::mutation::{Mutation, MutationConfig};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn creature(score: Option<f32>) -> Creature {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut c = Creature::new(&CreatureConfig::new(2, 1), &mut rng);
        c.score = score;
        c
    }

    #[test]
    fn test_sort_prefers_score_then_simplicity() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut bigger = creature(Some(-0.5));
        bigger
            .mutate(Mutation::AddNode, &MutationConfig::default(), &mut rng)
            .unwrap();
        bigger.score = Some(-0.5);

        let mut population = vec![
            creature(None),
            bigger,
            creature(Some(-0.5)),
            creature(Some(-0.1)),
        ];
        sort(&mut population);

        assert_eq!(population[0].score, Some(-0.1));
        assert_eq!(population[1].score, Some(-0.5));
        assert_eq!(population[1].hidden_count(), 0);
        assert_eq!(population[2].hidden_count(), 1);
        assert_eq!(population[3].score, None);
        assert_eq!(elitists(&population, 2).len(), 2);
    }

    #[test]
    fn test_anti_flood() {
        let mut improved = creature(Some(-0.1));
        mark_prior(&mut improved, "fine", -0.2);
        let mut stale = creature(Some(-0.3));
        mark_prior(&mut stale, "fine", -0.2);
        let plain = creature(Some(-1.0));

        let mut population = vec![improved, stale, plain];
        assert_eq!(anti_flood(&mut population), 1);
        assert_eq!(population.len(), 2);
        assert!(population.iter().all(|c| !is_flood(c)));
    }

    #[test]
    fn test_anti_flood_keeps_all_flooded() {
        let mut stale = creature(Some(-0.3));
        mark_prior(&mut stale, "trained", -0.3);
        let mut population = vec![stale];
        assert_eq!(anti_flood(&mut population), 0);
        assert_eq!(population.len(), 1);
    }
}
