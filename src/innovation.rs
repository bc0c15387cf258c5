//! Positional innovation ids for connection genes.
//!
//! Crossover aligns connection genes of two parents by the positions of
//! their endpoints. The pair `(from, to)` is folded into a single id with
//! the Cantor pairing function, which is a bijection on `N x N`, so equal
//! ids always mean equal endpoint positions.

/// Cantor pairing of a `(from, to)` position pair.
#[inline]
#[must_use]
pub fn innovation_id(from: usize, to: usize) -> u64 {
    let a = from as u64;
    let b = to as u64;
    (a + b) * (a + b + 1) / 2 + b
}

/// Inverse of [`innovation_id`].
#[must_use]
pub fn split_innovation(id: u64) -> (usize, usize) {
    // w = floor((sqrt(8z + 1) - 1) / 2), corrected for float rounding.
    let mut w = ((((8 * id + 1) as f64).sqrt() - 1.0) / 2.0).floor() as u64;
    while w * (w + 1) / 2 > id {
        w -= 1;
    }
    while (w + 1) * (w + 2) / 2 <= id {
        w += 1;
    }
    let t = w * (w + 1) / 2;
    let to = id - t;
    let from = w - to;
    (from as usize, to as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innovation_deterministic() {
        assert_eq!(innovation_id(3, 7), innovation_id(3, 7));
    }

    #[test]
    fn test_innovation_order_matters() {
        assert_ne!(innovation_id(1, 2), innovation_id(2, 1));
    }

    #[test]
    fn test_innovation_is_injective_on_small_grid() {
        let mut ids: Vec<u64> = (0..60)
            .flat_map(|a| (0..60).map(move |b| innovation_id(a, b)))
            .collect();
        let n = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), n);
    }

    #[test]
    fn test_split_inverts_pairing() {
        for (a, b) in [(0, 0), (0, 5), (5, 0), (17, 230), (1023, 4)] {
            assert_eq!(split_innovation(innovation_id(a, b)), (a, b));
        }
    }
}
