//! Partitioning records into batches of similar size.
//!
//! Clustering is a pure function of the record lengths, the batching policy
//! and an RNG. Callers build a fresh partition for every pass over the data.
use crate::config::{BatchConfig, Ordering};
use rand::seq::SliceRandom;
use rand::Rng;

/// Indices of `lengths` sorted ascending. Stable, so equal lengths keep load order.
fn argsort(lengths: &[usize]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..lengths.len()).collect();
    idx.sort_by_key(|&i| lengths[i]);
    idx
}

/// Order record indices according to the configured policy.
pub fn order_indices<R: Rng + ?Sized>(
    lengths: &[usize],
    config: &BatchConfig,
    rng: &mut R,
) -> Vec<usize> {
    match config.ordering() {
        Ordering::Sorted => argsort(lengths),
        Ordering::SemiShuffle => {
            let mut idx = argsort(lengths);
            for window in idx.chunks_mut(config.semi_shuffle_cluster_size.max(1)) {
                window.shuffle(rng);
            }
            idx
        }
        Ordering::Shuffle => {
            let mut idx: Vec<usize> = (0..lengths.len()).collect();
            idx.shuffle(rng);
            idx
        }
        Ordering::LoadOrder => (0..lengths.len()).collect(),
    }
}

/// Contiguous runs of `batch_size` indices.
pub fn fixed_size_batches(order: &[usize], batch_size: usize) -> Vec<Vec<usize>> {
    order
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Grow each batch while `max(length) * count <= max_tokens`.
///
/// A record whose length alone exceeds the budget forms its own batch.
pub fn token_budget_batches(
    order: &[usize],
    lengths: &[usize],
    max_tokens: usize,
) -> Vec<Vec<usize>> {
    let mut clusters = Vec::new();
    let mut batch: Vec<usize> = Vec::new();
    let mut batch_max = 0;
    for &idx in order {
        let candidate_max = batch_max.max(lengths[idx]);
        if !batch.is_empty() && candidate_max * (batch.len() + 1) > max_tokens {
            clusters.push(std::mem::take(&mut batch));
            batch_max = lengths[idx];
        } else {
            batch_max = candidate_max;
        }
        batch.push(idx);
    }
    if !batch.is_empty() {
        clusters.push(batch);
    }
    clusters
}

/// Partition records (given by their focus lengths) into batches.
pub fn cluster<R: Rng + ?Sized>(
    lengths: &[usize],
    config: &BatchConfig,
    rng: &mut R,
) -> Vec<Vec<usize>> {
    let order = order_indices(lengths, config, rng);
    let mut clusters = match config.batch_size {
        Some(batch_size) => fixed_size_batches(&order, batch_size),
        None => token_budget_batches(&order, lengths, config.max_term_res),
    };
    // the trailing batch goes whatever its size, in both batching modes
    if config.drop_last {
        clusters.pop();
    }
    if config.shuffles_clusters() {
        clusters.shuffle(rng);
    }
    tracing::debug!(
        records = lengths.len(),
        batches = clusters.len(),
        ordering = ?config.ordering(),
        "clustered records"
    );
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn lengths() -> Vec<usize> {
        vec![50, 10, 400, 20, 30, 35, 90, 15, 5, 60, 70, 10]
    }

    #[test]
    fn test_fixed_size_sorted() {
        let config = BatchConfig {
            batch_size: Some(4),
            sort_data: true,
            shuffle: false,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let clusters = cluster(&lengths(), &config, &mut rng);
        assert_eq!(clusters.len(), 3);
        let lens = lengths();
        // sorted and contiguous: every record in batch i is no longer than any in batch i+1
        for pair in clusters.windows(2) {
            let max_a = pair[0].iter().map(|&i| lens[i]).max().unwrap();
            let min_b = pair[1].iter().map(|&i| lens[i]).min().unwrap();
            assert!(max_a <= min_b);
        }
    }

    #[test]
    fn test_token_budget_bound() {
        let lens = lengths();
        for max_tokens in [1, 40, 100, 250, 1000] {
            let order: Vec<usize> = argsort(&lens);
            let clusters = token_budget_batches(&order, &lens, max_tokens);
            let flat: usize = clusters.iter().map(|b| b.len()).sum();
            assert_eq!(flat, lens.len());
            for batch in &clusters {
                let max = batch.iter().map(|&i| lens[i]).max().unwrap();
                assert!(
                    max * batch.len() <= max_tokens || batch.len() == 1,
                    "batch {batch:?} exceeds {max_tokens}"
                );
            }
        }
    }

    #[test]
    fn test_token_budget_unsorted_order() {
        let lens = vec![10, 100, 10, 10];
        let clusters = token_budget_batches(&[0, 1, 2, 3], &lens, 120);
        assert_eq!(clusters, vec![vec![0], vec![1], vec![2, 3]]);
    }

    #[test]
    fn test_semi_shuffle_stays_in_window() {
        let lens: Vec<usize> = (0..20).rev().collect();
        let config = BatchConfig {
            sort_data: false,
            shuffle: false,
            semi_shuffle: true,
            semi_shuffle_cluster_size: 5,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let order = order_indices(&lens, &config, &mut rng);
        for (w, window) in order.chunks(5).enumerate() {
            for &i in window {
                let rank = lens.len() - 1 - i;
                assert_eq!(rank / 5, w);
            }
        }
    }

    #[test]
    fn test_seeded_clustering_is_reproducible() {
        let config = BatchConfig {
            sort_data: false,
            batch_size: Some(3),
            ..Default::default()
        };
        let a = cluster(&lengths(), &config, &mut StdRng::seed_from_u64(42));
        let b = cluster(&lengths(), &config, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
        let mut all: Vec<usize> = a.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_last() {
        let config = BatchConfig {
            batch_size: Some(5),
            shuffle: false,
            drop_last: true,
            ..Default::default()
        };
        let clusters = cluster(&lengths(), &config, &mut StdRng::seed_from_u64(0));
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|b| b.len() == 5));
    }

    #[test]
    fn test_drop_last_token_budget() {
        let keep = BatchConfig {
            batch_size: None,
            max_term_res: 100,
            shuffle: false,
            ..Default::default()
        };
        let drop = BatchConfig {
            drop_last: true,
            ..keep.clone()
        };
        let mut all = cluster(&lengths(), &keep, &mut StdRng::seed_from_u64(0));
        let dropped = cluster(&lengths(), &drop, &mut StdRng::seed_from_u64(0));
        assert!(all.len() > 1);
        all.pop();
        assert_eq!(dropped, all);

        // a single full batch is dropped too
        let single = BatchConfig {
            batch_size: Some(12),
            shuffle: false,
            drop_last: true,
            ..Default::default()
        };
        assert!(cluster(&lengths(), &single, &mut StdRng::seed_from_u64(0)).is_empty());
    }
}
