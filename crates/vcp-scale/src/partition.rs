//! Splitting the volume count across workers and batches.

use thiserror::Error;

use crate::config::MAX_INSTANCES;

/// Errors from work partitioning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Zero workers requested.
    #[error("At least one worker is required")]
    NoWorkers,

    /// More workers than allowed.
    #[error("{workers} workers requested, maximum is {max}")]
    TooManyWorkers { workers: usize, max: usize },

    /// More workers than volumes.
    #[error("{workers} workers cannot share {volumes} volumes")]
    MoreWorkersThanVolumes { workers: usize, volumes: usize },

    /// Zero volumes per pod.
    #[error("Volumes per pod must be greater than zero")]
    ZeroBatchSize,

    /// Nothing to rotate through.
    #[error("Cannot plan batches without {0}")]
    Empty(&'static str),
}

/// Split `volume_count` into one share per worker.
///
/// Every share is `volume_count / workers` except the last, which also
/// takes the remainder so the shares sum to `volume_count`.
///
/// # Errors
/// Returns a [`PartitionError`] when `workers` is zero, above
/// [`MAX_INSTANCES`] or above `volume_count`.
pub fn partition(volume_count: usize, workers: usize) -> Result<Vec<usize>, PartitionError> {
    if workers == 0 {
        return Err(PartitionError::NoWorkers);
    }
    if workers > MAX_INSTANCES {
        return Err(PartitionError::TooManyWorkers {
            workers,
            max: MAX_INSTANCES,
        });
    }
    if workers > volume_count {
        return Err(PartitionError::MoreWorkersThanVolumes {
            workers,
            volumes: volume_count,
        });
    }

    let base = volume_count / workers;
    let mut shares = vec![base; workers];
    if let Some(last) = shares.last_mut() {
        *last = volume_count - base * (workers - 1);
    }
    Ok(shares)
}

/// One pod's worth of claims inside a worker's share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// Position of the batch within the worker.
    pub index: usize,
    /// Number of claims (and mounted volumes) in the batch.
    pub size: usize,
    /// Storage class used for every claim of the batch.
    pub storage_class: usize,
    /// Node selector the batch's pod is pinned with.
    pub node_selector: usize,
}

/// Plan the batches of one worker.
///
/// Batches hold `volumes_per_pod` claims except the last, which holds what
/// is left. Storage classes and node selectors are assigned round-robin in
/// batch order, both starting from the first entry.
///
/// # Errors
/// Returns a [`PartitionError`] when `volumes_per_pod` is zero or there
/// are no storage classes or node selectors to rotate through.
pub fn plan_batches(
    share: usize,
    volumes_per_pod: usize,
    storage_classes: usize,
    node_selectors: usize,
) -> Result<Vec<Batch>, PartitionError> {
    if volumes_per_pod == 0 {
        return Err(PartitionError::ZeroBatchSize);
    }
    if storage_classes == 0 {
        return Err(PartitionError::Empty("storage classes"));
    }
    if node_selectors == 0 {
        return Err(PartitionError::Empty("node selectors"));
    }

    let batches = (0..share)
        .step_by(volumes_per_pod)
        .enumerate()
        .map(|(index, offset)| Batch {
            index,
            size: volumes_per_pod.min(share - offset),
            storage_class: index % storage_classes,
            node_selector: index % node_selectors,
        })
        .collect();
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shares_sum_to_volume_count() {
        for volumes in 1..=60 {
            for workers in 1..=MAX_INSTANCES.min(volumes) {
                let shares = partition(volumes, workers).unwrap();
                assert_eq!(shares.len(), workers);
                assert_eq!(shares.iter().sum::<usize>(), volumes);

                let base = volumes / workers;
                let (last, rest) = shares.split_last().unwrap();
                assert!(rest.iter().all(|&s| s == base), "{volumes}/{workers}: {shares:?}");
                assert_eq!(*last, base + volumes % workers);
            }
        }
    }

    #[test]
    fn test_remainder_goes_to_last_worker() {
        assert_eq!(partition(12, 3).unwrap(), vec![4, 4, 4]);
        assert_eq!(partition(14, 4).unwrap(), vec![3, 3, 3, 5]);
        assert_eq!(partition(5, 5).unwrap(), vec![1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_partition_preconditions() {
        assert_eq!(partition(10, 0), Err(PartitionError::NoWorkers));
        assert_eq!(
            partition(10, 6),
            Err(PartitionError::TooManyWorkers { workers: 6, max: 5 })
        );
        assert_eq!(
            partition(2, 3),
            Err(PartitionError::MoreWorkersThanVolumes {
                workers: 3,
                volumes: 2
            })
        );
    }

    #[test]
    fn test_batch_sizes_truncate_last() {
        let sizes: Vec<usize> = plan_batches(4, 3, 4, 2)
            .unwrap()
            .iter()
            .map(|b| b.size)
            .collect();
        assert_eq!(sizes, vec![3, 1]);

        let sizes: Vec<usize> = plan_batches(9, 3, 4, 2)
            .unwrap()
            .iter()
            .map(|b| b.size)
            .collect();
        assert_eq!(sizes, vec![3, 3, 3]);

        assert!(plan_batches(0, 3, 4, 2).unwrap().is_empty());
    }

    #[test]
    fn test_batch_sizes_cover_share() {
        for share in 1..40 {
            for per_pod in 1..8 {
                let batches = plan_batches(share, per_pod, 4, 3).unwrap();
                assert_eq!(batches.iter().map(|b| b.size).sum::<usize>(), share);
                let (last, rest) = batches.split_last().unwrap();
                assert!(rest.iter().all(|b| b.size == per_pod));
                assert!(last.size >= 1 && last.size <= per_pod);
            }
        }
    }

    #[test]
    fn test_round_robin_assignment() {
        let batches = plan_batches(10, 1, 4, 3).unwrap();
        let classes: Vec<usize> = batches.iter().map(|b| b.storage_class).collect();
        let selectors: Vec<usize> = batches.iter().map(|b| b.node_selector).collect();
        assert_eq!(classes, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
        assert_eq!(selectors, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(plan_batches(10, 1, 4, 3).unwrap(), batches);
    }

    #[test]
    fn test_batch_preconditions() {
        assert_eq!(plan_batches(4, 0, 4, 2), Err(PartitionError::ZeroBatchSize));
        assert_eq!(
            plan_batches(4, 2, 0, 2),
            Err(PartitionError::Empty("storage classes"))
        );
        assert_eq!(
            plan_batches(4, 2, 4, 0),
            Err(PartitionError::Empty("node selectors"))
        );
    }
}
