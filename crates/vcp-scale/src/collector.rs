//! Run workers as a task group and merge their placements.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::watch;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::error::{Result, ScaleError};
use crate::placement::NodeVolumeMap;
use crate::worker::{run_worker, WorkerContext, WorkerOutput};

/// Run one worker per share and wait for all of them.
///
/// Results come back ordered by worker index. The first failure aborts the
/// remaining workers, waits for them to wind down and is returned. Setting
/// `stop` does the same and returns [`ScaleError::Interrupted`].
///
/// # Errors
/// Returns the first worker error, [`ScaleError::WorkerPanicked`] if a
/// worker panicked, or [`ScaleError::Interrupted`].
pub async fn run_workers(
    ctx: &WorkerContext,
    shares: &[usize],
    stop: watch::Receiver<bool>,
) -> Result<Vec<WorkerOutput>> {
    join_ordered(shares, stop, |worker, share| {
        run_worker(ctx.clone(), worker, share)
    })
    .await
}

/// Resolves once `stop` is set; never if the sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn abort_and_drain(set: &mut JoinSet<Result<WorkerOutput>>) {
    set.abort_all();
    while let Some(rest) = set.join_next().await {
        if let Ok(Err(e)) = rest {
            warn!(error = %e, "Additional worker failure while stopping");
        }
    }
}

async fn join_ordered<S, Fut>(
    shares: &[usize],
    mut stop: watch::Receiver<bool>,
    start: S,
) -> Result<Vec<WorkerOutput>>
where
    S: Fn(usize, usize) -> Fut,
    Fut: Future<Output = Result<WorkerOutput>> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut workers: HashMap<Id, usize> = HashMap::with_capacity(shares.len());

    for (worker, &share) in shares.iter().enumerate() {
        let handle = set.spawn(start(worker, share));
        workers.insert(handle.id(), worker);
    }
    info!(workers = shares.len(), "🚀 Launched workers");

    let mut outputs: Vec<Option<WorkerOutput>> = vec![None; shares.len()];
    loop {
        let joined = tokio::select! {
            joined = set.join_next_with_id() => joined,
            () = stopped(&mut stop) => {
                warn!("Stopping workers");
                abort_and_drain(&mut set).await;
                return Err(ScaleError::Interrupted);
            }
        };
        let Some(joined) = joined else { break };

        let failure = match joined {
            Ok((id, Ok(output))) => {
                info!(worker = output.worker, "Worker reported");
                let slot = workers.get(&id).copied().unwrap_or(output.worker);
                outputs[slot] = Some(output);
                continue;
            }
            Ok((id, Err(e))) => {
                error!(worker = ?workers.get(&id), error = %e, "Worker failed");
                e
            }
            Err(join_error) => from_join_error(&workers, &join_error),
        };

        abort_and_drain(&mut set).await;
        return Err(failure);
    }

    outputs
        .into_iter()
        .enumerate()
        .map(|(worker, output)| output.ok_or(ScaleError::WorkerCancelled(worker)))
        .collect()
}

fn from_join_error(workers: &HashMap<Id, usize>, join_error: &JoinError) -> ScaleError {
    let worker = workers.get(&join_error.id()).copied().unwrap_or_default();
    if join_error.is_cancelled() {
        return ScaleError::WorkerCancelled(worker);
    }
    error!(worker, error = %join_error, "Worker panicked");
    ScaleError::WorkerPanicked {
        worker,
        message: join_error.to_string(),
    }
}

/// Merge worker placements, worker order first, batch order within.
#[must_use]
pub fn merge(outputs: &[WorkerOutput]) -> NodeVolumeMap {
    let mut merged = NodeVolumeMap::new();
    for output in outputs {
        merged.merge(&output.volumes);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn output(worker: usize, placements: &[(&str, &str)]) -> WorkerOutput {
        let mut volumes = NodeVolumeMap::new();
        for (node, volume) in placements {
            volumes.record(node, volume);
        }
        WorkerOutput {
            worker,
            volumes,
            ..WorkerOutput::default()
        }
    }

    #[test]
    fn test_merge_concatenates_in_worker_order() {
        let outputs = vec![
            output(0, &[("node-a", "w0-1"), ("node-b", "w0-2"), ("node-a", "w0-3")]),
            output(1, &[("node-a", "w1-1"), ("node-b", "w1-2")]),
            output(2, &[("node-c", "w2-1")]),
        ];

        let merged = merge(&outputs);
        assert_eq!(merged.volumes_on("node-a"), ["w0-1", "w0-3", "w1-1"]);
        assert_eq!(merged.volumes_on("node-b"), ["w0-2", "w1-2"]);
        assert_eq!(merged.volumes_on("node-c"), ["w2-1"]);
        assert_eq!(merged.volume_count(), 6);
    }

    #[test]
    fn test_merge_of_nothing_is_empty() {
        assert!(merge(&[]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_ordered_by_worker_not_completion() {
        let (_tx, rx) = watch::channel(false);
        // Worker 0 finishes last, worker 1 first.
        let delays = [5, 0, 1];

        let outputs = join_ordered(&[1, 1, 1], rx, |worker, _| async move {
            tokio::time::sleep(Duration::from_secs(delays[worker])).await;
            let volume = format!("w{worker}");
            Ok(output(worker, &[("node-a", volume.as_str())]))
        })
        .await
        .unwrap();

        let order: Vec<usize> = outputs.iter().map(|o| o.worker).collect();
        assert_eq!(order, [0, 1, 2]);
        assert_eq!(merge(&outputs).volumes_on("node-a"), ["w0", "w1", "w2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_is_named() {
        let (_tx, rx) = watch::channel(false);

        let err = join_ordered(&[1, 1, 1], rx, |worker, _| async move {
            match worker {
                1 => panic!("worker {worker} blew up"),
                2 => tokio::time::sleep(Duration::from_secs(3600)).await,
                _ => {}
            }
            Ok(output(worker, &[]))
        })
        .await
        .unwrap_err();

        assert!(
            matches!(err, ScaleError::WorkerPanicked { worker: 1, .. }),
            "{err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_aborts_remaining_workers() {
        let (_tx, rx) = watch::channel(false);
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();

        let err = join_ordered(&[1, 1], rx, move |worker, _| {
            let counter = counter.clone();
            async move {
                if worker == 0 {
                    return Err(ScaleError::NoNodeSelectors);
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(output(worker, &[]))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ScaleError::NoNodeSelectors));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_and_drains() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });

        let err = join_ordered(&[1, 1], rx, |worker, _| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(output(worker, &[]))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScaleError::Interrupted));
    }

    #[tokio::test]
    async fn test_cancelled_task_maps_to_worker_cancelled() {
        let mut set: JoinSet<()> = JoinSet::new();
        let handle = set.spawn(std::future::pending::<()>());
        let workers = HashMap::from([(handle.id(), 3)]);
        handle.abort();

        let join_error = set.join_next().await.unwrap().unwrap_err();
        assert!(matches!(
            from_join_error(&workers, &join_error),
            ScaleError::WorkerCancelled(3)
        ));
    }
}
