//! Launch execution.

use crate::compiler::{CompiledWork, ExecutableGraph};
use crate::queue::host::{HostDispatcher, panic_message};
use crate::queue::worker::QueueShared;
use opgraph_core::device::Device;
use opgraph_core::error::{OpGraphError, Result, ResultExt};
use opgraph_core::logging::{LogCategory, LogContext, LogEvent};
use opgraph_core::types::{LaunchId, NodeId, QueueId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

/// Run one piece of compiled work to completion.
///
/// Device operations run on the blocking pool, host callbacks on the queue's
/// callback thread.
pub(crate) async fn execute_work(
    work: CompiledWork,
    device: Arc<dyn Device>,
    host: HostDispatcher,
) -> std::result::Result<(), String> {
    match work {
        CompiledWork::Device(op) => {
            match tokio::task::spawn_blocking(move || device.execute(&op)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) if e.is_panic() => Err(format!(
                    "device operation panicked: {}",
                    panic_message(e.into_panic().as_ref())
                )),
                Err(_) => Err("device operation was cancelled".to_string()),
            }
        }
        CompiledWork::Host(callback) => host.dispatch(callback).await,
        CompiledWork::Empty => Ok(()),
    }
}

struct NodeTask {
    index: usize,
    node: NodeId,
    label: String,
    work: CompiledWork,
    device: Arc<dyn Device>,
    host: HostDispatcher,
    semaphore: Arc<Semaphore>,
    timeout: Option<Duration>,
    log: LogContext,
    queue: QueueId,
    launch: LaunchId,
}

impl NodeTask {
    async fn run(self) -> (usize, Result<()>) {
        let Self {
            index,
            node,
            label,
            work,
            device,
            host,
            semaphore,
            timeout,
            log,
            queue,
            launch,
        } = self;

        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return (
                    index,
                    Err("launch was shut down".to_string()).with_node(queue, node, launch),
                );
            }
        };

        log.debug(LogCategory::Node, format!("Executing {}", label));
        let started = Instant::now();

        let work = execute_work(work, device, host);
        tokio::pin!(work);

        // Blocking device work and host jobs cannot be cancelled. A node
        // that overruns is reported as failed only after it has finished.
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut work).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(node_id = %node, timeout_ms = limit.as_millis() as u64, "Node exceeded timeout, waiting for it to finish");
                    let _ = work.await;
                    Err(format!("timed out after {} ms", limit.as_millis()))
                }
            },
            None => work.await,
        };

        match outcome {
            Ok(()) => {
                debug!(node_id = %node, elapsed_us = started.elapsed().as_micros() as u64, "Node completed");
                (index, Ok(()))
            }
            Err(cause) => {
                let cause = format!("{}: {}", label, cause);
                log.log(
                    LogEvent::error(LogCategory::Node, "Node failed").with_field("error", cause.clone()),
                );
                warn!(node_id = %node, error = %cause, "Node failed");
                (index, Err(cause).with_node(queue, node, launch))
            }
        }
    }
}

/// Execute one launch of `exec` on the queue described by `shared`.
///
/// Nodes start as soon as all their predecessors have completed, with at
/// most `max_concurrent_nodes` running at once. After the first failure no
/// further nodes start; nodes already running are allowed to finish and the
/// first failure is returned.
pub(crate) async fn run_launch(
    shared: &QueueShared,
    exec: &ExecutableGraph,
    launch_id: LaunchId,
) -> Result<()> {
    let span = info_span!(
        "graph_launch",
        queue_id = %shared.id,
        exec_id = %exec.id(),
        launch_id = %launch_id,
        node_count = exec.node_count(),
    );

    async move {
        let nodes = exec.nodes();
        let log = shared.log.clone().with_launch_id(launch_id);
        log.log(
            LogEvent::info(LogCategory::Launch, "Launch started")
                .with_field("exec_id", exec.id().to_string())
                .with_field_i64("nodes", nodes.len() as i64),
        );
        let started = Instant::now();

        let semaphore = Arc::new(Semaphore::new(shared.config.max_concurrent_nodes.max(1)));
        let timeout = shared.config.node_timeout();

        let mut remaining: Vec<usize> = nodes.iter().map(|n| n.in_degree).collect();
        let mut ready: VecDeque<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| index)
            .collect();

        let mut tasks: JoinSet<(usize, Result<()>)> = JoinSet::new();
        let mut failure: Option<OpGraphError> = None;
        let mut completed = 0usize;

        loop {
            if failure.is_none() {
                while let Some(index) = ready.pop_front() {
                    let node = &nodes[index];
                    let task = NodeTask {
                        index,
                        node: node.id,
                        label: node.label.clone(),
                        work: node.work.clone(),
                        device: Arc::clone(&shared.device),
                        host: shared.host.clone(),
                        semaphore: Arc::clone(&semaphore),
                        timeout,
                        log: log.for_node(node.id),
                        queue: shared.id,
                        launch: launch_id,
                    };
                    tasks.spawn(task.run());
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((index, Ok(()))) => {
                    completed += 1;
                    for &successor in &nodes[index].successors {
                        remaining[successor] -= 1;
                        if remaining[successor] == 0 {
                            ready.push_back(successor);
                        }
                    }
                }
                Ok((_, Err(err))) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
                Err(join_error) => {
                    if failure.is_none() {
                        failure = Some(OpGraphError::ExecutionError {
                            queue: shared.id,
                            node: None,
                            launch: Some(launch_id),
                            cause: format!("node task failed: {}", join_error),
                        });
                    }
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as i64;
        match failure {
            Some(err) => {
                log.log(
                    LogEvent::error(LogCategory::Launch, "Launch failed")
                        .with_field("error", err.to_string())
                        .with_field_i64("completed_nodes", completed as i64)
                        .with_field_i64("duration_ms", elapsed_ms),
                );
                Err(err)
            }
            None => {
                log.log(
                    LogEvent::info(LogCategory::Launch, "Launch completed")
                        .with_field_i64("completed_nodes", completed as i64)
                        .with_field_i64("duration_ms", elapsed_ms),
                );
                info!(completed_nodes = completed, duration_ms = elapsed_ms, "Launch completed");
                Ok(())
            }
        }
    }
    .instrument(span)
    .await
}
