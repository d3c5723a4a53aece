//! Bounded, all-settled execution of a request's task list.

use std::{sync::Arc, time::Instant};

use metrics::{counter, gauge, histogram};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::{
    domain::{
        generation::{GenerationReport, TaskOutcome},
        task::{Task, TaskKind},
    },
    infra::telemetry::{TASK_DURATION_MS, TASKS_IN_FLIGHT, TASKS_TOTAL},
};

use super::{registry::StrategyRegistry, strategy::run_strategy};

/// Default number of strategy invocations allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 15;

/// Runs tasks in parallel under a global admission limit. Every task yields exactly
/// one outcome, in input order, whatever happens to its siblings.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<StrategyRegistry>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(registry: Arc<StrategyRegistry>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            registry,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub async fn run(&self, tasks: Vec<Task>) -> GenerationReport {
        let started = Instant::now();
        let total = tasks.len();
        info!(
            target = "courseviz::orchestrator",
            total,
            concurrency = self.concurrency,
            "orchestration started"
        );

        // Each task runs on its own tokio task so a panic stays contained to one outcome.
        let handles: Vec<_> = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| {
                let id = task.id().to_string();
                let kind = task.kind();
                let registry = Arc::clone(&self.registry);
                let permits = Arc::clone(&self.permits);
                let handle =
                    tokio::spawn(async move { execute(registry, permits, task, index + 1).await });
                (id, kind, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        for (id, kind, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    error!(
                        target = "courseviz::orchestrator",
                        task_id = %id,
                        kind = kind.as_str(),
                        error = %join_error,
                        "task aborted"
                    );
                    record_outcome(kind, false);
                    TaskOutcome::failure(id, format!("task aborted: {join_error}"))
                }
            };
            results.push(outcome);
        }

        let report = GenerationReport::new(results, started.elapsed().as_secs_f64());
        info!(
            target = "courseviz::orchestrator",
            total = report.metadata.total,
            succeeded = report.metadata.succeeded,
            duration_seconds = report.metadata.duration_seconds,
            "orchestration finished"
        );
        report
    }
}

async fn execute(
    registry: Arc<StrategyRegistry>,
    permits: Arc<Semaphore>,
    task: Task,
    position: usize,
) -> TaskOutcome {
    let kind = task.kind();
    let strategy = match registry.resolve(kind) {
        Ok(strategy) => strategy,
        Err(err) => {
            warn!(
                target = "courseviz::orchestrator",
                task_id = task.id(),
                kind = kind.as_str(),
                error = %err,
                "task has no registered strategy"
            );
            record_outcome(kind, false);
            return TaskOutcome::failure(task.id(), err.to_string());
        }
    };

    let Ok(_permit) = permits.acquire().await else {
        record_outcome(kind, false);
        return TaskOutcome::failure(task.id(), "orchestrator is shutting down");
    };

    let in_flight = gauge!(TASKS_IN_FLIGHT);
    in_flight.increment(1.0);
    let started = Instant::now();
    let result = run_strategy(strategy.as_ref(), &task, position).await;
    histogram!(TASK_DURATION_MS, "kind" => kind.as_str())
        .record(started.elapsed().as_secs_f64() * 1000.0);
    in_flight.decrement(1.0);

    match result {
        Ok(result) => {
            record_outcome(kind, true);
            TaskOutcome::success(&task, result)
        }
        Err(failure) => {
            record_outcome(kind, false);
            TaskOutcome::failure(failure.task_id, failure.source.to_string())
        }
    }
}

fn record_outcome(kind: TaskKind, succeeded: bool) {
    let outcome = if succeeded { "succeeded" } else { "failed" };
    counter!(TASKS_TOTAL, "kind" => kind.as_str(), "outcome" => outcome).increment(1);
}
