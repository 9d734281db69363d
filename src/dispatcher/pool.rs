// Worker pool
//
// A bounded queue feeds N workers. Each worker drains the follow-ups of the
// trigger it picked up before taking the next one, so a chain never waits
// behind the queue it feeds.

use std::sync::Arc;
use std::time::Duration;

use statig::prelude::*;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lifecycle::{DispatcherLifecycle, LifecycleEvent, RunPhase};
use super::{Dispatcher, Trigger};
use crate::errors::EngineError;
use crate::observability::engine_metrics;
use crate::shutdown::{with_grace_period, ShutdownCoordinator};

type Lifecycle = Arc<Mutex<StateMachine<DispatcherLifecycle>>>;

/// Cloneable handle for feeding the pool
#[derive(Clone)]
pub struct TriggerSubmitter {
    sender: mpsc::Sender<Trigger>,
    lifecycle: Lifecycle,
}

impl TriggerSubmitter {
    /// Queue a trigger, waiting for room; refused once draining has begun
    pub async fn submit(&self, trigger: Trigger) -> Result<(), EngineError> {
        if !self.lifecycle.lock().await.inner().accepts_work() {
            return Err(EngineError::ShuttingDown);
        }
        self.sender
            .send(trigger)
            .await
            .map_err(|_| EngineError::ShuttingDown)
    }
}

pub struct WorkerPool {
    submitter: TriggerSubmitter,
    stop: ShutdownCoordinator,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(dispatcher: Arc<Dispatcher>, worker_count: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let stop = ShutdownCoordinator::new();

        let mut machine = DispatcherLifecycle::default().state_machine();
        machine.handle(&LifecycleEvent::Start);
        let lifecycle = Arc::new(Mutex::new(machine));

        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let dispatcher = Arc::clone(&dispatcher);
                let receiver = Arc::clone(&receiver);
                let mut stop = stop.signal();
                tokio::spawn(async move {
                    loop {
                        let next = {
                            let mut receiver = receiver.lock().await;
                            let received = tokio::select! {
                                biased;
                                trigger = receiver.recv() => Some(trigger),
                                _ = stop.wait() => None,
                            };
                            // Stopping still hands out whatever is already queued
                            match received {
                                Some(trigger) => trigger,
                                None => receiver.try_recv().ok(),
                            }
                        };
                        let Some(trigger) = next else { break };
                        let report = dispatcher.run_until_quiescent(trigger).await;
                        debug!(
                            worker,
                            ticks = report.ticks,
                            transitions = report.transitions,
                            failures = report.failures.len(),
                            "Trigger drained"
                        );
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        info!(
            workers = worker_count.max(1),
            queue_capacity = queue_capacity.max(1),
            "Worker pool started"
        );
        Self {
            submitter: TriggerSubmitter { sender, lifecycle },
            stop,
            workers,
        }
    }

    pub fn submitter(&self) -> TriggerSubmitter {
        self.submitter.clone()
    }

    pub async fn submit(&self, trigger: Trigger) -> Result<(), EngineError> {
        self.submitter.submit(trigger).await
    }

    pub async fn phase(&self) -> RunPhase {
        self.submitter.lifecycle.lock().await.inner().phase()
    }

    /// Stop accepting work, let workers finish what is queued, then stop
    pub async fn shutdown(self, grace: Duration) -> anyhow::Result<()> {
        let lifecycle = Arc::clone(&self.submitter.lifecycle);
        lifecycle.lock().await.handle(&LifecycleEvent::Drain);
        self.stop.trigger();
        drop(self.submitter);

        let mut result = Ok(());
        for worker in self.workers {
            match with_grace_period("worker drain", grace, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => warn!(error = %join_error, "Worker ended abnormally"),
                Err(timeout) => {
                    result = Err(timeout);
                }
            }
        }

        lifecycle.lock().await.handle(&LifecycleEvent::Stop);
        info!("Worker pool stopped");
        engine_metrics().log_stats();
        result
    }
}
