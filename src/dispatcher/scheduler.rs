use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{Trigger, TriggerSubmitter};
use crate::config::SchedulerConfig;
use crate::dependency::DependencyResolver;
use crate::errors::EngineError;
use crate::shutdown::ShutdownSignal;

/// Timer interval for every scheduled entity type
pub fn schedule_for(
    resolver: &DependencyResolver,
    config: &SchedulerConfig,
) -> Vec<(String, Duration)> {
    resolver
        .scheduled_types()
        .map(|entity_type| {
            let secs = config
                .intervals
                .get(entity_type)
                .copied()
                .unwrap_or(config.default_interval_secs);
            (entity_type.to_string(), Duration::from_secs(secs))
        })
        .collect()
}

/// One timer task per scheduled entity type
pub struct Scheduler {
    timers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(
        submitter: TriggerSubmitter,
        schedule: Vec<(String, Duration)>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let mut timers = Vec::with_capacity(schedule.len());
        for (entity_type, period) in schedule {
            if period.is_zero() {
                warn!(entity_type = %entity_type, "Zero schedule interval; timer not started");
                continue;
            }
            info!(
                entity_type = %entity_type,
                interval_secs = period.as_secs_f64(),
                "Scheduling entity type"
            );
            let submitter = submitter.clone();
            let mut shutdown = shutdown.clone();
            timers.push(tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = ticker.tick() => {
                            let trigger = Trigger::Scheduled {
                                entity_type: entity_type.clone(),
                            };
                            match submitter.submit(trigger).await {
                                Ok(()) => debug!(entity_type = %entity_type, "Scheduled trigger queued"),
                                Err(EngineError::ShuttingDown) => break,
                                Err(error) => {
                                    warn!(entity_type = %entity_type, error = %error, "Scheduled trigger rejected")
                                }
                            }
                        }
                    }
                }
                debug!(entity_type = %entity_type, "Timer stopped");
            }));
        }
        Self { timers }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Wait for every timer to observe shutdown
    pub async fn join(self) {
        for timer in self.timers {
            if let Err(error) = timer.await {
                warn!(error = %error, "Timer task ended abnormally");
            }
        }
    }
}
