use serde::Serialize;
use statig::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start,
    Drain,
    Stop,
}

/// Observable run phase, mirrored from the state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Default)]
pub struct DispatcherLifecycle {
    phase: RunPhase,
}

impl DispatcherLifecycle {
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// New work is only accepted before draining begins
    pub fn accepts_work(&self) -> bool {
        matches!(self.phase, RunPhase::Idle | RunPhase::Running)
    }

    fn enter(&mut self, phase: RunPhase) {
        tracing::info!(from = ?self.phase, to = ?phase, "Dispatcher phase changed");
        self.phase = phase;
    }
}

#[state_machine(initial = "State::idle()")]
impl DispatcherLifecycle {
    #[state]
    fn idle(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Start => {
                self.enter(RunPhase::Running);
                Transition(State::running())
            }
            LifecycleEvent::Stop => {
                self.enter(RunPhase::Stopped);
                Transition(State::stopped())
            }
            LifecycleEvent::Drain => Handled,
        }
    }

    #[state]
    fn running(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Drain => {
                self.enter(RunPhase::Draining);
                Transition(State::draining())
            }
            LifecycleEvent::Stop => {
                self.enter(RunPhase::Stopped);
                Transition(State::stopped())
            }
            LifecycleEvent::Start => Handled,
        }
    }

    #[state]
    fn draining(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Stop => {
                self.enter(RunPhase::Stopped);
                Transition(State::stopped())
            }
            _ => Handled,
        }
    }

    #[state]
    fn stopped(event: &LifecycleEvent) -> Outcome<State> {
        tracing::debug!(?event, "Dispatcher already stopped");
        Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_runs_in_order() {
        let mut sm = DispatcherLifecycle::default().state_machine();
        assert_eq!(sm.inner().phase(), RunPhase::Idle);

        sm.handle(&LifecycleEvent::Start);
        assert!(sm.inner().accepts_work());

        sm.handle(&LifecycleEvent::Drain);
        assert_eq!(sm.inner().phase(), RunPhase::Draining);
        assert!(!sm.inner().accepts_work());

        sm.handle(&LifecycleEvent::Start);
        assert_eq!(sm.inner().phase(), RunPhase::Draining);

        sm.handle(&LifecycleEvent::Stop);
        assert_eq!(sm.inner().phase(), RunPhase::Stopped);
    }

    #[test]
    fn test_stop_from_idle() {
        let mut sm = DispatcherLifecycle::default().state_machine();
        sm.handle(&LifecycleEvent::Stop);
        assert_eq!(sm.inner().phase(), RunPhase::Stopped);
        sm.handle(&LifecycleEvent::Start);
        assert_eq!(sm.inner().phase(), RunPhase::Stopped);
    }
}
