//! Observation state machine
//!
//! Enters one state at a time. A state that fails is never fatal: safing
//! states retry themselves, every other state hands over to parking.

use crate::config::StateMachineConfig;
use crate::observatory::Observatory;
use crate::states::{default_states, SharedState, StateName};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MachineError {
    #[error("No terminal state reached after {0} transitions")]
    TransitionLimit(usize),
}

pub struct StateMachine {
    observatory: Arc<Observatory>,
    config: StateMachineConfig,
    states: HashMap<StateName, SharedState>,
    current: StateName,
    next: Option<StateName>,
}

impl StateMachine {
    /// A machine with the built-in states, starting out parked
    pub fn new(observatory: Arc<Observatory>, config: StateMachineConfig) -> Self {
        let states = default_states()
            .into_iter()
            .map(|state| (state.name(), state))
            .collect();
        Self {
            observatory,
            config,
            states,
            current: StateName::Parked,
            next: None,
        }
    }

    /// Replace the state registered under the same name
    pub fn register(&mut self, state: SharedState) {
        self.states.insert(state.name(), state);
    }

    pub fn observatory(&self) -> &Arc<Observatory> {
        &self.observatory
    }

    pub fn current_state(&self) -> StateName {
        self.current
    }

    pub fn next_state(&self) -> Option<StateName> {
        self.next
    }

    /// Enter `name`, run its enter-action and record the successor
    pub async fn enter(&mut self, name: StateName) -> Option<StateName> {
        self.current = name;
        let next = match self.states.get(&name).cloned() {
            Some(state) => self.run_state(state).await,
            None => {
                tracing::error!("No state registered for {}", name);
                Some(StateName::Parking)
            }
        };
        self.next = next;
        next
    }

    async fn run_state(&self, state: SharedState) -> Option<StateName> {
        let name = state.name();
        tracing::info!("Entering {} state", name);

        let outcome = AssertUnwindSafe(state.on_enter(&self.observatory, &self.config))
            .catch_unwind()
            .await;
        let error = match outcome {
            Ok(Ok(Some(next))) => {
                tracing::debug!("{} -> {}", name, next);
                return Some(next);
            }
            Ok(Ok(None)) if state.is_safing() => return None,
            Ok(Ok(None)) => {
                tracing::warn!("{} chose no successor, parking", name);
                return Some(StateName::Parking);
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => "state panicked".to_string(),
        };

        tracing::error!("Problem in {} state: {}", name, error);
        if state.is_safing() {
            self.observatory
                .say(&format!("There was a problem while {}, trying again: {}", name, error));
            Some(name)
        } else {
            self.observatory.say(&format!(
                "Wait a minute, there was a problem while {}. Sending to parking: {}",
                name, error
            ));
            Some(StateName::Parking)
        }
    }

    /// Step from `start` until a state chooses no successor
    ///
    /// Returns the states entered, in order.
    pub async fn run_until_parked(
        &mut self,
        start: StateName,
        max_transitions: usize,
    ) -> Result<Vec<StateName>, MachineError> {
        let mut visited = Vec::new();
        let mut name = start;
        loop {
            if visited.len() >= max_transitions {
                return Err(MachineError::TransitionLimit(max_transitions));
            }
            visited.push(name);
            match self.enter(name).await {
                Some(next) => name = next,
                None => return Ok(visited),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narration::MemoryNarrator;
    use crate::observatory::{Mount, Target};
    use crate::states::State;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubMount {
        fail_slew: bool,
        fail_park: bool,
        tracking: AtomicBool,
        parked: AtomicBool,
        park_calls: AtomicUsize,
    }

    #[async_trait]
    impl Mount for StubMount {
        fn name(&self) -> &str {
            "Stub Mount"
        }

        async fn slew_to_target(&self, _target: &Target) -> anyhow::Result<()> {
            if self.fail_slew {
                bail!("slew rejected");
            }
            self.parked.store(false, Ordering::SeqCst);
            self.tracking.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn is_tracking(&self) -> bool {
            self.tracking.load(Ordering::SeqCst)
        }

        async fn park(&self) -> anyhow::Result<()> {
            self.park_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_park {
                bail!("park rejected");
            }
            self.tracking.store(false, Ordering::SeqCst);
            self.parked.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn is_parked(&self) -> bool {
            self.parked.load(Ordering::SeqCst)
        }
    }

    fn fast_config() -> StateMachineConfig {
        StateMachineConfig {
            poll_interval_ms: 1,
            slew_timeout_secs: 1,
            park_timeout_secs: 1,
            ..Default::default()
        }
    }

    fn machine(mount: Arc<StubMount>) -> (StateMachine, Arc<MemoryNarrator>) {
        let narrator = Arc::new(MemoryNarrator::new());
        let observatory = Observatory::new(mount, narrator.clone());
        (StateMachine::new(Arc::new(observatory), fast_config()), narrator)
    }

    #[tokio::test]
    async fn test_starts_parked() {
        let (machine, _) = machine(Arc::new(StubMount::default()));
        assert_eq!(machine.current_state(), StateName::Parked);
        assert_eq!(machine.next_state(), None);
    }

    #[tokio::test]
    async fn test_slewing_failure_parks() {
        let mount = Arc::new(StubMount {
            fail_slew: true,
            ..Default::default()
        });
        let (mut machine, narrator) = machine(mount);
        machine.observatory().set_target(Target::new("M42", 5.58, -5.39)).await;

        let next = machine.enter(StateName::Slewing).await;
        assert_eq!(next, Some(StateName::Parking));
        assert_eq!(machine.current_state(), StateName::Slewing);
        assert_eq!(machine.next_state(), Some(StateName::Parking));
        assert!(narrator
            .messages()
            .iter()
            .any(|m| m.contains("problem while slewing") && m.contains("slew rejected")));
    }

    #[tokio::test]
    async fn test_slewing_success_moves_to_pointing() {
        let (mut machine, _) = machine(Arc::new(StubMount::default()));
        machine.observatory().set_target(Target::new("M42", 5.58, -5.39)).await;
        assert_eq!(machine.enter(StateName::Slewing).await, Some(StateName::Pointing));
    }

    #[tokio::test]
    async fn test_failing_safing_state_retries_itself() {
        let mount = Arc::new(StubMount {
            fail_park: true,
            ..Default::default()
        });
        let (mut machine, narrator) = machine(mount.clone());

        assert_eq!(machine.enter(StateName::Parking).await, Some(StateName::Parking));
        assert_eq!(machine.enter(StateName::Parking).await, Some(StateName::Parking));
        assert_eq!(mount.park_calls.load(Ordering::SeqCst), 2);
        assert!(narrator.messages().iter().any(|m| m.contains("trying again")));
    }

    #[tokio::test]
    async fn test_parked_is_terminal() {
        let mount = Arc::new(StubMount::default());
        mount.parked.store(true, Ordering::SeqCst);
        let (mut machine, _) = machine(mount);
        assert_eq!(machine.enter(StateName::Parked).await, None);
        assert_eq!(machine.next_state(), None);
    }

    #[tokio::test]
    async fn test_scheduling_without_target_parks() {
        let (mut machine, narrator) = machine(Arc::new(StubMount::default()));
        assert_eq!(machine.enter(StateName::Scheduling).await, Some(StateName::Parking));
        assert!(narrator.messages().iter().any(|m| m.contains("No valid observations")));
    }

    #[tokio::test]
    async fn test_full_observation_run() {
        let mount = Arc::new(StubMount::default());
        let (mut machine, _) = machine(mount.clone());
        machine
            .observatory()
            .set_target(Target::new("M42", 5.58, -5.39).with_duration(std::time::Duration::from_millis(5)))
            .await;

        let visited = machine.run_until_parked(StateName::Scheduling, 20).await.unwrap();
        assert_eq!(
            visited,
            vec![
                StateName::Scheduling,
                StateName::Slewing,
                StateName::Pointing,
                StateName::Tracking,
                StateName::Parking,
                StateName::Parked,
            ]
        );
        assert!(mount.is_parked().await);
    }

    #[tokio::test]
    async fn test_lost_tracking_parks() {
        let mount = Arc::new(StubMount::default());
        let (mut machine, _) = machine(mount);
        machine.observatory().set_target(Target::new("M42", 5.58, -5.39)).await;
        assert_eq!(machine.enter(StateName::Tracking).await, Some(StateName::Parking));
    }

    #[tokio::test]
    async fn test_housekeeping_clears_target() {
        let mount = Arc::new(StubMount::default());
        mount.parked.store(true, Ordering::SeqCst);
        let (mut machine, _) = machine(mount);
        machine.observatory().set_target(Target::new("M42", 5.58, -5.39)).await;

        let visited = machine.run_until_parked(StateName::Housekeeping, 5).await.unwrap();
        assert_eq!(visited, vec![StateName::Housekeeping, StateName::Parked]);
        assert!(machine.observatory().current_target().await.is_none());
    }

    #[tokio::test]
    async fn test_transition_limit() {
        let mount = Arc::new(StubMount {
            fail_park: true,
            ..Default::default()
        });
        let (mut machine, _) = machine(mount);
        let err = machine.run_until_parked(StateName::Parking, 3).await.unwrap_err();
        assert_eq!(err, MachineError::TransitionLimit(3));
    }

    struct Undecided;

    #[async_trait]
    impl State for Undecided {
        fn name(&self) -> StateName {
            StateName::Pointing
        }

        async fn on_enter(&self, _observatory: &Observatory, _config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
            Ok(None)
        }
    }

    struct Exploding;

    #[async_trait]
    impl State for Exploding {
        fn name(&self) -> StateName {
            StateName::Tracking
        }

        async fn on_enter(&self, _observatory: &Observatory, _config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
            panic!("tracking exploded");
        }
    }

    #[tokio::test]
    async fn test_registered_states_replace_defaults() {
        let (mut machine, _) = machine(Arc::new(StubMount::default()));
        machine.register(Arc::new(Undecided));
        machine.register(Arc::new(Exploding));

        assert_eq!(machine.enter(StateName::Pointing).await, Some(StateName::Parking));
        assert_eq!(machine.enter(StateName::Tracking).await, Some(StateName::Parking));
    }

    struct StubCamera;

    #[async_trait]
    impl observatory_camera::Camera for StubCamera {
        fn name(&self) -> &str {
            "Stub Camera"
        }

        async fn uid(&self) -> String {
            "abc123".to_string()
        }

        async fn is_connected(&self) -> bool {
            true
        }

        fn file_extension(&self) -> &str {
            "cr2"
        }

        async fn take_exposure(&self, _seconds: f64, _path: &std::path::Path) -> observatory_camera::CameraResult<()> {
            Ok(())
        }
    }

    struct NoFrames;

    #[async_trait]
    impl observatory_camera::FrameStore for NoFrames {
        async fn read_and_remove(&self, path: &std::path::Path) -> observatory_camera::CameraResult<observatory_camera::ImageFrame> {
            Err(observatory_camera::CameraError::HardwareError(format!("no frame at {}", path.display())))
        }
    }

    #[tokio::test]
    async fn test_pointing_narrates_failed_autofocus_and_tracks() {
        let mount = Arc::new(StubMount::default());
        mount.tracking.store(true, Ordering::SeqCst);
        let narrator = Arc::new(MemoryNarrator::new());
        let autofocus = observatory_camera::Autofocus::new(Arc::new(StubCamera), None, Arc::new(NoFrames), "/tmp/focus");
        let observatory = Observatory::new(mount, narrator.clone()).with_autofocus(autofocus);
        let config = StateMachineConfig {
            autofocus_on_pointing: true,
            ..fast_config()
        };
        let mut machine = StateMachine::new(Arc::new(observatory), config);

        assert_eq!(machine.enter(StateName::Pointing).await, Some(StateName::Tracking));
        assert!(narrator.messages().iter().any(|m| m.starts_with("Autofocus failed")));
    }
}
