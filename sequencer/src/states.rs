//! Observation states
//!
//! Each state performs its enter-action against the [`Observatory`] and names
//! its successor. Returning no successor ends the run when the state is a
//! safing state; the machine parks otherwise.

use crate::config::StateMachineConfig;
use crate::observatory::Observatory;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use observatory_camera::AutofocusRequest;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Names of the observation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateName {
    Parked,
    Scheduling,
    Slewing,
    Pointing,
    Tracking,
    Parking,
    Housekeeping,
}

impl StateName {
    pub const ALL: [StateName; 7] = [
        StateName::Parked,
        StateName::Scheduling,
        StateName::Slewing,
        StateName::Pointing,
        StateName::Tracking,
        StateName::Parking,
        StateName::Housekeeping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateName::Parked => "parked",
            StateName::Scheduling => "scheduling",
            StateName::Slewing => "slewing",
            StateName::Pointing => "pointing",
            StateName::Tracking => "tracking",
            StateName::Parking => "parking",
            StateName::Housekeeping => "housekeeping",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state of the observation run
#[async_trait]
pub trait State: Send + Sync {
    fn name(&self) -> StateName;

    /// Safing states bring the hardware to rest and retry themselves on failure
    fn is_safing(&self) -> bool {
        false
    }

    /// Run the enter-action and choose the next state
    async fn on_enter(
        &self,
        observatory: &Observatory,
        config: &StateMachineConfig,
    ) -> anyhow::Result<Option<StateName>>;
}

pub type SharedState = Arc<dyn State>;

/// One instance of every built-in state
pub fn default_states() -> Vec<SharedState> {
    vec![
        Arc::new(ParkedState),
        Arc::new(SchedulingState),
        Arc::new(SlewingState),
        Arc::new(PointingState),
        Arc::new(TrackingState),
        Arc::new(ParkingState),
        Arc::new(HousekeepingState),
    ]
}

/// Poll `check` until it holds or `timeout` elapses
async fn poll_until<F, Fut>(what: &str, interval: Duration, timeout: Duration, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = bool> + Send,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("Timed out after {:?} waiting for {}", timeout, what);
        }
        sleep(interval).await;
    }
}

/// Mount at rest, end of the run
pub struct ParkedState;

#[async_trait]
impl State for ParkedState {
    fn name(&self) -> StateName {
        StateName::Parked
    }

    fn is_safing(&self) -> bool {
        true
    }

    async fn on_enter(&self, observatory: &Observatory, _config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
        if !observatory.mount().is_parked().await {
            tracing::warn!("Entered parked state with {} not parked", observatory.mount().name());
            return Ok(Some(StateName::Parking));
        }
        observatory.say("I'm parked now.");
        Ok(None)
    }
}

/// Pick what to observe
pub struct SchedulingState;

#[async_trait]
impl State for SchedulingState {
    fn name(&self) -> StateName {
        StateName::Scheduling
    }

    async fn on_enter(&self, observatory: &Observatory, _config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
        match observatory.current_target().await {
            Some(target) => {
                observatory.say(&format!("Got it! I'm going to observe {}.", target.name));
                Ok(Some(StateName::Slewing))
            }
            None => {
                observatory.say("No valid observations found, heading to park.");
                Ok(Some(StateName::Parking))
            }
        }
    }
}

/// Move the mount onto the target
pub struct SlewingState;

#[async_trait]
impl State for SlewingState {
    fn name(&self) -> StateName {
        StateName::Slewing
    }

    async fn on_enter(&self, observatory: &Observatory, config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
        let target = observatory
            .current_target()
            .await
            .ok_or_else(|| anyhow!("No target to slew to"))?;
        let mount = observatory.mount();

        observatory.say(&format!("I'm slewing over to {}.", target.name));
        mount.slew_to_target(&target).await?;
        poll_until("tracking", config.poll_interval(), config.slew_timeout(), move || mount.is_tracking()).await?;

        observatory.say("I'm at the target, checking pointing.");
        Ok(Some(StateName::Pointing))
    }
}

/// Confirm the mount is on target, optionally refocus
pub struct PointingState;

#[async_trait]
impl State for PointingState {
    fn name(&self) -> StateName {
        StateName::Pointing
    }

    async fn on_enter(&self, observatory: &Observatory, config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
        if !observatory.mount().is_tracking().await {
            bail!("Mount {} is not tracking", observatory.mount().name());
        }

        if config.autofocus_on_pointing {
            match observatory.autofocus() {
                Some(autofocus) => {
                    observatory.say("Checking focus before tracking.");
                    let request = AutofocusRequest {
                        coarse: config.autofocus_coarse,
                        blocking: true,
                        ..Default::default()
                    };
                    let mut handle = autofocus.run_autofocus(request).await?;
                    let result = handle.wait().await;
                    if result.succeeded {
                        observatory.say(&format!(
                            "Focus done, focuser at {}.",
                            result.final_position.map_or_else(|| "unknown".to_string(), |p| p.to_string())
                        ));
                    } else {
                        observatory.say(&format!(
                            "Autofocus failed: {}. Tracking anyway.",
                            result.reason.as_deref().unwrap_or("unknown reason")
                        ));
                    }
                }
                None => tracing::debug!("Autofocus on pointing requested but no autofocus configured"),
            }
        }

        observatory.say("Pointing is good, tracking the target.");
        Ok(Some(StateName::Tracking))
    }
}

/// Follow the target for its duration
pub struct TrackingState;

#[async_trait]
impl State for TrackingState {
    fn name(&self) -> StateName {
        StateName::Tracking
    }

    async fn on_enter(&self, observatory: &Observatory, config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
        let target = observatory
            .current_target()
            .await
            .ok_or_else(|| anyhow!("No target to track"))?;
        let mount = observatory.mount();
        let end = Instant::now() + target.duration();

        loop {
            if !mount.is_tracking().await {
                bail!("Mount {} lost tracking on {}", mount.name(), target.name);
            }
            let now = Instant::now();
            if now >= end {
                break;
            }
            sleep(config.poll_interval().min(end - now)).await;
        }

        observatory.say(&format!("Done with {}.", target.name));
        Ok(Some(StateName::Parking))
    }
}

/// Bring the mount home
pub struct ParkingState;

#[async_trait]
impl State for ParkingState {
    fn name(&self) -> StateName {
        StateName::Parking
    }

    fn is_safing(&self) -> bool {
        true
    }

    async fn on_enter(&self, observatory: &Observatory, config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
        let mount = observatory.mount();
        observatory.say("I'm takin' it on home and then parking.");
        mount.park().await?;
        poll_until("park", config.poll_interval(), config.park_timeout(), move || mount.is_parked()).await?;
        Ok(Some(StateName::Parked))
    }
}

/// Tidy up after a night
pub struct HousekeepingState;

#[async_trait]
impl State for HousekeepingState {
    fn name(&self) -> StateName {
        StateName::Housekeeping
    }

    fn is_safing(&self) -> bool {
        true
    }

    async fn on_enter(&self, observatory: &Observatory, _config: &StateMachineConfig) -> anyhow::Result<Option<StateName>> {
        observatory.say("Recording all the data for the night.");
        observatory.clear_target().await;
        Ok(Some(StateName::Parked))
    }
}
