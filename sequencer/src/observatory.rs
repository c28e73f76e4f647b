//! Shared context the observation states act on

use crate::narration::SharedNarrator;
use async_trait::async_trait;
use observatory_camera::Autofocus;
use observatory_indi::IndiMount;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// An object to observe
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Target {
    pub name: String,
    pub ra_hours: f64,
    pub dec_degrees: f64,
    /// How long to follow the target once pointed
    #[serde(default)]
    pub duration_secs: f64,
}

impl Target {
    pub fn new(name: &str, ra_hours: f64, dec_degrees: f64) -> Self {
        Self {
            name: name.to_string(),
            ra_hours,
            dec_degrees,
            duration_secs: 0.0,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = duration.as_secs_f64();
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_secs).unwrap_or(Duration::ZERO)
    }
}

/// Mount operations the states need
#[async_trait]
pub trait Mount: Send + Sync {
    fn name(&self) -> &str;
    async fn slew_to_target(&self, target: &Target) -> anyhow::Result<()>;
    async fn is_tracking(&self) -> bool;
    async fn park(&self) -> anyhow::Result<()>;
    async fn is_parked(&self) -> bool;
}

pub type SharedMount = Arc<dyn Mount>;

#[async_trait]
impl Mount for IndiMount {
    fn name(&self) -> &str {
        self.device_name()
    }

    async fn slew_to_target(&self, target: &Target) -> anyhow::Result<()> {
        self.set_target(target.ra_hours, target.dec_degrees).await;
        IndiMount::slew_to_target(self).await?;
        Ok(())
    }

    async fn is_tracking(&self) -> bool {
        IndiMount::is_tracking(self).await
    }

    async fn park(&self) -> anyhow::Result<()> {
        IndiMount::park(self).await?;
        Ok(())
    }

    async fn is_parked(&self) -> bool {
        IndiMount::is_parked(self).await
    }
}

/// Hardware plus the current observation
pub struct Observatory {
    mount: SharedMount,
    autofocus: Option<Autofocus>,
    narrator: SharedNarrator,
    target: RwLock<Option<Target>>,
}

impl Observatory {
    pub fn new(mount: SharedMount, narrator: SharedNarrator) -> Self {
        Self {
            mount,
            autofocus: None,
            narrator,
            target: RwLock::new(None),
        }
    }

    pub fn with_autofocus(mut self, autofocus: Autofocus) -> Self {
        self.autofocus = Some(autofocus);
        self
    }

    pub fn mount(&self) -> &SharedMount {
        &self.mount
    }

    pub fn autofocus(&self) -> Option<&Autofocus> {
        self.autofocus.as_ref()
    }

    pub fn say(&self, message: &str) {
        self.narrator.say(message);
    }

    pub async fn set_target(&self, target: Target) {
        tracing::info!("Observing target {}", target.name);
        *self.target.write().await = Some(target);
    }

    pub async fn clear_target(&self) {
        *self.target.write().await = None;
    }

    pub async fn current_target(&self) -> Option<Target> {
        self.target.read().await.clone()
    }
}
