//! INDI Focuser wrapper
//!
//! Provides absolute focuser moves via INDI, with travel limits and
//! autofocus defaults taken from configuration.

use crate::device::IndiDevice;
use crate::error::{IndiError, IndiResult};
use crate::protocol::standard_properties::*;
use crate::IndiPropertyState;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Focuser travel limits and autofocus defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FocuserConfig {
    pub min_position: i32,
    pub max_position: i32,
    /// Sweep widths in encoder units as (fine, coarse)
    pub autofocus_range: Option<(i32, i32)>,
    /// Sweep steps in encoder units as (fine, coarse)
    pub autofocus_step: Option<(i32, i32)>,
    /// Exposure time for focus frames
    pub autofocus_seconds: Option<f64>,
    /// Time allowed for a single move (default: 120 seconds)
    pub move_timeout_secs: u64,
    /// Interval between move-state polls (default: 250 ms)
    pub poll_interval_ms: u64,
}

impl Default for FocuserConfig {
    fn default() -> Self {
        Self {
            min_position: 0,
            max_position: 100_000,
            autofocus_range: None,
            autofocus_step: None,
            autofocus_seconds: None,
            move_timeout_secs: 120,
            poll_interval_ms: 250,
        }
    }
}

impl FocuserConfig {
    pub fn move_timeout(&self) -> Duration {
        Duration::from_secs(self.move_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn with_limits(mut self, min_position: i32, max_position: i32) -> Self {
        self.min_position = min_position;
        self.max_position = max_position;
        self
    }

    pub fn with_autofocus(mut self, range: (i32, i32), step: (i32, i32), seconds: f64) -> Self {
        self.autofocus_range = Some(range);
        self.autofocus_step = Some(step);
        self.autofocus_seconds = Some(seconds);
        self
    }
}

/// INDI Focuser device wrapper
pub struct IndiFocuser {
    device: Arc<IndiDevice>,
    config: FocuserConfig,
}

impl IndiFocuser {
    /// Create a new INDI focuser wrapper
    pub fn new(device: Arc<IndiDevice>, config: FocuserConfig) -> Self {
        Self { device, config }
    }

    /// Get the device name
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn config(&self) -> &FocuserConfig {
        &self.config
    }

    /// Connect to the focuser
    pub async fn connect(&self) {
        self.device.connect().await
    }

    /// Disconnect from the focuser
    pub async fn disconnect(&self) -> IndiResult<()> {
        self.device.disconnect().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    /// Get current position
    pub async fn position(&self) -> IndiResult<i32> {
        let value = self
            .device
            .get_property(ABS_FOCUS_POSITION, FOCUS_ABSOLUTE_POSITION)
            .await?;
        value
            .trim()
            .parse::<f64>()
            .map(|p| p.round() as i32)
            .map_err(|_| IndiError::InvalidValue {
                path: format!("{}.{}.{}", self.device_name(), ABS_FOCUS_POSITION, FOCUS_ABSOLUTE_POSITION),
                value,
            })
    }

    /// Move to absolute position, clamped to travel limits
    ///
    /// Waits for the move to finish and returns the position actually reached.
    pub async fn move_to(&self, position: i32) -> IndiResult<i32> {
        let target = position.clamp(self.config.min_position, self.config.max_position);
        if target != position {
            tracing::warn!(
                "Requested focus position {} outside {}..={}, using {}",
                position,
                self.config.min_position,
                self.config.max_position,
                target
            );
        }

        let value = target.to_string();
        self.device
            .set_property(ABS_FOCUS_POSITION, &[(FOCUS_ABSOLUTE_POSITION, value.as_str())])
            .await?;
        self.wait_until_idle().await?;

        let reached = self.position().await?;
        tracing::debug!("'{}' moved to {} (requested {})", self.device_name(), reached, target);
        Ok(reached)
    }

    async fn wait_until_idle(&self) -> IndiResult<()> {
        let deadline = Instant::now() + self.config.move_timeout();
        loop {
            match self.device.property_state(ABS_FOCUS_POSITION).await? {
                Some(IndiPropertyState::Busy) => {}
                Some(IndiPropertyState::Alert) => {
                    return Err(IndiError::DeviceAlert {
                        device: self.device_name().to_string(),
                        property: ABS_FOCUS_POSITION.to_string(),
                    })
                }
                _ => return Ok(()),
            }

            if Instant::now() >= deadline {
                return Err(IndiError::Timeout {
                    command: format!("{}.{} move", self.device_name(), ABS_FOCUS_POSITION),
                    duration: self.config.move_timeout(),
                });
            }
            sleep(self.config.poll_interval()).await;
        }
    }
}
