//! INDI Mount wrapper
//!
//! Provides slew, tracking and park control on top of [`IndiDevice`].

use crate::device::IndiDevice;
use crate::error::{IndiError, IndiResult};
use crate::protocol::coord_elements::{DEC, RA};
use crate::protocol::standard_properties::*;
use crate::protocol::ON;
use crate::IndiPropertyState;
use std::sync::Arc;
use tokio::sync::RwLock;

/// INDI Mount device wrapper
pub struct IndiMount {
    device: Arc<IndiDevice>,
    target: RwLock<Option<(f64, f64)>>,
}

impl IndiMount {
    /// Create a new INDI mount wrapper
    pub fn new(device: Arc<IndiDevice>) -> Self {
        Self {
            device,
            target: RwLock::new(None),
        }
    }

    /// Get the device name
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn device(&self) -> &Arc<IndiDevice> {
        &self.device
    }

    /// Connect to the mount
    pub async fn connect(&self) {
        self.device.connect().await
    }

    /// Disconnect from the mount
    pub async fn disconnect(&self) -> IndiResult<()> {
        self.device.disconnect().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    /// Set the target (RA in hours, Dec in degrees) used by the next slew
    pub async fn set_target(&self, ra_hours: f64, dec_degrees: f64) {
        *self.target.write().await = Some((ra_hours, dec_degrees));
    }

    pub async fn clear_target(&self) {
        *self.target.write().await = None;
    }

    pub async fn target(&self) -> Option<(f64, f64)> {
        *self.target.read().await
    }

    /// Slew to the current target and track once there
    pub async fn slew_to_target(&self) -> IndiResult<()> {
        let (ra, dec) = self.target().await.ok_or_else(|| {
            IndiError::Precondition(format!("No target set for '{}'", self.device_name()))
        })?;

        tracing::info!("Slewing '{}' to RA={:.4}h, Dec={:.4}°", self.device_name(), ra, dec);
        self.device.set_property(ON_COORD_SET, &[(TRACK, ON)]).await?;

        let ra = ra.to_string();
        let dec = dec.to_string();
        self.device
            .set_property(EQUATORIAL_EOD_COORD, &[(RA, ra.as_str()), (DEC, dec.as_str())])
            .await?;
        Ok(())
    }

    /// Tracking switch is on and no slew is in progress
    pub async fn is_tracking(&self) -> bool {
        let tracking = matches!(
            self.device.get_property(TELESCOPE_TRACK_STATE, TRACK_ON).await.as_deref(),
            Ok(ON)
        );
        tracking && !self.is_slewing().await
    }

    /// Mount is slewing if the EQUATORIAL_EOD_COORD property is in Busy state
    pub async fn is_slewing(&self) -> bool {
        matches!(
            self.device.property_state(EQUATORIAL_EOD_COORD).await,
            Ok(Some(IndiPropertyState::Busy))
        )
    }

    /// Park the mount
    pub async fn park(&self) -> IndiResult<()> {
        tracing::info!("Parking '{}'", self.device_name());
        self.device.set_property(TELESCOPE_PARK, &[(PARK, ON)]).await?;
        Ok(())
    }

    /// Park switch is on and the park motion has finished
    pub async fn is_parked(&self) -> bool {
        let parked = matches!(
            self.device.get_property(TELESCOPE_PARK, PARK).await.as_deref(),
            Ok(ON)
        );
        let busy = matches!(
            self.device.property_state(TELESCOPE_PARK).await,
            Ok(Some(IndiPropertyState::Busy))
        );
        parked && !busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::config::DeviceConfig;
    use crate::STATE_ELEMENT;

    async fn mount(channel: Arc<MemoryChannel>) -> IndiMount {
        let device = IndiDevice::new(DeviceConfig::new("Mount", "indi_simulator_telescope"), channel).await;
        IndiMount::new(Arc::new(device))
    }

    #[tokio::test]
    async fn test_slew_requires_target() {
        let mount = mount(Arc::new(MemoryChannel::new())).await;
        let err = mount.slew_to_target().await.unwrap_err();
        assert!(matches!(err, IndiError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_slew_sets_mode_then_coordinates() {
        let channel = Arc::new(MemoryChannel::new());
        let mount = mount(channel.clone()).await;
        mount.set_target(5.5, -5.25).await;

        mount.slew_to_target().await.unwrap();
        assert_eq!(
            channel.set_log(),
            vec![
                "Mount.ON_COORD_SET.TRACK=On",
                "Mount.EQUATORIAL_EOD_COORD.RA;DEC=5.5;-5.25",
            ]
        );
        assert_eq!(mount.device().get_property(EQUATORIAL_EOD_COORD, RA).await.unwrap(), "5.5");
        assert_eq!(mount.device().get_property(EQUATORIAL_EOD_COORD, DEC).await.unwrap(), "-5.25");
    }

    #[tokio::test]
    async fn test_tracking_requires_idle_coordinates() {
        let channel = Arc::new(
            MemoryChannel::new()
                .with_value("Mount", TELESCOPE_TRACK_STATE, TRACK_ON, "On")
                .with_value("Mount", EQUATORIAL_EOD_COORD, STATE_ELEMENT, "Busy"),
        );
        let mount = mount(channel.clone()).await;
        assert!(mount.is_slewing().await);
        assert!(!mount.is_tracking().await);

        channel.set_value("Mount", EQUATORIAL_EOD_COORD, STATE_ELEMENT, "Ok");
        assert!(mount.is_tracking().await);
    }

    #[tokio::test]
    async fn test_park() {
        let channel = Arc::new(MemoryChannel::new());
        let mount = mount(channel).await;
        assert!(!mount.is_parked().await);

        mount.park().await.unwrap();
        assert!(mount.is_parked().await);
    }
}
