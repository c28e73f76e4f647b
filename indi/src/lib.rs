//! INDI device control over the server's command-line tools
//!
//! Drives hardware owned by an external INDI server through its FIFO and the
//! `indi_getprop` / `indi_setprop` tools.
//!
//! ## Features
//!
//! - Driver start/stop directives written to the server FIFO
//! - Property queries and compound property sets with bounded tool runtime
//! - Per-device controller with a replace-on-refresh property cache
//! - Mount and focuser wrappers built on the controller
//! - In-memory channel for dry runs and tests

mod channel;
mod config;
mod device;
mod error;
mod focuser;
mod mount;
mod process;
mod protocol;

pub use channel::{parse_property_line, CommandChannel, IndiCommandChannel, MemoryChannel, SharedChannel};
pub use config::{ChannelConfig, DeviceConfig, InitCommand};
pub use device::{DeviceState, IndiDevice, PropertyTable};
pub use error::{IndiError, IndiResult};
pub use focuser::{FocuserConfig, IndiFocuser};
pub use mount::IndiMount;
pub use process::{drain_output, spawn_output_reader, READER_GRACE};
pub use protocol::{
    coord_elements, port_property_for_driver, standard_properties, start_directive, stop_directive, OFF,
    ON, STATE_ELEMENT, WILDCARD,
};

use std::fmt;

/// INDI property state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndiPropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

impl IndiPropertyState {
    /// Parse the `_STATE` answer of `indi_getprop`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Idle" => Some(IndiPropertyState::Idle),
            "Ok" => Some(IndiPropertyState::Ok),
            "Busy" => Some(IndiPropertyState::Busy),
            "Alert" => Some(IndiPropertyState::Alert),
            _ => None,
        }
    }
}

/// Fully qualified `device.property.element` address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    pub device: String,
    pub property: String,
    pub element: String,
}

impl PropertyPath {
    pub fn new(device: &str, property: &str, element: &str) -> Self {
        Self {
            device: device.to_string(),
            property: property.to_string(),
            element: element.to_string(),
        }
    }

    /// Every property and element of a device
    pub fn all(device: &str) -> Self {
        Self::new(device, WILDCARD, WILDCARD)
    }

    /// Whether `other` is selected by this (possibly wildcarded) path
    pub fn matches(&self, other: &PropertyPath) -> bool {
        fn part(pattern: &str, value: &str) -> bool {
            pattern == WILDCARD || pattern == value
        }
        part(&self.device, &other.device)
            && part(&self.property, &other.property)
            && part(&self.element, &other.element)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.device, self.property, self.element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_path_display() {
        let path = PropertyPath::new("Telescope", "CONNECTION", "CONNECT");
        assert_eq!(path.to_string(), "Telescope.CONNECTION.CONNECT");
        assert_eq!(PropertyPath::all("Telescope").to_string(), "Telescope.*.*");
    }

    #[test]
    fn test_property_path_matching() {
        let concrete = PropertyPath::new("Focuser", "ABS_FOCUS_POSITION", "FOCUS_ABSOLUTE_POSITION");
        assert!(PropertyPath::all("Focuser").matches(&concrete));
        assert!(PropertyPath::new("Focuser", "ABS_FOCUS_POSITION", "*").matches(&concrete));
        assert!(!PropertyPath::all("Camera").matches(&concrete));
        assert!(!PropertyPath::new("*", "CONNECTION", "*").matches(&concrete));
    }

    #[test]
    fn test_property_state_parse() {
        assert_eq!(IndiPropertyState::parse("Busy\n"), Some(IndiPropertyState::Busy));
        assert_eq!(IndiPropertyState::parse("Ok"), Some(IndiPropertyState::Ok));
        assert_eq!(IndiPropertyState::parse("bogus"), None);
    }
}
