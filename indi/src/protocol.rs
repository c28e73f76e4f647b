//! INDI command-line protocol definitions

/// Wildcard accepted by `indi_getprop` for any device, property or element
pub const WILDCARD: &str = "*";

/// Pseudo-element `indi_getprop` answers with the property state
pub const STATE_ELEMENT: &str = "_STATE";

/// Switch values
pub const ON: &str = "On";
pub const OFF: &str = "Off";

/// Standard INDI properties
pub mod standard_properties {
    /// Connection control switch
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    /// Port bindings
    pub const DEVICE_PORT: &str = "DEVICE_PORT";
    pub const SHUTTER_PORT: &str = "SHUTTER_PORT";
    pub const PORT: &str = "PORT";

    // Mount properties
    pub const EQUATORIAL_EOD_COORD: &str = "EQUATORIAL_EOD_COORD";
    pub const ON_COORD_SET: &str = "ON_COORD_SET";
    pub const TRACK: &str = "TRACK";
    pub const TELESCOPE_TRACK_STATE: &str = "TELESCOPE_TRACK_STATE";
    pub const TRACK_ON: &str = "TRACK_ON";
    pub const TELESCOPE_PARK: &str = "TELESCOPE_PARK";
    pub const PARK: &str = "PARK";

    // Focuser properties
    pub const ABS_FOCUS_POSITION: &str = "ABS_FOCUS_POSITION";
    pub const FOCUS_ABSOLUTE_POSITION: &str = "FOCUS_ABSOLUTE_POSITION";
}

/// Common coordinate elements
pub mod coord_elements {
    pub const RA: &str = "RA";
    pub const DEC: &str = "DEC";
}

/// Port property a driver expects before it will connect, if any
pub fn port_property_for_driver(driver: &str) -> Option<&'static str> {
    match driver {
        "indi_ieq_telescope" => Some(standard_properties::DEVICE_PORT),
        "indi_gphoto_ccd" => Some(standard_properties::SHUTTER_PORT),
        _ => None,
    }
}

/// FIFO directive asking the server to start a driver
pub fn start_directive(driver: &str, name: &str) -> String {
    format!("start {} -n \"{}\"\n", driver, name)
}

/// FIFO directive asking the server to stop a driver
pub fn stop_directive(driver: &str, name: &str) -> String {
    format!("stop {} \"{}\"\n", driver, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(
            start_directive("indi_simulator_ccd", "CCD Simulator"),
            "start indi_simulator_ccd -n \"CCD Simulator\"\n"
        );
        assert_eq!(
            stop_directive("indi_simulator_ccd", "CCD Simulator"),
            "stop indi_simulator_ccd \"CCD Simulator\"\n"
        );
    }

    #[test]
    fn test_port_properties() {
        assert_eq!(port_property_for_driver("indi_ieq_telescope"), Some("DEVICE_PORT"));
        assert_eq!(port_property_for_driver("indi_gphoto_ccd"), Some("SHUTTER_PORT"));
        assert_eq!(port_property_for_driver("indi_simulator_ccd"), None);
    }
}
