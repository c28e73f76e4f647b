//! Channel and device configuration

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Where the device server listens and which tools talk to it
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// FIFO the server reads start/stop directives from
    pub fifo_path: PathBuf,
    /// Query tool (default: `indi_getprop` from PATH)
    pub getprop_path: PathBuf,
    /// Set tool (default: `indi_setprop` from PATH)
    pub setprop_path: PathBuf,
    /// Pass `-vv` to the tools
    pub verbose: bool,
    /// Time allowed for a tool invocation or FIFO write (default: 10 seconds)
    pub command_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            fifo_path: PathBuf::from("/tmp/indiFIFO"),
            getprop_path: PathBuf::from("indi_getprop"),
            setprop_path: PathBuf::from("indi_setprop"),
            verbose: false,
            command_timeout_ms: 10_000,
        }
    }
}

impl ChannelConfig {
    /// Get the command timeout as a Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn with_fifo(mut self, fifo_path: impl Into<PathBuf>) -> Self {
        self.fifo_path = fifo_path.into();
        self
    }

    pub fn with_tools(mut self, getprop: impl Into<PathBuf>, setprop: impl Into<PathBuf>) -> Self {
        self.getprop_path = getprop.into();
        self.setprop_path = setprop.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// A property set applied right after a device connects
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitCommand {
    pub property: String,
    /// (element, value) pairs, sent as one compound request
    pub elements: Vec<(String, String)>,
}

impl InitCommand {
    pub fn new(property: &str, elements: &[(&str, &str)]) -> Self {
        Self {
            property: property.to_string(),
            elements: elements
                .iter()
                .map(|(e, v)| (e.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Identity and start-up configuration of one device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub port: Option<String>,
    /// Applied in order after a successful connect
    #[serde(default)]
    pub init_commands: Vec<InitCommand>,
}

fn default_driver() -> String {
    "indi_simulator_ccd".to_string()
}

impl DeviceConfig {
    pub fn new(name: &str, driver: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: driver.to_string(),
            port: None,
            init_commands: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: &str) -> Self {
        self.port = Some(port.to_string());
        self
    }

    pub fn with_init_command(mut self, command: InitCommand) -> Self {
        self.init_commands.push(command);
        self
    }
}
