//! Device controller
//!
//! Owns one device's driver lifecycle, connection and property cache on top
//! of a [`CommandChannel`].

use crate::channel::{parse_property_line, SharedChannel};
use crate::config::DeviceConfig;
use crate::error::IndiResult;
use crate::protocol::standard_properties::{CONNECT, CONNECTION, DISCONNECT, PORT};
use crate::protocol::{port_property_for_driver, ON};
use crate::{IndiPropertyState, PropertyPath};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Property name -> element name -> value
pub type PropertyTable = HashMap<String, HashMap<String, String>>;

/// Driver and connection lifecycle of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    DriverUnloaded,
    DriverLoaded,
    Connected,
}

/// One device driven through the device server
pub struct IndiDevice {
    config: DeviceConfig,
    channel: SharedChannel,
    state: RwLock<DeviceState>,
    properties: RwLock<PropertyTable>,
}

impl IndiDevice {
    /// Create the controller and ask the server to start its driver
    ///
    /// A failed driver load is only logged; the hardware may simply not be
    /// present yet.
    pub async fn new(config: DeviceConfig, channel: SharedChannel) -> Self {
        let device = Self::detached(config, channel);

        match device.channel.load_driver(&device.config.driver, &device.config.name).await {
            Ok(()) => *device.state.write().await = DeviceState::DriverLoaded,
            Err(e) => tracing::warn!(
                "Could not load driver {} for '{}': {}",
                device.config.driver,
                device.config.name,
                e
            ),
        }

        device
    }

    /// Create the controller without touching the server
    pub fn detached(config: DeviceConfig, channel: SharedChannel) -> Self {
        Self {
            config,
            channel,
            state: RwLock::new(DeviceState::DriverUnloaded),
            properties: RwLock::new(PropertyTable::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    /// Last known lifecycle state (best effort; probes are authoritative)
    pub async fn state(&self) -> DeviceState {
        *self.state.read().await
    }

    /// Whether the server knows this device
    pub async fn is_loaded(&self) -> bool {
        match self.channel.query(&PropertyPath::all(&self.config.name)).await {
            Ok(lines) if !lines.is_empty() => {
                let mut state = self.state.write().await;
                if *state == DeviceState::DriverUnloaded {
                    *state = DeviceState::DriverLoaded;
                }
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!("'{}' not loaded: {}", self.config.name, e);
                false
            }
        }
    }

    /// Whether the device reports CONNECTION.CONNECT=On
    pub async fn is_connected(&self) -> bool {
        if !self.is_loaded().await {
            return false;
        }

        let path = PropertyPath::new(&self.config.name, CONNECTION, CONNECT);
        match self.channel.query_value(&path).await {
            Ok(value) => value == ON,
            Err(e) => {
                tracing::debug!("Connection probe of '{}' failed: {}", self.config.name, e);
                false
            }
        }
    }

    /// Connect the device and apply its init commands
    ///
    /// Failures are logged, not returned; check [`is_connected`](Self::is_connected).
    pub async fn connect(&self) {
        if let Err(e) = self.try_connect().await {
            tracing::error!("Failed to connect '{}': {}", self.config.name, e);
        }
    }

    async fn try_connect(&self) -> IndiResult<()> {
        let name = &self.config.name;

        if let (Some(port_property), Some(port)) =
            (port_property_for_driver(&self.config.driver), self.config.port.as_deref())
        {
            tracing::debug!("Binding '{}' to port {}", name, port);
            self.channel.set(name, port_property, &[(PORT, port)]).await?;
        }

        self.channel.set(name, CONNECTION, &[(CONNECT, ON)]).await?;
        *self.state.write().await = DeviceState::Connected;
        tracing::info!("Connected '{}'", name);

        for command in &self.config.init_commands {
            let elements: Vec<(&str, &str)> = command
                .elements
                .iter()
                .map(|(e, v)| (e.as_str(), v.as_str()))
                .collect();
            if let Err(e) = self.channel.set(name, &command.property, &elements).await {
                tracing::warn!(
                    "Init command {} on '{}' failed: {}",
                    command.property,
                    name,
                    e
                );
            }
        }

        Ok(())
    }

    /// Disconnect the device; errors propagate so a stuck device is visible
    pub async fn disconnect(&self) -> IndiResult<()> {
        self.channel
            .set(&self.config.name, CONNECTION, &[(DISCONNECT, ON)])
            .await?;
        *self.state.write().await = DeviceState::DriverLoaded;
        tracing::info!("Disconnected '{}'", self.config.name);
        Ok(())
    }

    /// Ask the server to stop the driver
    pub async fn unload(&self) -> IndiResult<()> {
        if !self.is_loaded().await {
            return Ok(());
        }
        self.channel
            .unload_driver(&self.config.driver, &self.config.name)
            .await?;
        *self.state.write().await = DeviceState::DriverUnloaded;
        self.properties.write().await.clear();
        Ok(())
    }

    /// Rebuild the property cache from a wildcard query
    pub async fn get_all_properties(&self) -> IndiResult<PropertyTable> {
        let lines = self.channel.query(&PropertyPath::all(&self.config.name)).await?;

        let mut table = PropertyTable::new();
        for line in &lines {
            let (path, value) = parse_property_line(line)?;
            table
                .entry(path.property)
                .or_default()
                .insert(path.element, value);
        }

        *self.properties.write().await = table.clone();
        Ok(table)
    }

    /// Snapshot of the cache from the last refresh
    pub async fn properties(&self) -> PropertyTable {
        self.properties.read().await.clone()
    }

    /// Live value of one element
    pub async fn get_property(&self, property: &str, element: &str) -> IndiResult<String> {
        self.channel
            .query_value(&PropertyPath::new(&self.config.name, property, element))
            .await
    }

    /// Live `dev.prop.elem=value` lines for a (possibly wildcarded) property
    pub async fn query_property(&self, property: &str, element: &str) -> IndiResult<Vec<String>> {
        self.channel
            .query(&PropertyPath::new(&self.config.name, property, element))
            .await
    }

    /// Live state of a property, `None` if the answer is not a known state
    pub async fn property_state(&self, property: &str) -> IndiResult<Option<IndiPropertyState>> {
        let value = self.get_property(property, crate::STATE_ELEMENT).await?;
        Ok(IndiPropertyState::parse(&value))
    }

    /// Set one or more elements of a property in one request
    pub async fn set_property(&self, property: &str, elements: &[(&str, &str)]) -> IndiResult<i32> {
        self.channel.set(&self.config.name, property, elements).await
    }
}
