//! gphoto2 camera control
//!
//! Properties are read and written with `gphoto2 --port <port>` invocations
//! through a [`CommandPort`]; exposures use the EOS remote-release bulb
//! sequence.

use crate::autofocus::Camera;
use crate::error::{CameraError, CameraResult};
use crate::runner::{CommandPort, ProcessRunner};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// gphoto2 camera configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GphotoConfig {
    /// gphoto2 binary (default: `gphoto2` from PATH)
    pub gphoto2_path: PathBuf,
    /// USB port, e.g. `usb:001,004`
    pub port: String,
    /// Time allowed for property commands (default: 10 seconds)
    pub command_timeout_secs: u64,
    /// Time to download a frame after the shutter closes (default: 5 seconds)
    pub readout_time_secs: f64,
    pub file_extension: String,
}

impl Default for GphotoConfig {
    fn default() -> Self {
        Self {
            gphoto2_path: PathBuf::from("gphoto2"),
            port: "usb:".to_string(),
            command_timeout_secs: 10,
            readout_time_secs: 5.0,
            file_extension: "cr2".to_string(),
        }
    }
}

impl GphotoConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn with_port(mut self, port: &str) -> Self {
        self.port = port.to_string();
        self
    }
}

/// One entry of `--list-all-config`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraProperty {
    pub id: String,
    pub label: String,
    pub kind: String,
    pub current: String,
    pub printable: Option<String>,
    pub help: Option<String>,
    /// (index, text) in the order listed
    pub choices: Vec<(usize, String)>,
}

/// Value of the `Current:` line in tool output, empty if there is none
pub fn parse_current(output: &str) -> String {
    output
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix("Current: "))
        .last()
        .unwrap_or("")
        .to_string()
}

/// Parse `--list-all-config` output into properties keyed by label
///
/// Lines that fit no known shape are skipped and returned alongside.
pub fn parse_config<'a, I>(lines: I) -> (HashMap<String, CameraProperty>, Vec<String>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut records: Vec<CameraProperty> = Vec::new();
    let mut unparsed = Vec::new();

    for raw in lines {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(label) = line.strip_prefix("Label: ") {
            with_current(&mut records, |p| p.label = label.to_string());
        } else if let Some(kind) = line.strip_prefix("Type: ") {
            with_current(&mut records, |p| p.kind = kind.to_string());
        } else if let Some(current) = line.strip_prefix("Current: ") {
            with_current(&mut records, |p| p.current = current.to_string());
        } else if let Some(choice) = line.strip_prefix("Choice: ") {
            match parse_choice(choice) {
                Some((0, text)) => with_current(&mut records, |p| p.choices = vec![(0, text)]),
                Some((index, text)) => with_current(&mut records, |p| p.choices.push((index, text))),
                None => unparsed.push(line.to_string()),
            }
        } else if let Some(printable) = line.strip_prefix("Printable: ") {
            with_current(&mut records, |p| p.printable = Some(printable.to_string()));
        } else if let Some(help) = line.strip_prefix("Help: ") {
            with_current(&mut records, |p| p.help = Some(help.to_string()));
        } else if line.contains('/') {
            records.push(CameraProperty {
                id: line.to_string(),
                ..CameraProperty::default()
            });
        } else {
            unparsed.push(line.to_string());
        }
    }

    for line in &unparsed {
        tracing::warn!("Line not parsed: {}", line);
    }

    let properties = records
        .into_iter()
        .filter(|p| !p.label.is_empty())
        .map(|p| (p.label.clone(), p))
        .collect();
    (properties, unparsed)
}

fn with_current(records: &mut Vec<CameraProperty>, update: impl FnOnce(&mut CameraProperty)) {
    // Fields before any ID line belong to an anonymous record
    if records.is_empty() {
        records.push(CameraProperty::default());
    }
    if let Some(record) = records.last_mut() {
        update(record);
    }
}

fn parse_choice(rest: &str) -> Option<(usize, String)> {
    let (index, text) = rest.split_once(' ')?;
    Some((index.parse().ok()?, text.to_string()))
}

/// Canon DSLR driven through gphoto2
pub struct GphotoCamera {
    name: String,
    config: GphotoConfig,
    runner: Arc<dyn CommandPort>,
    properties: RwLock<HashMap<String, CameraProperty>>,
    serial_number: RwLock<String>,
}

impl GphotoCamera {
    pub fn new(name: &str, config: GphotoConfig) -> Self {
        let runner = Arc::new(ProcessRunner::new(
            config.gphoto2_path.clone(),
            vec!["--port".to_string(), config.port.clone()],
        ));
        Self::with_runner(name, config, runner)
    }

    pub fn with_runner(name: &str, config: GphotoConfig, runner: Arc<dyn CommandPort>) -> Self {
        tracing::debug!("gphoto2 camera {} created on {}", name, config.port);
        Self {
            name: name.to_string(),
            config,
            runner,
            properties: RwLock::new(HashMap::new()),
            serial_number: RwLock::new(String::new()),
        }
    }

    pub fn port(&self) -> &str {
        &self.config.port
    }

    /// Read the property catalogue and serial number
    pub async fn connect(&self) -> CameraResult<()> {
        tracing::debug!("Connecting to camera {}", self.name);
        let count = self.load_all_properties().await?;
        if count == 0 {
            return Err(CameraError::HardwareError(format!(
                "Camera {} reported no properties",
                self.name
            )));
        }
        *self.serial_number.write().await = self.get_property("serialnumber").await?;
        Ok(())
    }

    /// Set a config value, waiting for the tool to finish
    pub async fn set_property(&self, name: &str, value: &str) -> CameraResult<()> {
        let args = vec!["--set-config".to_string(), format!("{}={}", name, value)];
        self.runner.run(&args, self.config.command_timeout()).await?;
        Ok(())
    }

    /// Current value of a config entry, empty if the tool reports none
    pub async fn get_property(&self, name: &str) -> CameraResult<String> {
        let args = vec!["--get-config".to_string(), name.to_string()];
        let output = self.runner.run(&args, self.config.command_timeout()).await?;
        Ok(parse_current(&output))
    }

    /// Reload the catalogue, returning how many properties were found
    pub async fn load_all_properties(&self) -> CameraResult<usize> {
        let output = self
            .runner
            .run(&["--list-all-config".to_string()], self.config.command_timeout())
            .await?;
        let (properties, _) = parse_config(output.lines());

        if properties.is_empty() {
            tracing::warn!("Could not determine properties of {}", self.name);
        } else {
            tracing::debug!("Found {} properties on {}", properties.len(), self.name);
        }
        let count = properties.len();
        *self.properties.write().await = properties;
        Ok(count)
    }

    pub async fn properties(&self) -> HashMap<String, CameraProperty> {
        self.properties.read().await.clone()
    }

    fn exposure_args(seconds: f64, path: &Path) -> Vec<String> {
        vec![
            "--set-config".to_string(),
            "eosremoterelease=Immediate".to_string(),
            format!("--wait-event={}s", seconds.ceil().max(1.0) as u64),
            "--set-config".to_string(),
            "eosremoterelease=Release Full".to_string(),
            "--wait-event-and-download=1s".to_string(),
            format!("--filename={}", path.display()),
            "--force-overwrite".to_string(),
        ]
    }
}

#[async_trait]
impl Camera for GphotoCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn uid(&self) -> String {
        self.serial_number.read().await.chars().take(6).collect()
    }

    async fn is_connected(&self) -> bool {
        !self.properties.read().await.is_empty()
    }

    fn file_extension(&self) -> &str {
        &self.config.file_extension
    }

    async fn take_exposure(&self, seconds: f64, path: &Path) -> CameraResult<()> {
        let exposure = Duration::try_from_secs_f64(seconds)
            .map_err(|e| CameraError::invalid_command(format!("{}s exposure", seconds), e.to_string()))?
            + Duration::try_from_secs_f64(self.config.readout_time_secs).unwrap_or(Duration::ZERO);
        if !self.is_connected().await {
            return Err(CameraError::InvalidState(format!("Camera {} is not connected", self.name)));
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        tracing::debug!("Taking {}s exposure on {}: {}", seconds, self.name, path.display());
        self.runner.start(&Self::exposure_args(seconds, path)).await?;

        self.runner
            .wait_only(exposure + self.config.command_timeout())
            .await?;

        if tokio::fs::metadata(path).await.is_err() {
            return Err(CameraError::HardwareError(format!(
                "Exposure on {} produced no file at {}",
                self.name,
                path.display()
            )));
        }
        Ok(())
    }
}
