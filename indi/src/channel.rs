//! Device-server command channel
//!
//! Queries and sets go through the `indi_getprop` / `indi_setprop` tools;
//! driver start/stop directives are written to the server FIFO. Every tool
//! invocation is bounded by the configured command timeout.

use crate::config::ChannelConfig;
use crate::error::{IndiError, IndiResult};
use crate::process::{drain_output, spawn_output_reader};
use crate::protocol::standard_properties::{CONNECT, CONNECTION, DISCONNECT};
use crate::protocol::{start_directive, stop_directive, OFF, ON, STATE_ELEMENT};
use crate::PropertyPath;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;

/// Parse one `dev.prop.elem=value` line of query output
pub fn parse_property_line(line: &str) -> IndiResult<(PropertyPath, String)> {
    let (path, value) = line
        .split_once('=')
        .ok_or_else(|| IndiError::invalid_command(line, "expected dev.prop.elem=value"))?;

    let parts: Vec<&str> = path.trim().split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(IndiError::invalid_command(
            line,
            "property path must have exactly three parts",
        ));
    }

    Ok((
        PropertyPath::new(parts[0], parts[1], parts[2]),
        value.trim().to_string(),
    ))
}

/// Commands understood by the device server
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// All `dev.prop.elem=value` lines matching a (possibly wildcarded) path
    async fn query(&self, path: &PropertyPath) -> IndiResult<Vec<String>>;

    /// Bare value of a single element
    async fn query_value(&self, path: &PropertyPath) -> IndiResult<String>;

    /// Set several elements of one property in a single request, returning the exit code
    async fn set(&self, device: &str, property: &str, elements: &[(&str, &str)]) -> IndiResult<i32>;

    /// Ask the server to start a driver under a device name
    async fn load_driver(&self, driver: &str, name: &str) -> IndiResult<()>;

    /// Ask the server to stop a driver
    async fn unload_driver(&self, driver: &str, name: &str) -> IndiResult<()>;
}

/// Shared handle to a command channel
pub type SharedChannel = Arc<dyn CommandChannel>;

/// Build the compound `dev.prop.e1;e2=v1;v2` request
fn compound_request(device: &str, property: &str, elements: &[(&str, &str)]) -> IndiResult<String> {
    let target = format!("{}.{}", device, property);
    if elements.is_empty() {
        return Err(IndiError::invalid_command(target, "no elements to set"));
    }
    if elements
        .iter()
        .any(|(e, v)| e.is_empty() || e.contains(';') || v.contains(';') || e.contains('='))
    {
        return Err(IndiError::invalid_command(
            target,
            "element names and values must not contain ';' or '='",
        ));
    }

    let names: Vec<&str> = elements.iter().map(|(e, _)| *e).collect();
    let values: Vec<&str> = elements.iter().map(|(_, v)| *v).collect();
    Ok(format!("{}.{}={}", target, names.join(";"), values.join(";")))
}

/// Captured result of one tool invocation
#[derive(Debug, Default)]
struct ToolOutput {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    timed_out: bool,
}

impl ToolOutput {
    fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Command channel backed by the INDI command-line tools and server FIFO
pub struct IndiCommandChannel {
    config: ChannelConfig,
}

impl IndiCommandChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn base_args(&self) -> Vec<String> {
        if self.config.verbose {
            vec!["-vv".to_string()]
        } else {
            Vec::new()
        }
    }

    async fn ensure_fifo(&self) -> IndiResult<()> {
        match tokio::fs::metadata(&self.config.fifo_path).await {
            Ok(_) => Ok(()),
            Err(_) => Err(IndiError::ChannelUnavailable(
                self.config.fifo_path.display().to_string(),
            )),
        }
    }

    /// Run a tool to completion or until the command timeout, killing it on expiry
    async fn run_tool(&self, program: &Path, args: &[String]) -> IndiResult<(String, ToolOutput)> {
        let command_line = format!("{} {}", program.display(), args.join(" "));
        tracing::debug!("Running {}", command_line);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IndiError::ChannelError(format!("Failed to launch '{}': {}", command_line, e)))?;

        let stdout = spawn_output_reader(child.stdout.take());
        let stderr = spawn_output_reader(child.stderr.take());

        let limit = self.config.command_timeout();
        let mut output = ToolOutput::default();
        match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => output.exit_code = status.code(),
            Ok(Err(e)) => {
                return Err(IndiError::ChannelError(format!(
                    "Failed waiting on '{}': {}",
                    command_line, e
                )))
            }
            Err(_) => {
                tracing::warn!("'{}' did not finish within {:?}, killing it", command_line, limit);
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill '{}': {}", command_line, e);
                }
                output.timed_out = true;
            }
        }

        output.stdout = drain_output(stdout).await;
        output.stderr = drain_output(stderr).await;
        Ok((command_line, output))
    }

    /// Write a directive to the FIFO, releasing the handle on every path
    async fn write_directive(&self, directive: &str) -> IndiResult<()> {
        let path = self.config.fifo_path.clone();
        tracing::debug!("Writing '{}' to {}", directive.trim_end(), path.display());

        let write = async {
            let mut sink = open_directive_sink(&path).await?;
            sink.write_all(directive.as_bytes()).await?;
            sink.flush().await?;
            Ok::<(), std::io::Error>(())
        };

        match timeout(self.config.command_timeout(), write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(IndiError::ChannelError(format!(
                "Failed to write to {}: {}",
                path.display(),
                e
            ))),
            Err(_) => Err(IndiError::Timeout {
                command: directive.trim_end().to_string(),
                duration: self.config.command_timeout(),
            }),
        }
    }
}

type DirectiveSink = Box<dyn AsyncWrite + Unpin + Send>;

/// Open the directive target for writing without blocking
///
/// A FIFO is opened non-blocking, so a server that is not reading fails
/// with ENXIO instead of parking a thread in `open(2)`. Anything else is
/// appended to like a regular file.
#[cfg(unix)]
async fn open_directive_sink(path: &Path) -> std::io::Result<DirectiveSink> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.file_type().is_fifo() {
        let sender = tokio::net::unix::pipe::OpenOptions::new().open_sender(path)?;
        Ok(Box::new(sender))
    } else {
        let file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
        Ok(Box::new(file))
    }
}

#[cfg(not(unix))]
async fn open_directive_sink(path: &Path) -> std::io::Result<DirectiveSink> {
    let file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
    Ok(Box::new(file))
}

#[async_trait]
impl CommandChannel for IndiCommandChannel {
    async fn query(&self, path: &PropertyPath) -> IndiResult<Vec<String>> {
        self.ensure_fifo().await?;

        let mut args = self.base_args();
        args.push(path.to_string());
        let (command_line, output) = self.run_tool(&self.config.getprop_path, &args).await?;

        if !output.timed_out && !output.success() {
            return Err(IndiError::exit_status(command_line, output.exit_code, &output.stderr));
        }

        let lines: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(bad) = lines.iter().find(|l| !l.contains('=')) {
            return Err(IndiError::invalid_command(
                command_line,
                format!("unexpected output line '{}'", bad),
            ));
        }

        Ok(lines)
    }

    async fn query_value(&self, path: &PropertyPath) -> IndiResult<String> {
        self.ensure_fifo().await?;

        let mut args = self.base_args();
        args.push("-1".to_string());
        args.push(path.to_string());
        let (command_line, output) = self.run_tool(&self.config.getprop_path, &args).await?;

        if !output.timed_out && !output.success() {
            return Err(IndiError::exit_status(command_line, output.exit_code, &output.stderr));
        }

        Ok(output.stdout.lines().next().unwrap_or("").trim().to_string())
    }

    async fn set(&self, device: &str, property: &str, elements: &[(&str, &str)]) -> IndiResult<i32> {
        let request = compound_request(device, property, elements)?;

        let mut args = self.base_args();
        args.push(request);
        let (command_line, output) = self.run_tool(&self.config.setprop_path, &args).await?;

        if output.timed_out {
            return Err(IndiError::Timeout {
                command: command_line,
                duration: self.config.command_timeout(),
            });
        }
        match output.exit_code {
            Some(0) => Ok(0),
            code => Err(IndiError::exit_status(command_line, code, &output.stderr)),
        }
    }

    async fn load_driver(&self, driver: &str, name: &str) -> IndiResult<()> {
        tracing::info!("Loading driver {} as '{}'", driver, name);
        self.write_directive(&start_directive(driver, name)).await
    }

    async fn unload_driver(&self, driver: &str, name: &str) -> IndiResult<()> {
        tracing::info!("Unloading driver {} ('{}')", driver, name);
        self.write_directive(&stop_directive(driver, name)).await
    }
}

type ElementKey = (String, String, String);

#[derive(Default)]
struct MemoryState {
    values: BTreeMap<ElementKey, String>,
    directives: Vec<String>,
    set_log: Vec<String>,
    unavailable: bool,
    failing: HashSet<(String, String)>,
}

impl MemoryState {
    fn has_device(&self, device: &str) -> bool {
        self.values.keys().any(|(d, _, _)| d == device)
    }

    fn has_property(&self, device: &str, property: &str) -> bool {
        self.values
            .keys()
            .any(|(d, p, _)| d == device && p == property)
    }

    fn matching(&self, path: &PropertyPath) -> Vec<(PropertyPath, String)> {
        self.values
            .iter()
            .map(|((d, p, e), v)| (PropertyPath::new(d, p, e), v.clone()))
            .filter(|(candidate, _)| path.matches(candidate))
            .collect()
    }

    fn seed_connection(&mut self, device: &str) {
        for (element, value) in [(CONNECT, OFF), (DISCONNECT, ON)] {
            self.values
                .entry((device.to_string(), CONNECTION.to_string(), element.to_string()))
                .or_insert_with(|| value.to_string());
        }
    }
}

/// In-memory device server that echoes back whatever it was told
///
/// Used for dry runs without hardware and as the test double for every
/// component built on [`CommandChannel`].
#[derive(Default)]
pub struct MemoryChannel {
    state: Mutex<MemoryState>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed an element value
    pub fn with_value(self, device: &str, property: &str, element: &str, value: &str) -> Self {
        self.set_value(device, property, element, value);
        self
    }

    /// Seed a device as if its driver had been started
    pub fn with_loaded(self, device: &str) -> Self {
        self.lock().seed_connection(device);
        self
    }

    /// Simulate a missing server FIFO
    pub fn unavailable(self) -> Self {
        self.set_available(false);
        self
    }

    /// Make every set of this property exit non-zero
    pub fn fail_property(self, device: &str, property: &str) -> Self {
        self.lock()
            .failing
            .insert((device.to_string(), property.to_string()));
        self
    }

    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    pub fn set_value(&self, device: &str, property: &str, element: &str, value: &str) {
        self.lock().values.insert(
            (device.to_string(), property.to_string(), element.to_string()),
            value.to_string(),
        );
    }

    /// Directives written so far
    pub fn directives(&self) -> Vec<String> {
        self.lock().directives.clone()
    }

    /// Compound set requests received so far
    pub fn set_log(&self) -> Vec<String> {
        self.lock().set_log.clone()
    }

    fn check_available(state: &MemoryState) -> IndiResult<()> {
        if state.unavailable {
            Err(IndiError::ChannelUnavailable("memory".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CommandChannel for MemoryChannel {
    async fn query(&self, path: &PropertyPath) -> IndiResult<Vec<String>> {
        let state = self.lock();
        Self::check_available(&state)?;

        let matches = state.matching(path);
        if matches.is_empty() {
            return Err(IndiError::exit_status(format!("getprop {}", path), Some(1), "No such property"));
        }
        Ok(matches
            .into_iter()
            .map(|(p, v)| format!("{}={}", p, v))
            .collect())
    }

    async fn query_value(&self, path: &PropertyPath) -> IndiResult<String> {
        let state = self.lock();
        Self::check_available(&state)?;

        if let Some((_, value)) = state.matching(path).into_iter().next() {
            return Ok(value);
        }
        if path.element == STATE_ELEMENT && state.has_property(&path.device, &path.property) {
            return Ok("Ok".to_string());
        }
        Err(IndiError::exit_status(format!("getprop -1 {}", path), Some(1), "No such property"))
    }

    async fn set(&self, device: &str, property: &str, elements: &[(&str, &str)]) -> IndiResult<i32> {
        let request = compound_request(device, property, elements)?;
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.set_log.push(request.clone());

        if !state.has_device(device)
            || state
                .failing
                .contains(&(device.to_string(), property.to_string()))
        {
            return Err(IndiError::exit_status(format!("setprop {}", request), Some(1), ""));
        }

        // Switches are one-of-many: turning one element On turns its siblings Off
        if elements.iter().any(|(_, v)| *v == ON) {
            for ((d, p, e), value) in state.values.iter_mut() {
                if d == device
                    && p == property
                    && value == ON
                    && !elements.iter().any(|(name, _)| name == e)
                {
                    *value = OFF.to_string();
                }
            }
        }
        for (element, value) in elements {
            state.values.insert(
                (device.to_string(), property.to_string(), element.to_string()),
                value.to_string(),
            );
        }
        Ok(0)
    }

    async fn load_driver(&self, driver: &str, name: &str) -> IndiResult<()> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(IndiError::ChannelError("memory channel closed".to_string()));
        }
        state.directives.push(start_directive(driver, name));
        state.seed_connection(name);
        Ok(())
    }

    async fn unload_driver(&self, driver: &str, name: &str) -> IndiResult<()> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(IndiError::ChannelError("memory channel closed".to_string()));
        }
        state.directives.push(stop_directive(driver, name));
        state.values.retain(|(d, _, _), _| d != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_property_line() {
        let (path, value) = parse_property_line("Telescope.CONNECTION.CONNECT=On").unwrap();
        assert_eq!(path, PropertyPath::new("Telescope", "CONNECTION", "CONNECT"));
        assert_eq!(value, "On");

        // Values may themselves contain '=' and dots
        let (path, value) = parse_property_line("CCD.UPLOAD_SETTINGS.UPLOAD_PREFIX=a=b.c").unwrap();
        assert_eq!(path.element, "UPLOAD_PREFIX");
        assert_eq!(value, "a=b.c");
    }

    #[test]
    fn test_parse_property_line_rejects_malformed() {
        assert!(matches!(
            parse_property_line("no value here"),
            Err(IndiError::InvalidCommand { .. })
        ));
        assert!(parse_property_line("Dev.PROP=1").is_err());
        assert!(parse_property_line("Dev.PROP.ELEM.EXTRA=1").is_err());
        assert!(parse_property_line("Dev..ELEM=1").is_err());
    }

    #[test]
    fn test_compound_request() {
        assert_eq!(
            compound_request("Mount", "EQUATORIAL_EOD_COORD", &[("RA", "5.5"), ("DEC", "-5")]).unwrap(),
            "Mount.EQUATORIAL_EOD_COORD.RA;DEC=5.5;-5"
        );
        assert!(compound_request("Mount", "TRACK", &[]).is_err());
        assert!(compound_request("Mount", "TRACK", &[("A;B", "1")]).is_err());
    }

    #[tokio::test]
    async fn test_memory_channel_round_trip() {
        let channel = MemoryChannel::new().with_loaded("Focuser");
        channel
            .set("Focuser", "ABS_FOCUS_POSITION", &[("FOCUS_ABSOLUTE_POSITION", "4200")])
            .await
            .unwrap();

        let value = channel
            .query_value(&PropertyPath::new("Focuser", "ABS_FOCUS_POSITION", "FOCUS_ABSOLUTE_POSITION"))
            .await
            .unwrap();
        assert_eq!(value, "4200");
        assert_eq!(
            channel.set_log(),
            vec!["Focuser.ABS_FOCUS_POSITION.FOCUS_ABSOLUTE_POSITION=4200"]
        );
    }

    #[tokio::test]
    async fn test_memory_channel_switch_semantics() {
        let channel = MemoryChannel::new().with_loaded("Mount");
        channel.set("Mount", CONNECTION, &[(CONNECT, ON)]).await.unwrap();

        let lines = channel.query(&PropertyPath::new("Mount", CONNECTION, "*")).await.unwrap();
        assert_eq!(
            lines,
            vec!["Mount.CONNECTION.CONNECT=On", "Mount.CONNECTION.DISCONNECT=Off"]
        );
    }

    #[tokio::test]
    async fn test_memory_channel_errors() {
        let channel = MemoryChannel::new().with_loaded("Mount").fail_property("Mount", "TRACK");

        let err = channel.set("Mount", "TRACK", &[("ON", "On")]).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(1));

        let err = channel.query(&PropertyPath::all("Camera")).await.unwrap_err();
        assert!(matches!(err, IndiError::InvalidCommand { .. }));

        channel.set_available(false);
        let err = channel.query(&PropertyPath::all("Mount")).await.unwrap_err();
        assert!(matches!(err, IndiError::ChannelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_memory_channel_driver_directives() {
        let channel = MemoryChannel::new();
        channel.load_driver("indi_simulator_ccd", "CCD Simulator").await.unwrap();
        assert!(!channel.query(&PropertyPath::all("CCD Simulator")).await.unwrap().is_empty());

        channel.unload_driver("indi_simulator_ccd", "CCD Simulator").await.unwrap();
        assert!(channel.query(&PropertyPath::all("CCD Simulator")).await.is_err());
        assert_eq!(
            channel.directives(),
            vec![
                "start indi_simulator_ccd -n \"CCD Simulator\"\n".to_string(),
                "stop indi_simulator_ccd \"CCD Simulator\"\n".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    mod tools {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use tempfile::TempDir;

        fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn channel(dir: &TempDir, getprop: &str, setprop: &str) -> IndiCommandChannel {
            let fifo = dir.path().join("indiFIFO");
            std::fs::write(&fifo, "").unwrap();
            let getprop = script(dir, "getprop", getprop);
            let setprop = script(dir, "setprop", setprop);
            IndiCommandChannel::new(
                ChannelConfig::default()
                    .with_fifo(fifo)
                    .with_tools(getprop, setprop)
                    .with_timeout(Duration::from_secs(1)),
            )
        }

        #[tokio::test]
        async fn test_query_parses_tool_output() {
            let dir = TempDir::new().unwrap();
            let channel = channel(
                &dir,
                "if [ \"$1\" = \"-1\" ]; then echo On; else\n\
                 echo 'Mount.CONNECTION.CONNECT=On'\n\
                 echo 'Mount.CONNECTION.DISCONNECT=Off'\nfi",
                "exit 0",
            );

            let lines = channel.query(&PropertyPath::all("Mount")).await.unwrap();
            assert_eq!(lines.len(), 2);
            let value = channel
                .query_value(&PropertyPath::new("Mount", CONNECTION, CONNECT))
                .await
                .unwrap();
            assert_eq!(value, "On");
        }

        #[tokio::test]
        async fn test_query_missing_fifo_is_unavailable() {
            let dir = TempDir::new().unwrap();
            let channel = IndiCommandChannel::new(
                ChannelConfig::default().with_fifo(dir.path().join("missing")),
            );
            let err = channel.query(&PropertyPath::all("Mount")).await.unwrap_err();
            assert!(matches!(err, IndiError::ChannelUnavailable(_)));
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_invalid_command() {
            let dir = TempDir::new().unwrap();
            let channel = channel(&dir, "echo 'garbage'", "echo 'refused' >&2; exit 3");

            let err = channel
                .set("Mount", CONNECTION, &[(CONNECT, ON)])
                .await
                .unwrap_err();
            assert_eq!(err.exit_code(), Some(3));
            assert!(err.to_string().contains("Mount.CONNECTION.CONNECT=On"));
            assert!(err.to_string().contains("refused"));

            let err = channel.query(&PropertyPath::all("Mount")).await.unwrap_err();
            assert!(matches!(err, IndiError::InvalidCommand { .. }));
        }

        #[tokio::test]
        async fn test_query_timeout_returns_partial_output() {
            let dir = TempDir::new().unwrap();
            let channel = channel(&dir, "exec sleep 30", "exec sleep 30");

            let started = std::time::Instant::now();
            let lines = channel.query(&PropertyPath::all("Mount")).await.unwrap();
            assert!(lines.is_empty());

            let err = channel.set("Mount", CONNECTION, &[(CONNECT, ON)]).await.unwrap_err();
            assert!(matches!(err, IndiError::Timeout { .. }));
            assert!(started.elapsed() < Duration::from_secs(6));
        }

        #[tokio::test]
        async fn test_directives_written_to_fifo() {
            let dir = TempDir::new().unwrap();
            let channel = channel(&dir, "exit 0", "exit 0");

            channel.load_driver("indi_ieq_telescope", "iOptron").await.unwrap();
            channel.unload_driver("indi_ieq_telescope", "iOptron").await.unwrap();

            let written = std::fs::read_to_string(dir.path().join("indiFIFO")).unwrap();
            assert_eq!(
                written,
                "start indi_ieq_telescope -n \"iOptron\"\nstop indi_ieq_telescope \"iOptron\"\n"
            );
        }

        fn mkfifo(dir: &TempDir) -> PathBuf {
            let fifo = dir.path().join("indiFIFO");
            let status = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
            assert!(status.success());
            fifo
        }

        #[tokio::test]
        async fn test_fifo_without_reader_fails_fast() {
            let dir = TempDir::new().unwrap();
            let channel = IndiCommandChannel::new(
                ChannelConfig::default()
                    .with_fifo(mkfifo(&dir))
                    .with_timeout(Duration::from_secs(5)),
            );

            let started = std::time::Instant::now();
            let err = channel.load_driver("indi_simulator_ccd", "CCD").await.unwrap_err();
            assert!(matches!(err, IndiError::ChannelError(_)));
            assert!(started.elapsed() < Duration::from_secs(1));
        }

        #[tokio::test]
        async fn test_fifo_with_reader_receives_directive() {
            let dir = TempDir::new().unwrap();
            let fifo = mkfifo(&dir);
            let mut server = tokio::net::unix::pipe::OpenOptions::new()
                .open_receiver(&fifo)
                .unwrap();
            let channel = IndiCommandChannel::new(ChannelConfig::default().with_fifo(fifo));

            channel.load_driver("indi_simulator_ccd", "CCD").await.unwrap();

            let mut buf = vec![0u8; 128];
            let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"start indi_simulator_ccd -n \"CCD\"\n");
        }

        #[tokio::test]
        async fn test_directive_write_failure_is_channel_error() {
            let dir = TempDir::new().unwrap();
            let channel = IndiCommandChannel::new(
                ChannelConfig::default().with_fifo(dir.path().join("missing")),
            );
            let err = channel.load_driver("indi_simulator_ccd", "CCD").await.unwrap_err();
            assert!(matches!(err, IndiError::ChannelError(_)));
        }
    }
}
