//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Prefix shared by every environment override
const ENV_PREFIX: &str = "GESTURE_DOCK_";

/// Container the gestures act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    /// Name passed to `docker run --name`
    pub name: String,
    /// Image pulled and launched
    pub image: String,
    /// Host side of the published port
    pub host_port: u16,
    /// Container side of the published port
    pub container_port: u16,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            name: "finger_controlled_container".to_string(),
            image: "nginx:latest".to_string(),
            host_port: 8080,
            container_port: 80,
        }
    }
}

/// Where landmark frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandmarkSource {
    /// Newline-delimited JSON on the daemon's stdin
    Stdin,
    /// Stdout of a shell command (run via `sh -c`)
    Command(String),
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Target container
    pub container: ContainerSettings,

    /// Pose-estimation collaborator
    pub landmark_source: LandmarkSource,

    /// Stabilization window length (frames)
    pub window: usize,

    /// Minimum time between two gesture-triggered commands
    pub cooldown: Duration,

    /// Hands detected below this score are ignored
    pub min_detection_confidence: f32,

    /// Flip x before classifying (for estimators that don't mirror the frame)
    pub mirror_x: bool,

    /// Upper bound on a single docker invocation
    pub command_timeout: Duration,

    /// Capacity of the dispatch queue
    pub queue_capacity: usize,

    /// Number of command records kept for IPC clients
    pub history_limit: usize,

    /// Whether the camera session is active at startup
    pub start_active: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let data_dir = match var("DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").context("HOME is not set")?;
                PathBuf::from(&home)
                    .join(".local")
                    .join("share")
                    .join("gesture-dock")
            }
        };

        let socket_path = data_dir.join("daemon.sock");

        let defaults = ContainerSettings::default();
        let container = ContainerSettings {
            name: var("CONTAINER_NAME").unwrap_or(defaults.name),
            image: var("IMAGE").unwrap_or(defaults.image),
            host_port: parse_var(&var, "HOST_PORT", defaults.host_port)?,
            container_port: parse_var(&var, "CONTAINER_PORT", defaults.container_port)?,
        };
        if container.name.trim().is_empty() {
            bail!("{ENV_PREFIX}CONTAINER_NAME must not be empty");
        }

        let landmark_source = match var("LANDMARK_CMD") {
            Some(cmd) if !cmd.trim().is_empty() => LandmarkSource::Command(cmd),
            _ => LandmarkSource::Stdin,
        };

        let window = parse_var(&var, "WINDOW", 10usize)?;
        if window == 0 {
            bail!("{ENV_PREFIX}WINDOW must be at least 1");
        }

        let cooldown_secs = parse_var(&var, "COOLDOWN_SECS", 3.0f64)?;
        let cooldown = Duration::try_from_secs_f64(cooldown_secs).with_context(|| {
            format!("invalid value {cooldown_secs} for {ENV_PREFIX}COOLDOWN_SECS")
        })?;

        let min_detection_confidence = parse_var(&var, "MIN_CONFIDENCE", 0.7f32)?;
        if !(0.0..=1.0).contains(&min_detection_confidence) {
            bail!("{ENV_PREFIX}MIN_CONFIDENCE must be within 0.0..=1.0");
        }

        let timeout_secs = parse_var(&var, "COMMAND_TIMEOUT_SECS", 120u64)?;
        let queue_capacity = parse_var(&var, "QUEUE_CAPACITY", 16usize)?;
        if queue_capacity == 0 {
            bail!("{ENV_PREFIX}QUEUE_CAPACITY must be at least 1");
        }

        Ok(Self {
            socket_path,
            data_dir,
            container,
            landmark_source,
            window,
            cooldown,
            min_detection_confidence,
            mirror_x: parse_var(&var, "MIRROR_X", false)?,
            command_timeout: Duration::from_secs(timeout_secs),
            queue_capacity,
            history_limit: parse_var(&var, "HISTORY_LIMIT", 50usize)?,
            start_active: parse_var(&var, "START_ACTIVE", true)?,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// Parse an optional override, falling back to `default` when unset
fn parse_var<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value {raw:?} for {ENV_PREFIX}{name}")),
        None => Ok(default),
    }
}
