use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Daemon configuration: defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the web interface.
    pub bind: String,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub admin_password: String,
    /// Cosine similarity a face must exceed to count as a student.
    pub similarity_threshold: f32,
    /// Seconds before the student cache is reloaded from the store.
    pub cache_lifetime_secs: u64,
    /// Process every Nth frame; the others reuse the last annotated frame.
    pub frame_skip: u32,
    pub jpeg_quality: u8,
    /// Inactivity expiry for login sessions.
    pub session_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            camera_device: "/dev/video0".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            db_path: default_data_dir().join("rollcall.db"),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
            similarity_threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            cache_lifetime_secs: 60,
            frame_skip: 2,
            jpeg_quality: 85,
            session_hours: 8,
        }
    }
}

impl Config {
    /// Load the configuration file (if any) and apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let base = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let config = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
        Ok(config)
    }

    fn with_env_overrides(self) -> Self {
        Self {
            bind: env_or("ROLLCALL_BIND", self.bind),
            camera_device: env_or("ROLLCALL_CAMERA_DEVICE", self.camera_device),
            model_dir: env_or("ROLLCALL_MODEL_DIR", self.model_dir),
            db_path: env_or("ROLLCALL_DB_PATH", self.db_path),
            admin_password: env_or("ROLLCALL_ADMIN_PASSWORD", self.admin_password),
            similarity_threshold: env_or("ROLLCALL_SIMILARITY_THRESHOLD", self.similarity_threshold),
            cache_lifetime_secs: env_or("ROLLCALL_CACHE_LIFETIME_SECS", self.cache_lifetime_secs),
            frame_skip: env_or("ROLLCALL_FRAME_SKIP", self.frame_skip),
            jpeg_quality: env_or("ROLLCALL_JPEG_QUALITY", self.jpeg_quality),
            session_hours: env_or("ROLLCALL_SESSION_HOURS", self.session_hours),
        }
    }

    pub fn uses_default_admin_password(&self) -> bool {
        self.admin_password == DEFAULT_ADMIN_PASSWORD
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::RECOGNIZER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Parsed environment value, or `current` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            current
        }),
        Err(_) => current,
    }
}
