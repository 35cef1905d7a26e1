//! Server configuration
//!
//! Configuration is loaded from environment variables. Unset or unparsable
//! variables fall back to the defaults below.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Case storage configuration
    pub storage: StorageConfig,

    /// Batch segmentation job configuration
    pub job: JobConfig,

    /// Interactive refinement configuration
    pub interactive: InteractiveConfig,

    /// Static frontend files
    pub static_files: StaticFilesConfig,
}

/// Where cases, outputs and previews live on disk
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root of uploaded cases (`<upload_dir>/<case>/ct.nii.gz`)
    pub upload_dir: PathBuf,
    /// Root of segmentation outputs (`<output_dir>/<case>/...`)
    pub output_dir: PathBuf,
    /// Root of generated preview PNGs
    pub preview_dir: PathBuf,
    /// Maximum upload size in bytes
    pub max_upload_size: usize,
}

/// Container job configuration
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Container runtime CLI
    pub docker_bin: String,
    /// Binary whose successful execution signals an available accelerator
    pub gpu_probe_bin: String,
    /// Segmentation image reference
    pub image: String,
    /// Shell command run inside the container
    pub command: String,
    /// Memory ceiling passed to the runtime
    pub memory_limit: String,
    /// Accelerator device request used when a GPU is available
    pub gpu_device: String,
    /// Base watchdog timeout (doubled on the degraded path)
    pub timeout: Duration,
    /// Optional platform override (e.g. emulating amd64 on arm hosts)
    pub platform: Option<String>,
}

/// Interactive session configuration
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    /// Directory holding the inference engine's trained model artifact
    pub model_dir: PathBuf,
    /// Maximum cached sessions before LRU eviction (0 = unbounded)
    pub max_sessions: usize,
}

/// Static file serving configuration
#[derive(Debug, Clone, Default)]
pub struct StaticFilesConfig {
    /// Directory with the built frontend, if any
    pub dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            storage: StorageConfig::default(),
            job: JobConfig::default(),
            interactive: InteractiveConfig::default(),
            static_files: StaticFilesConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("inputs_data"),
            output_dir: PathBuf::from("outputs_data"),
            preview_dir: PathBuf::from("static/results"),
            max_upload_size: 500 * 1024 * 1024, // 500 MB
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        let platform = default_platform();
        let memory_limit = if platform.is_some() { "64G" } else { "128G" };
        Self {
            docker_bin: "docker".to_string(),
            gpu_probe_bin: "nvidia-smi".to_string(),
            image: "qchen99/suprem:v1".to_string(),
            command: "sh predict.sh".to_string(),
            memory_limit: memory_limit.to_string(),
            gpu_device: "device=0".to_string(),
            timeout: Duration::from_secs(60 * 60), // 1 hour
            platform,
        }
    }
}

impl Default for InteractiveConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/nnInteractive_v1.0"),
            max_sessions: 8,
        }
    }
}

/// The segmentation image is amd64-only, so arm hosts run it emulated.
fn default_platform() -> Option<String> {
    if env::consts::ARCH == "aarch64" {
        Some("linux/amd64".to_string())
    } else {
        None
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Storage config
        if let Ok(path) = env::var("UPLOAD_FOLDER")
            && !path.is_empty()
        {
            config.storage.upload_dir = PathBuf::from(path);
        }
        if let Ok(path) = env::var("OUTPUT_FOLDER")
            && !path.is_empty()
        {
            config.storage.output_dir = PathBuf::from(path);
        }
        if let Ok(path) = env::var("PREVIEW_DIR")
            && !path.is_empty()
        {
            config.storage.preview_dir = PathBuf::from(path);
        }
        if let Ok(val) = env::var("MAX_UPLOAD_MB")
            && let Ok(mb) = val.parse::<usize>()
        {
            config.storage.max_upload_size = mb * 1024 * 1024;
        }

        // Job config
        if let Ok(bin) = env::var("DOCKER_BIN")
            && !bin.is_empty()
        {
            config.job.docker_bin = bin;
        }
        if let Ok(bin) = env::var("GPU_PROBE_BIN")
            && !bin.is_empty()
        {
            config.job.gpu_probe_bin = bin;
        }
        if let Ok(image) = env::var("SEGMENTATION_IMAGE")
            && !image.is_empty()
        {
            config.job.image = image;
        }
        if let Ok(command) = env::var("SEGMENTATION_COMMAND")
            && !command.is_empty()
        {
            config.job.command = command;
        }
        if let Ok(limit) = env::var("JOB_MEMORY_LIMIT")
            && !limit.is_empty()
        {
            config.job.memory_limit = limit;
        }
        if let Ok(val) = env::var("JOB_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.job.timeout = Duration::from_secs(secs);
        }
        if let Ok(platform) = env::var("JOB_PLATFORM") {
            config.job.platform = if platform.is_empty() {
                None
            } else {
                Some(platform)
            };
        }

        // Interactive config
        if let Ok(path) = env::var("MODEL_DIR")
            && !path.is_empty()
        {
            config.interactive.model_dir = PathBuf::from(path);
        }
        if let Ok(val) = env::var("MAX_INTERACTIVE_SESSIONS")
            && let Ok(v) = val.parse()
        {
            config.interactive.max_sessions = v;
        }

        // Static files
        if let Ok(dir) = env::var("STATIC_FILES_DIR")
            && !dir.is_empty()
        {
            config.static_files.dir = Some(PathBuf::from(dir));
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5001);
        assert_eq!(config.storage.upload_dir, PathBuf::from("inputs_data"));
        assert_eq!(config.storage.output_dir, PathBuf::from("outputs_data"));
        assert_eq!(config.job.timeout, Duration::from_secs(3600));
        assert_eq!(config.interactive.max_sessions, 8);
        assert!(config.static_files.dir.is_none());
    }

    #[test]
    fn test_memory_limit_follows_platform() {
        let job = JobConfig::default();
        match job.platform {
            Some(_) => assert_eq!(job.memory_limit, "64G"),
            None => assert_eq!(job.memory_limit, "128G"),
        }
    }

    #[test]
    fn test_config_from_env() {
        // This test doesn't set env vars, so it should return defaults
        let config = Config::from_env();
        assert_eq!(config.storage.max_upload_size, 500 * 1024 * 1024);
    }
}
