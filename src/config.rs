use crate::error::AppError;
use crate::models::{TimeRange, Zone};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "usage-chart";
pub const ENV_PREFIX: &str = "USAGE_CHART";
pub const MIN_RELOAD_SECONDS: u64 = 5;

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("USAGE_CHART_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "usage-chart", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".usage-chart"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub default_window: TimeRange,
    pub timezone: Zone,
    pub reload_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_window: TimeRange::SevenDays,
            timezone: Zone::Local,
            reload_seconds: 60,
            default_file: None,
        }
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn log_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("usage-chart.log"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    if config.reload_seconds < MIN_RELOAD_SECONDS {
        config.reload_seconds = MIN_RELOAD_SECONDS;
        changed = true;
    }

    if config
        .default_file
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        config.default_file = None;
        changed = true;
    }

    changed
}

/// Layers the TOML file under `USAGE_CHART__*` environment overrides.
pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    let settings = config::Config::builder()
        .add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let mut parsed: AppConfig = settings.try_deserialize()?;
    if normalize_config(&mut parsed) {
        tracing::debug!(path = %path.display(), "normalized config values");
    }
    Ok(parsed)
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from(&config_path()?)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
