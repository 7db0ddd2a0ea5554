use crate::datetime;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = "tlsync";
const CONFIG_FILE_NAME: &str = "config.toml";
const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const LOCAL_CONFIG_FILE_NAME: &str = "tlsync.toml";
pub const DEFAULT_SCENE_LABEL: &str = "Scene";
pub const DEFAULT_DATE_TIME: &str = "2021-07-26 00:00:00";
pub const DEFAULT_SCENE_COLOR: &str = "170,240,160";

/// Result returned by [`load_config`], capturing the source and any non-fatal issues.
#[derive(Debug, Clone)]
pub struct ConfigLoadResult {
    pub config: FileConfig,
    pub warnings: Vec<String>,
    pub source: ConfigSource,
    /// Files that contributed settings, in the order they were applied.
    pub files: Vec<PathBuf>,
}

/// Indicates where the configuration was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// No usable configuration file was found; defaults were synthesized.
    Default,
    /// At least one settings file was applied.
    File,
}

/// Errors that can occur when persisting configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Ser(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {err}"),
            ConfigError::Ser(err) => write!(f, "TOML serialization error: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Ser(value)
    }
}

/// Disk-backed configuration schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "FileConfig::schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub settings: SyncSettings,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            settings: SyncSettings::default(),
        }
    }
}

impl FileConfig {
    const fn schema_version() -> u32 {
        CURRENT_SCHEMA_VERSION
    }
}

/// Conversion settings handed to the timeline document and its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Label marking scene events in a timeline that has no scene IDs yet.
    #[serde(default = "SyncSettings::default_scene_label")]
    pub scene_label: String,
    /// Fallback for undated scenes and reference date for day offsets.
    #[serde(default = "SyncSettings::default_date_time")]
    pub default_date_time: String,
    /// Display color of newly created scene events.
    #[serde(default = "SyncSettings::default_scene_color")]
    pub scene_color: String,
    /// Leave scenes without a specific date/time out of the timeline.
    #[serde(default)]
    pub ignore_unspecific: bool,
    /// Convert specific dates to day/hour/minute offsets when importing.
    #[serde(default)]
    pub datetime_to_dhm: bool,
    /// Convert day/hour/minute offsets to specific dates when importing.
    #[serde(default)]
    pub dhm_to_datetime: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            scene_label: Self::default_scene_label(),
            default_date_time: Self::default_date_time(),
            scene_color: Self::default_scene_color(),
            ignore_unspecific: false,
            datetime_to_dhm: false,
            dhm_to_datetime: false,
        }
    }
}

impl SyncSettings {
    fn default_scene_label() -> String {
        DEFAULT_SCENE_LABEL.to_string()
    }

    fn default_date_time() -> String {
        DEFAULT_DATE_TIME.to_string()
    }

    fn default_scene_color() -> String {
        DEFAULT_SCENE_COLOR.to_string()
    }

    /// Date part of `default_date_time`.
    pub fn reference_date(&self) -> &str {
        datetime::split_date_time(&self.default_date_time).0
    }
}

/// Settings file contents where every key is optional, for layering.
#[derive(Debug, Default, Deserialize)]
struct PartialFileConfig {
    schema_version: Option<u32>,
    #[serde(default)]
    settings: PartialSettings,
}

#[derive(Debug, Default, Deserialize)]
struct PartialSettings {
    scene_label: Option<String>,
    default_date_time: Option<String>,
    scene_color: Option<String>,
    ignore_unspecific: Option<bool>,
    datetime_to_dhm: Option<bool>,
    dhm_to_datetime: Option<bool>,
}

impl PartialFileConfig {
    fn apply_to(self, config: &mut FileConfig) {
        if let Some(version) = self.schema_version {
            config.schema_version = version;
        }
        let target = &mut config.settings;
        let PartialSettings {
            scene_label,
            default_date_time,
            scene_color,
            ignore_unspecific,
            datetime_to_dhm,
            dhm_to_datetime,
        } = self.settings;
        if let Some(value) = scene_label {
            target.scene_label = value;
        }
        if let Some(value) = default_date_time {
            target.default_date_time = value;
        }
        if let Some(value) = scene_color {
            target.scene_color = value;
        }
        if let Some(value) = ignore_unspecific {
            target.ignore_unspecific = value;
        }
        if let Some(value) = datetime_to_dhm {
            target.datetime_to_dhm = value;
        }
        if let Some(value) = dhm_to_datetime {
            target.dhm_to_datetime = value;
        }
    }
}

/// Path to the configuration directory.
pub fn config_directory() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Path to the global `config.toml`.
pub fn config_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Path to the project-local settings file in `dir`.
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(LOCAL_CONFIG_FILE_NAME)
}

/// Load the global configuration, then the one next to the source file.
pub fn load_config(source_dir: Option<&Path>) -> ConfigLoadResult {
    let mut candidates = vec![config_path()];
    if let Some(dir) = source_dir {
        candidates.push(local_config_path(dir));
    }
    load_config_from(&candidates)
}

/// Apply each existing file in `paths` over the defaults, later files winning.
pub fn load_config_from(paths: &[PathBuf]) -> ConfigLoadResult {
    let mut warnings = Vec::new();
    let mut files = Vec::new();
    let mut config = FileConfig::default();

    for path in paths.iter().filter(|path| path.exists()) {
        match fs::read_to_string(path) {
            Ok(raw) => match toml::from_str::<PartialFileConfig>(&raw) {
                Ok(partial) => {
                    partial.apply_to(&mut config);
                    files.push(path.clone());
                }
                Err(err) => warnings.push(format!(
                    "Failed to parse {} as TOML: {}. Ignoring this file.",
                    path.display(),
                    err
                )),
            },
            Err(err) => warnings.push(format!(
                "Failed to read {}: {}. Ignoring this file.",
                path.display(),
                err
            )),
        }
    }

    let (config, mut sanitize_warnings) = sanitize_config(config);
    warnings.append(&mut sanitize_warnings);

    let source = if files.is_empty() {
        ConfigSource::Default
    } else {
        ConfigSource::File
    };
    ConfigLoadResult {
        config,
        warnings,
        source,
        files,
    }
}

/// Persist the configuration to `path`.
pub fn save_config(path: &Path, config: &FileConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = toml::to_string_pretty(config)?;
    fs::write(path, serialized)?;
    Ok(())
}

fn sanitize_config(mut config: FileConfig) -> (FileConfig, Vec<String>) {
    let mut warnings = Vec::new();

    if config.schema_version != CURRENT_SCHEMA_VERSION {
        warnings.push(format!(
            "Unknown config schema version {}. Resetting to {}.",
            config.schema_version, CURRENT_SCHEMA_VERSION
        ));
        return (FileConfig::default(), warnings);
    }

    let settings = &mut config.settings;

    if settings.scene_label.trim().is_empty() {
        warnings.push(format!(
            "scene_label must not be empty. Resetting to '{}'.",
            DEFAULT_SCENE_LABEL
        ));
        settings.scene_label = SyncSettings::default_scene_label();
    }

    match datetime::normalize(&settings.default_date_time)
        .and_then(|canonical| datetime::parse_timestamp(&canonical).map(|_| canonical))
    {
        Ok(canonical) if datetime::year_is_representable(&canonical) => {
            settings.default_date_time = canonical;
        }
        _ => {
            warnings.push(format!(
                "default_date_time '{}' is not a usable date/time. Resetting to '{}'.",
                settings.default_date_time, DEFAULT_DATE_TIME
            ));
            settings.default_date_time = SyncSettings::default_date_time();
        }
    }

    if !is_rgb_triplet(&settings.scene_color) {
        warnings.push(format!(
            "scene_color '{}' is not an 'r,g,b' triplet. Resetting to '{}'.",
            settings.scene_color, DEFAULT_SCENE_COLOR
        ));
        settings.scene_color = SyncSettings::default_scene_color();
    }

    // Both flags set is contradictory; datetime_to_dhm takes precedence on import.
    if settings.datetime_to_dhm && settings.dhm_to_datetime {
        warnings.push(
            "Both datetime_to_dhm and dhm_to_datetime are enabled; datetime_to_dhm wins."
                .to_string(),
        );
    }

    (config, warnings)
}

fn is_rgb_triplet(value: &str) -> bool {
    let parts: Vec<_> = value.split(',').map(str::trim).collect();
    parts.len() == 3 && parts.iter().all(|part| part.parse::<u8>().is_ok())
}
