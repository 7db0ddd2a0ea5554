//! Core library crate synchronizing Timeline files with yWriter projects.

pub mod config;
pub mod converter;
pub mod datetime;
pub mod error;
pub mod logging;
pub mod novel;
pub mod persist;
pub mod scene_event;
pub mod timeline;
pub mod xml_tree;
pub mod yw7;

pub use config::{
    ConfigError, ConfigLoadResult, ConfigSource, FileConfig, LOCAL_CONFIG_FILE_NAME, SyncSettings,
    config_directory, config_path, load_config, load_config_from, local_config_path, save_config,
};
pub use converter::{
    Freshness, FreshnessReport, SyncConverter, SyncDirection, SyncOutcome, SyncProgressCallback,
    SyncProgressEvent, SyncProgressEventKind, compare_timestamps,
};
pub use error::{Result, SyncError};
pub use logging::{LoggingDestination, LoggingError, init_logging};
pub use novel::{Chapter, Novel, NovelFile, Scene, SceneDate, SceneType};
pub use scene_event::SceneEvent;
pub use timeline::{TIMELINE_EXTENSION, TimelineDocument};
pub use yw7::{YW7_EXTENSION, Yw7File};
