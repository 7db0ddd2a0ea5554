use std::collections::HashMap;
use std::path::Path;

use crate::datetime::Lasts;
use crate::error::Result;

/// Date stored on the novel side for years it cannot represent.
pub const NULL_DATE: &str = "0001-01-01";
/// Time stored alongside [`NULL_DATE`].
pub const NULL_TIME: &str = "00:00:00";

/// Temporal regime of a scene. Exactly one regime is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SceneDate {
    /// Specific calendar date, optionally with a time of day.
    Absolute { date: String, time: Option<String> },
    /// A date exists but lies outside the representable range; the real
    /// value only lives on the timeline side.
    Historical,
    /// Offset from the configured reference date.
    Relative {
        day: Option<i64>,
        hour: Option<u32>,
        minute: Option<u32>,
    },
    #[default]
    Unspecified,
}

impl SceneDate {
    /// True when a date (real or sentinel) is set.
    pub fn has_date(&self) -> bool {
        matches!(self, SceneDate::Absolute { .. } | SceneDate::Historical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SceneType {
    #[default]
    Normal,
    Notes,
    Todo,
    Unused,
}

impl SceneType {
    /// Only normal scenes become timeline events.
    pub fn is_exported(self) -> bool {
        self == SceneType::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scene {
    pub title: Option<String>,
    pub desc: Option<String>,
    pub when: SceneDate,
    pub lasts_days: Option<u32>,
    pub lasts_hours: Option<u32>,
    pub lasts_minutes: Option<u32>,
    pub scene_type: SceneType,
    pub status: Option<u8>,
}

impl Scene {
    /// Duration with absent components read as zero.
    pub fn lasts(&self) -> Lasts {
        Lasts {
            days: i64::from(self.lasts_days.unwrap_or(0)),
            hours: i64::from(self.lasts_hours.unwrap_or(0)),
            minutes: i64::from(self.lasts_minutes.unwrap_or(0)),
        }
    }

    pub fn set_lasts(&mut self, lasts: Lasts) {
        self.lasts_days = u32::try_from(lasts.days).ok();
        self.lasts_hours = u32::try_from(lasts.hours).ok();
        self.lasts_minutes = u32::try_from(lasts.minutes).ok();
    }

    pub fn has_duration(&self) -> bool {
        self.lasts_days.is_some() || self.lasts_hours.is_some() || self.lasts_minutes.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chapter {
    pub title: Option<String>,
    pub scene_ids: Vec<String>,
}

/// Chapters in order, each listing its scenes in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Novel {
    pub title: Option<String>,
    pub chapter_order: Vec<String>,
    pub chapters: HashMap<String, Chapter>,
    pub scenes: HashMap<String, Scene>,
}

impl Novel {
    /// Iterate `(chapter id, scene id)` pairs in reading order.
    pub fn scene_ids_in_order(&self) -> impl Iterator<Item = (&str, &str)> {
        self.chapter_order.iter().flat_map(move |ch_id| {
            self.chapters
                .get(ch_id)
                .map(|chapter| chapter.scene_ids.as_slice())
                .unwrap_or_default()
                .iter()
                .map(move |sc_id| (ch_id.as_str(), sc_id.as_str()))
        })
    }
}

/// A novel project file the converter can load and save.
pub trait NovelFile {
    fn path(&self) -> &Path;

    fn read(&self) -> Result<Novel>;

    fn write(&self, novel: &Novel) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_ids_in_order_walks_chapters() {
        let mut novel = Novel::default();
        novel.chapter_order = vec!["2".to_string(), "1".to_string()];
        novel.chapters.insert(
            "1".to_string(),
            Chapter {
                title: None,
                scene_ids: vec!["10".to_string()],
            },
        );
        novel.chapters.insert(
            "2".to_string(),
            Chapter {
                title: None,
                scene_ids: vec!["20".to_string(), "21".to_string()],
            },
        );

        let ids: Vec<_> = novel.scene_ids_in_order().map(|(_, sc)| sc).collect();
        assert_eq!(ids, vec!["20", "21", "10"]);
    }

    #[test]
    fn test_lasts_defaults_missing_components() {
        let scene = Scene {
            lasts_hours: Some(3),
            ..Scene::default()
        };
        assert_eq!(
            scene.lasts(),
            Lasts {
                days: 0,
                hours: 3,
                minutes: 0
            }
        );
    }
}
