use std::cmp::Ordering;

use chrono::{Duration, Timelike};

use crate::config::SyncSettings;
use crate::datetime::{self, DateRange};
use crate::error::{Result, SyncError};
use crate::novel::{Scene, SceneDate};
use crate::xml_tree::{NodeId, XmlTree};

/// Display fields every scene event carries, with the values used when missing.
const DISPLAY_DEFAULTS: [(&str, &str); 4] = [
    ("progress", "0"),
    ("fuzzy", "False"),
    ("locked", "False"),
    ("ends_today", "False"),
];

/// Fields that precede `description` inside a Timeline event element.
const DESCRIPTION_PREDECESSORS: [&str; 10] = [
    "start",
    "end",
    "text",
    "progress",
    "fuzzy",
    "fuzzy_start",
    "fuzzy_end",
    "locked",
    "ends_today",
    "category",
];

/// Scene data as seen from the timeline side.
///
/// `start` and `end` hold the canonical timestamps written to the event and
/// keep historical dates that the novel side stores only as a sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneEvent {
    pub scene: Scene,
    /// Container ID such as `(3)` or `[3]` prefixed to the timeline title.
    pub cont_id: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

impl SceneEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn end(&self) -> Option<&str> {
        self.end.as_deref()
    }

    /// Take over timestamps read from the timeline.
    ///
    /// Representable starts become an absolute date with a duration, or a
    /// day/hour/minute offset when `to_relative` is set. Earlier years turn
    /// into [`SceneDate::Historical`] and leave the duration untouched.
    pub fn set_date_time(
        &mut self,
        start: &str,
        end: &str,
        to_relative: bool,
        settings: &SyncSettings,
    ) -> Result<()> {
        let start = datetime::normalize(start)?;
        let mut end = datetime::normalize(end)?;
        if datetime::compare(&end, &start) == Ordering::Less {
            end = start.clone();
        }

        if !datetime::year_is_representable(&start) {
            self.scene.when = SceneDate::Historical;
            self.start = Some(start);
            self.end = Some(end);
            return Ok(());
        }

        let lasts = datetime::compute_duration(&start, &end)?;
        self.scene.set_lasts(lasts);

        let (date, time) = datetime::split_date_time(&start);
        self.scene.when = if to_relative {
            relative_date(date, time, settings.reference_date()).unwrap_or(SceneDate::Relative {
                day: None,
                hour: None,
                minute: None,
            })
        } else {
            SceneDate::Absolute {
                date: date.to_string(),
                time: Some(time.to_string()),
            }
        };
        self.start = Some(start);
        self.end = Some(end);
        Ok(())
    }

    /// Rebuild the event timestamps from a novel scene.
    pub fn merge_date_time(&mut self, source: &Scene, settings: &SyncSettings) -> Result<()> {
        let start = match &source.when {
            SceneDate::Absolute { date, time } => {
                let time = time.as_deref().filter(|time| !time.is_empty());
                datetime::normalize(&format!("{date} {}", time.unwrap_or("00:00:00")))?
            }
            SceneDate::Relative { day, hour, minute } => {
                offset_date_time(settings, *day, *hour, *minute)?
            }
            SceneDate::Unspecified => offset_date_time(settings, None, None, None)?,
            SceneDate::Historical => match self.start.take() {
                Some(start) => start,
                None => settings.default_date_time.clone(),
            },
        };

        let mut end = if source.when == SceneDate::Historical {
            self.end.take().unwrap_or_else(|| start.clone())
        } else {
            datetime::add_lasts(&start, source.lasts())?
        };
        if datetime::compare(&end, &start) == Ordering::Less {
            end = start.clone();
        }

        self.start = Some(start);
        self.end = Some(end);
        Ok(())
    }

    /// Write this event into the `<event>` element `event`.
    ///
    /// Existing display flags, labels and colors are kept as they are; only
    /// missing ones get defaults.
    pub fn build_event(
        &mut self,
        tree: &mut XmlTree,
        event: NodeId,
        sc_id: &str,
        range: &mut DateRange,
        settings: &SyncSettings,
    ) {
        if let Some(start) = &self.start {
            tree.set_child_text(event, "start", start.as_str());
            range.include_start(start);
        }
        if let Some(end) = &self.end {
            tree.set_child_text(event, "end", end.as_str());
            range.include_end(end);
        }

        let title = self
            .scene
            .title
            .get_or_insert_with(|| format!("Unnamed scene ID {sc_id}"));
        tree.set_child_text(event, "text", title.as_str());

        for (name, value) in DISPLAY_DEFAULTS {
            if tree.find_child(event, name).is_none() {
                let child = tree.append_child(event, name);
                tree.set_text(child, value);
            }
        }

        match (&self.scene.desc, tree.find_child(event, "description")) {
            (Some(desc), Some(existing)) => tree.set_text(existing, desc.as_str()),
            (Some(desc), None) => {
                let child = if tree.find_child(event, "labels").is_none() {
                    tree.append_child(event, "description")
                } else {
                    let index = description_index(tree, event);
                    tree.insert_child(event, index, "description")
                };
                tree.set_text(child, desc.as_str());
            }
            (None, Some(stale)) => {
                tree.remove_child(event, stale);
            }
            (None, None) => {}
        }

        if tree.find_child(event, "labels").is_none() {
            tree.set_child_text(event, "labels", format!("ScID:{sc_id}"));
        }
        if tree.find_child(event, "default_color").is_none() {
            tree.set_child_text(event, "default_color", settings.scene_color.as_str());
        }
    }
}

/// Position right after the last field that belongs before the description.
fn description_index(tree: &XmlTree, event: NodeId) -> usize {
    DESCRIPTION_PREDECESSORS
        .iter()
        .filter_map(|name| tree.find_child(event, name))
        .filter_map(|child| tree.position_of(event, child))
        .max()
        .map_or(0, |position| position + 1)
}

fn relative_date(date: &str, time: &str, reference: &str) -> Result<SceneDate> {
    let scene_date = datetime::parse_date(date)?;
    let reference = datetime::parse_date(reference)?;
    let time = datetime::parse_time(time)?;
    Ok(SceneDate::Relative {
        day: Some(scene_date.signed_duration_since(reference).num_days()),
        hour: Some(time.hour()),
        minute: Some(time.minute()),
    })
}

fn offset_date_time(
    settings: &SyncSettings,
    day: Option<i64>,
    hour: Option<u32>,
    minute: Option<u32>,
) -> Result<String> {
    let reference = settings.reference_date();
    let date = Duration::try_days(day.unwrap_or(0))
        .and_then(|offset| datetime::parse_date(reference).ok()?.checked_add_signed(offset))
        .ok_or_else(|| SyncError::MalformedDate(reference.to_string()))?;
    Ok(format!(
        "{} {:02}:{:02}:00",
        datetime::format_date(date),
        hour.unwrap_or(0),
        minute.unwrap_or(0)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::Lasts;

    fn settings() -> SyncSettings {
        SyncSettings::default()
    }

    #[test]
    fn test_set_date_time_absolute_with_duration() {
        let mut event = SceneEvent::new();
        event
            .set_date_time("2021-07-26 10:00:00", "2021-07-27 12:30:00", false, &settings())
            .unwrap();

        assert_eq!(
            event.scene.when,
            SceneDate::Absolute {
                date: "2021-07-26".to_string(),
                time: Some("10:00:00".to_string()),
            }
        );
        assert_eq!(
            event.scene.lasts(),
            Lasts {
                days: 1,
                hours: 2,
                minutes: 30
            }
        );
        assert_eq!(event.start(), Some("2021-07-26 10:00:00"));
    }

    #[test]
    fn test_set_date_time_two_digit_year_is_historical() {
        let mut event = SceneEvent::new();
        event.scene.lasts_days = Some(4);
        event
            .set_date_time("44-03-15 12:00:00", "44-03-15 13:00:00", false, &settings())
            .unwrap();

        assert_eq!(event.scene.when, SceneDate::Historical);
        assert_eq!(event.scene.lasts_days, Some(4));
        assert_eq!(event.start(), Some("0044-03-15 12:00:00"));
        assert_eq!(event.end(), Some("0044-03-15 13:00:00"));
    }

    #[test]
    fn test_set_date_time_bc_year_is_historical() {
        let mut event = SceneEvent::new();
        event
            .set_date_time("-500-01-01 00:00:00", "-500-01-02 00:00:00", true, &settings())
            .unwrap();
        assert_eq!(event.scene.when, SceneDate::Historical);
        assert!(!event.scene.has_duration());
    }

    #[test]
    fn test_set_date_time_relative_offsets_from_reference() {
        let mut event = SceneEvent::new();
        event
            .set_date_time("2021-07-28 09:15:00", "2021-07-28 10:15:00", true, &settings())
            .unwrap();

        assert_eq!(
            event.scene.when,
            SceneDate::Relative {
                day: Some(2),
                hour: Some(9),
                minute: Some(15),
            }
        );
        assert_eq!(event.scene.lasts_hours, Some(1));
    }

    #[test]
    fn test_set_date_time_relative_with_bad_reference_clears_offsets() {
        let mut settings = settings();
        settings.default_date_time = "garbage".to_string();
        let mut event = SceneEvent::new();
        event
            .set_date_time("2021-07-28 09:15:00", "2021-07-28 10:15:00", true, &settings)
            .unwrap();

        assert_eq!(
            event.scene.when,
            SceneDate::Relative {
                day: None,
                hour: None,
                minute: None,
            }
        );
    }

    #[test]
    fn test_set_date_time_rejects_malformed_input() {
        let mut event = SceneEvent::new();
        let err = event
            .set_date_time("soon", "later", false, &settings())
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedDate(_)));
    }

    #[test]
    fn test_merge_date_time_absolute_adds_duration() {
        let source = Scene {
            when: SceneDate::Absolute {
                date: "2021-07-26".to_string(),
                time: None,
            },
            lasts_hours: Some(2),
            lasts_minutes: Some(30),
            ..Scene::default()
        };
        let mut event = SceneEvent::new();
        event.merge_date_time(&source, &settings()).unwrap();

        assert_eq!(event.start(), Some("2021-07-26 00:00:00"));
        assert_eq!(event.end(), Some("2021-07-26 02:30:00"));
    }

    #[test]
    fn test_merge_date_time_relative_uses_reference_date() {
        let source = Scene {
            when: SceneDate::Relative {
                day: Some(-1),
                hour: Some(7),
                minute: None,
            },
            ..Scene::default()
        };
        let mut event = SceneEvent::new();
        event.merge_date_time(&source, &settings()).unwrap();

        assert_eq!(event.start(), Some("2021-07-25 07:00:00"));
        assert_eq!(event.end(), Some("2021-07-25 07:00:00"));
    }

    #[test]
    fn test_merge_date_time_unspecified_starts_at_reference_midnight() {
        let mut settings = settings();
        settings.default_date_time = "2022-01-01 12:00:00".to_string();
        let mut event = SceneEvent::new();
        event.merge_date_time(&Scene::default(), &settings).unwrap();
        assert_eq!(event.start(), Some("2022-01-01 00:00:00"));
    }

    #[test]
    fn test_merge_date_time_historical_keeps_event_dates() {
        let mut event = SceneEvent::new();
        event
            .set_date_time("44-03-15 12:00:00", "44-03-16 12:00:00", false, &settings())
            .unwrap();
        let source = Scene {
            when: SceneDate::Historical,
            lasts_days: Some(9),
            ..Scene::default()
        };

        event.merge_date_time(&source, &settings()).unwrap();

        assert_eq!(event.start(), Some("0044-03-15 12:00:00"));
        assert_eq!(event.end(), Some("0044-03-16 12:00:00"));
    }

    #[test]
    fn test_merge_date_time_historical_without_event_falls_back_to_default() {
        let source = Scene {
            when: SceneDate::Historical,
            ..Scene::default()
        };
        let mut event = SceneEvent::new();
        event.merge_date_time(&source, &settings()).unwrap();

        assert_eq!(event.start(), Some("2021-07-26 00:00:00"));
        assert_eq!(event.end(), event.start());
    }

    #[test]
    fn test_build_event_creates_fields_in_order() {
        let mut tree = XmlTree::new("events");
        let node = tree.append_child(tree.root(), "event");
        let mut event = SceneEvent::new();
        event.scene.desc = Some("A storm".to_string());
        event
            .merge_date_time(
                &Scene {
                    when: SceneDate::Absolute {
                        date: "2021-07-26".to_string(),
                        time: Some("10:00:00".to_string()),
                    },
                    ..Scene::default()
                },
                &settings(),
            )
            .unwrap();
        let mut range = DateRange::default();

        event.build_event(&mut tree, node, "5", &mut range, &settings());

        let names: Vec<_> = tree
            .children(node)
            .iter()
            .map(|&child| tree.name(child).to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "start",
                "end",
                "text",
                "progress",
                "fuzzy",
                "locked",
                "ends_today",
                "description",
                "labels",
                "default_color"
            ]
        );
        assert_eq!(tree.child_text(node, "text"), Some("Unnamed scene ID 5"));
        assert_eq!(tree.child_text(node, "labels"), Some("ScID:5"));
        assert_eq!(tree.child_text(node, "default_color"), Some("170,240,160"));
        assert_eq!(range.min.as_deref(), Some("2021-07-26 10:00:00"));
    }

    #[test]
    fn test_build_event_inserts_description_after_category() {
        let source = r#"<event>
  <start>2021-07-26 00:00:00</start>
  <end>2021-07-26 00:00:00</end>
  <text>Old</text>
  <progress>40</progress>
  <fuzzy>True</fuzzy>
  <locked>False</locked>
  <ends_today>False</ends_today>
  <category>Plot</category>
  <labels>ScID:3 extra</labels>
  <default_color>1,2,3</default_color>
</event>"#;
        let mut tree = XmlTree::parse(source).unwrap();
        let node = tree.root();
        let mut event = SceneEvent::new();
        event.scene.title = Some("New".to_string());
        event.scene.desc = Some("Details".to_string());
        event.merge_date_time(&Scene::default(), &settings()).unwrap();

        event.build_event(&mut tree, node, "3", &mut DateRange::default(), &settings());

        let desc = tree.find_child(node, "description").unwrap();
        let category = tree.find_child(node, "category").unwrap();
        assert_eq!(
            tree.position_of(node, desc),
            tree.position_of(node, category).map(|p| p + 1)
        );
        assert_eq!(tree.child_text(node, "progress"), Some("40"));
        assert_eq!(tree.child_text(node, "fuzzy"), Some("True"));
        assert_eq!(tree.child_text(node, "labels"), Some("ScID:3 extra"));
        assert_eq!(tree.child_text(node, "default_color"), Some("1,2,3"));
        assert_eq!(tree.child_text(node, "text"), Some("New"));
    }

    #[test]
    fn test_build_event_removes_stale_description() {
        let mut tree =
            XmlTree::parse("<event><text>T</text><description>old</description></event>").unwrap();
        let node = tree.root();
        let mut event = SceneEvent::new();
        event.scene.title = Some("T".to_string());

        event.build_event(&mut tree, node, "1", &mut DateRange::default(), &settings());

        assert!(tree.find_child(node, "description").is_none());
    }
}
