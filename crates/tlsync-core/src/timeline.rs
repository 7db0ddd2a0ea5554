use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::datetime::{self, DateRange};
use crate::error::{Result, SyncError};
use crate::novel::{Chapter, Novel, Scene};
use crate::persist;
use crate::scene_event::SceneEvent;
use crate::xml_tree::{NodeId, XmlTree};

pub const TIMELINE_EXTENSION: &str = "timeline";

const TIMELINE_VERSION: &str = "2.4.0 (3f207fbb63f0 2021-04-07)";
const TIME_TYPE: &str = "gregoriantime";
const BOOTSTRAP_CHAPTER_ID: &str = "1";
const BOOTSTRAP_CHAPTER_TITLE: &str = "Chapter 1";
const OUTLINE_STATUS: u8 = 1;

static SCENE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ScID:([0-9]+)").expect("scene ID pattern"));
static CONTAINER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\(\[][0-9]+[\)\]])").expect("container ID pattern"));

#[derive(Clone, Copy)]
enum ReadMode<'a> {
    /// No novel project yet: promote marked events to new scenes.
    Outline,
    /// Bind events carrying `ScID:` labels to the scenes of `project`.
    Update(&'a Novel),
}

/// A `.timeline` file and the scene events bound to it.
///
/// Events whose `labels` contain `ScID:<n>` belong to scene `n`. All other
/// events and every field this crate does not own are kept as found.
#[derive(Debug, Clone)]
pub struct TimelineDocument {
    path: PathBuf,
    settings: SyncSettings,
    tree: Option<XmlTree>,
    /// Scene events keyed by scene ID.
    pub events: HashMap<String, SceneEvent>,
    pub chapter_order: Vec<String>,
    pub chapters: HashMap<String, Chapter>,
}

impl TimelineDocument {
    pub fn new(path: impl Into<PathBuf>, settings: SyncSettings) -> Self {
        Self {
            path: path.into(),
            settings,
            tree: None,
            events: HashMap::new(),
            chapter_order: Vec::new(),
            chapters: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// True once a tree was read from disk or written.
    pub fn is_loaded(&self) -> bool {
        self.tree.is_some()
    }

    /// Parse the timeline file.
    ///
    /// Without a project that already has scenes, every event labeled with
    /// the configured scene marker becomes a new scene, numbered in document
    /// order, and the relabeled file is written back immediately. Otherwise
    /// only events labeled `ScID:<id>` are read.
    pub fn read(&mut self, project: Option<&Novel>) -> Result<()> {
        let mode = match project {
            Some(novel) if !novel.scenes.is_empty() => ReadMode::Update(novel),
            _ => ReadMode::Outline,
        };
        self.read_with(mode)
    }

    fn read_with(&mut self, mode: ReadMode<'_>) -> Result<()> {
        let raw = fs::read_to_string(&self.path).map_err(|err| SyncError::read(&self.path, err))?;
        let mut tree =
            XmlTree::parse(&raw).map_err(|err| SyncError::parse(&self.path, err.to_string()))?;
        let outline = matches!(mode, ReadMode::Outline);
        let marker = self.settings.scene_label.as_str();

        let mut events = HashMap::new();
        let mut by_start: Vec<(String, String)> = Vec::new();
        let mut scene_count = 0usize;

        for node in tree.descendants_named(tree.root(), "event") {
            let Some(labels_node) = tree.find_child(node, "labels") else {
                continue;
            };
            let labels = tree.text(labels_node).unwrap_or_default().to_string();

            let sc_id = if outline {
                let token = match SCENE_ID.find(&labels) {
                    Some(found) => found.as_str().to_string(),
                    None if !marker.is_empty() && labels.contains(marker) => marker.to_string(),
                    None => continue,
                };
                scene_count += 1;
                let sc_id = scene_count.to_string();
                tree.set_text(labels_node, labels.replace(&token, &format!("ScID:{sc_id}")));
                sc_id
            } else {
                match SCENE_ID.captures(&labels) {
                    Some(captures) => captures[1].to_string(),
                    None => continue,
                }
            };

            let mut event = SceneEvent::new();
            if outline {
                event.scene.status = Some(OUTLINE_STATUS);
            }
            event.scene.title = Some(match tree.child_text(node, "text") {
                Some(text) if !text.is_empty() => {
                    let (cont_id, title) = split_container_id(text);
                    event.cont_id = cont_id;
                    unmask_title(title).to_string()
                }
                _ => format!("Scene {sc_id}"),
            });
            event.scene.desc = tree.child_text(node, "description").map(str::to_string);

            let start = tree
                .child_text(node, "start")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(self.settings.default_date_time.as_str())
                .to_string();
            let end = tree
                .child_text(node, "end")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(start.as_str())
                .to_string();
            let to_relative = self.is_unspecific(mode, &sc_id);
            match event.set_date_time(&start, &end, to_relative, &self.settings) {
                Ok(()) => {}
                Err(SyncError::MalformedDate(value)) => {
                    warn!(
                        sc_id = %sc_id,
                        value = %value,
                        "Malformed event date; using the default date/time"
                    );
                    let fallback = self.settings.default_date_time.as_str();
                    event.set_date_time(fallback, fallback, to_relative, &self.settings)?;
                }
                Err(err) => return Err(err),
            }

            by_start.push((event.start().unwrap_or_default().to_string(), sc_id.clone()));
            events.insert(sc_id, event);
        }

        let (chapter_order, chapters) = match mode {
            ReadMode::Outline => {
                by_start.sort_by(|a, b| datetime::compare(&a.0, &b.0));
                let chapter = Chapter {
                    title: Some(BOOTSTRAP_CHAPTER_TITLE.to_string()),
                    scene_ids: by_start.into_iter().map(|(_, sc_id)| sc_id).collect(),
                };
                persist::write_with_backup(&self.path, &tree.serialize())?;
                info!(
                    path = %self.path.display(),
                    scenes = events.len(),
                    "Scene IDs written to timeline"
                );
                (
                    vec![BOOTSTRAP_CHAPTER_ID.to_string()],
                    HashMap::from([(BOOTSTRAP_CHAPTER_ID.to_string(), chapter)]),
                )
            }
            ReadMode::Update(project) => bound_membership(project, &events),
        };

        debug!(
            path = %self.path.display(),
            outline,
            scenes = events.len(),
            "Timeline read"
        );
        self.tree = Some(tree);
        self.events = events;
        self.chapter_order = chapter_order;
        self.chapters = chapters;
        Ok(())
    }

    /// Decide whether timeline dates become day/hour/minute offsets.
    fn is_unspecific(&self, mode: ReadMode<'_>, sc_id: &str) -> bool {
        let settings = &self.settings;
        if settings.datetime_to_dhm {
            return true;
        }
        if settings.dhm_to_datetime {
            return false;
        }
        match mode {
            ReadMode::Update(project) => project
                .scenes
                .get(sc_id)
                .is_some_and(|scene| !scene.when.has_date()),
            ReadMode::Outline => false,
        }
    }

    /// Novel project built from the events read, for a fresh project.
    pub fn to_novel(&self) -> Novel {
        Novel {
            title: self
                .path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned()),
            chapter_order: self.chapter_order.clone(),
            chapters: self.chapters.clone(),
            scenes: self
                .events
                .iter()
                .map(|(sc_id, event)| (sc_id.clone(), event.scene.clone()))
                .collect(),
        }
    }

    /// Copy the timeline-owned fields of every bound event into `novel`.
    ///
    /// Returns the number of scenes updated. Events whose scene does not
    /// exist in `novel` are skipped.
    pub fn apply_to(&self, novel: &mut Novel) -> usize {
        let mut updated = 0;
        for (sc_id, event) in &self.events {
            match novel.scenes.get_mut(sc_id) {
                Some(scene) => {
                    apply_event(&event.scene, scene);
                    updated += 1;
                }
                None => warn!(sc_id = %sc_id, "Timeline event refers to an unknown scene; skipped"),
            }
        }
        updated
    }

    /// Mirror the scenes and chapter order of `source`.
    ///
    /// An existing file is read first; if that fails, nothing changes.
    pub fn merge(&mut self, source: &Novel) -> Result<()> {
        if self.tree.is_none() && self.path.is_file() {
            self.read_with(ReadMode::Update(source))?;
        }

        let mut events = self.events.clone();
        let mut chapter_order = Vec::with_capacity(source.chapter_order.len());
        let mut chapters = HashMap::with_capacity(source.chapters.len());

        for ch_id in &source.chapter_order {
            let Some(source_chapter) = source.chapters.get(ch_id) else {
                continue;
            };
            let mut chapter = Chapter {
                title: source_chapter.title.clone(),
                scene_ids: Vec::with_capacity(source_chapter.scene_ids.len()),
            };
            for sc_id in &source_chapter.scene_ids {
                let Some(source_scene) = source.scenes.get(sc_id) else {
                    continue;
                };
                if self.settings.ignore_unspecific && !source_scene.when.has_date() {
                    continue;
                }

                let event = events.entry(sc_id.clone()).or_default();
                if let Some(title) = &source_scene.title {
                    let title = mask_title(title);
                    event.scene.title = Some(match &event.cont_id {
                        Some(cont_id) => format!("{cont_id}{title}"),
                        None => title,
                    });
                }
                event.scene.desc = source_scene.desc.clone();
                event.scene.scene_type = source_scene.scene_type;
                event.scene.when = source_scene.when.clone();
                event.scene.lasts_days = source_scene.lasts_days;
                event.scene.lasts_hours = source_scene.lasts_hours;
                event.scene.lasts_minutes = source_scene.lasts_minutes;
                event.merge_date_time(source_scene, &self.settings)?;
                chapter.scene_ids.push(sc_id.clone());
            }
            chapter_order.push(ch_id.clone());
            chapters.insert(ch_id.clone(), chapter);
        }

        let before = events.len();
        events.retain(|sc_id, _| source.scenes.contains_key(sc_id));
        debug!(
            scenes = events.len(),
            removed = before - events.len(),
            "Timeline merged with novel"
        );

        self.events = events;
        self.chapter_order = chapter_order;
        self.chapters = chapters;
        Ok(())
    }

    /// Scene IDs that become events: normal scenes in chapter order.
    pub fn exported_scene_ids(&self) -> Vec<String> {
        self.chapter_order
            .iter()
            .filter_map(|ch_id| self.chapters.get(ch_id))
            .flat_map(|chapter| chapter.scene_ids.iter())
            .filter(|sc_id| {
                self.events
                    .get(sc_id.as_str())
                    .is_some_and(|event| event.scene.scene_type.is_exported())
            })
            .cloned()
            .collect()
    }

    /// Patch the loaded tree, or create a new one, and save it.
    pub fn write(&mut self) -> Result<()> {
        let exported = self.exported_scene_ids();
        let mut events = self.events.clone();
        let mut range = DateRange::default();

        let tree = match &self.tree {
            Some(existing) => {
                let mut tree = existing.clone();
                patch_tree(&mut tree, &mut events, &exported, &mut range, &self.settings)?;
                tree
            }
            None => create_tree(&mut events, &exported, &mut range, &self.settings)?,
        };

        persist::write_with_backup(&self.path, &tree.serialize())?;
        info!(
            path = %self.path.display(),
            events = exported.len(),
            "Timeline written"
        );
        self.tree = Some(tree);
        self.events = events;
        Ok(())
    }
}

/// Chapter membership of `project` restricted to the scenes found in the timeline.
fn bound_membership(
    project: &Novel,
    events: &HashMap<String, SceneEvent>,
) -> (Vec<String>, HashMap<String, Chapter>) {
    let mut chapter_order = Vec::new();
    let mut chapters = HashMap::new();
    for ch_id in &project.chapter_order {
        let Some(chapter) = project.chapters.get(ch_id) else {
            continue;
        };
        let scene_ids = chapter
            .scene_ids
            .iter()
            .filter(|sc_id| events.contains_key(sc_id.as_str()))
            .cloned()
            .collect();
        chapter_order.push(ch_id.clone());
        chapters.insert(
            ch_id.clone(),
            Chapter {
                title: chapter.title.clone(),
                scene_ids,
            },
        );
    }
    (chapter_order, chapters)
}

fn patch_tree(
    tree: &mut XmlTree,
    events: &mut HashMap<String, SceneEvent>,
    exported: &[String],
    range: &mut DateRange,
    settings: &SyncSettings,
) -> Result<()> {
    let root = tree.root();
    let events_node = tree.get_or_create_child(root, "events");
    let wanted: HashSet<&str> = exported.iter().map(String::as_str).collect();
    let mut present = HashSet::new();
    let mut orphans = Vec::new();

    let existing: Vec<NodeId> = tree.children_named(events_node, "event").collect();
    for node in existing {
        let Some(sc_id) = tree.child_text(node, "labels").and_then(scene_id_in) else {
            continue;
        };
        match events.get_mut(&sc_id) {
            Some(event) if wanted.contains(sc_id.as_str()) => {
                event.build_event(tree, node, &sc_id, range, settings);
                present.insert(sc_id);
            }
            _ => orphans.push(node),
        }
    }

    for sc_id in exported {
        if present.contains(sc_id) {
            continue;
        }
        if let Some(event) = events.get_mut(sc_id) {
            let node = tree.append_child(events_node, "event");
            event.build_event(tree, node, sc_id, range, settings);
        }
    }

    let removed = orphans.len();
    for node in orphans {
        tree.remove_child(events_node, node);
    }
    if removed > 0 {
        debug!(removed, "Orphaned scene events removed");
    }

    let (view_start, view_end) = range.view_range(&settings.default_date_time)?;
    let view = tree.get_or_create_child(root, "view");
    let period = tree.get_or_create_child(view, "displayed_period");
    tree.set_child_text(period, "start", view_start);
    tree.set_child_text(period, "end", view_end);
    Ok(())
}

fn create_tree(
    events: &mut HashMap<String, SceneEvent>,
    exported: &[String],
    range: &mut DateRange,
    settings: &SyncSettings,
) -> Result<XmlTree> {
    let mut tree = XmlTree::new("timeline");
    let root = tree.root();
    tree.set_child_text(root, "version", TIMELINE_VERSION);
    tree.set_child_text(root, "timetype", TIME_TYPE);
    tree.append_child(root, "categories");
    let events_node = tree.append_child(root, "events");

    for sc_id in exported {
        if let Some(event) = events.get_mut(sc_id) {
            let node = tree.append_child(events_node, "event");
            event.build_event(&mut tree, node, sc_id, range, settings);
        }
    }

    let (view_start, view_end) = range.view_range(&settings.default_date_time)?;
    let view = tree.append_child(root, "view");
    let period = tree.append_child(view, "displayed_period");
    tree.set_child_text(period, "start", view_start);
    tree.set_child_text(period, "end", view_end);
    Ok(tree)
}

fn apply_event(source: &Scene, target: &mut Scene) {
    if let Some(title) = &source.title {
        target.title = Some(title.clone());
    }
    if let Some(desc) = &source.desc {
        target.desc = Some(desc.clone());
    }
    target.when = source.when.clone();
    if source.has_duration() {
        target.lasts_days = source.lasts_days;
        target.lasts_hours = source.lasts_hours;
        target.lasts_minutes = source.lasts_minutes;
    }
}

fn scene_id_in(labels: &str) -> Option<String> {
    SCENE_ID
        .captures(labels)
        .map(|captures| captures[1].to_string())
}

/// Split a leading `(n)` or `[n]` container ID off a timeline title.
fn split_container_id(text: &str) -> (Option<String>, &str) {
    match CONTAINER_ID.find(text) {
        Some(found) => (Some(found.as_str().to_string()), &text[found.end()..]),
        None => (None, text),
    }
}

// Titles starting with a bracket get a leading space on the timeline side so
// they are not mistaken for a container ID.
fn mask_title(title: &str) -> String {
    if title.starts_with('(') || title.starts_with('[') {
        format!(" {title}")
    } else {
        title.to_string()
    }
}

fn unmask_title(title: &str) -> &str {
    if title.starts_with(" (") || title.starts_with(" [") {
        title.trim_start()
    } else {
        title
    }
}
