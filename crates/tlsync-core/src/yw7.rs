//! yWriter 7 project files (`.yw7`).
//!
//! Only the parts the converter needs are mapped: project title, chapters
//! with their scene lists, and the scene fields listed on [`Scene`]. Writing
//! patches an existing project in place, so characters, locations, notes and
//! any other elements are kept.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::novel::{Chapter, NULL_DATE, NULL_TIME, Novel, NovelFile, Scene, SceneDate, SceneType};
use crate::persist;
use crate::xml_tree::{NodeId, XmlTree};

pub const YW7_EXTENSION: &str = "yw7";

const ROOT: &str = "YWRITER7";
const FORMAT_VERSION: &str = "7";
const UNUSED_MARK: &str = "-1";
const SPECIFIC_MODE: &str = "-1";
const NOTES_TYPE: &str = "1";
const TODO_TYPE: &str = "2";

#[derive(Debug, Clone)]
pub struct Yw7File {
    path: PathBuf,
}

impl Yw7File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load_tree(&self) -> Result<XmlTree> {
        let raw = fs::read_to_string(&self.path).map_err(|err| SyncError::read(&self.path, err))?;
        let tree =
            XmlTree::parse(&raw).map_err(|err| SyncError::parse(&self.path, err.to_string()))?;
        if tree.name(tree.root()) != ROOT {
            return Err(SyncError::parse(
                &self.path,
                format!("root element is <{}>, expected <{ROOT}>", tree.name(tree.root())),
            ));
        }
        Ok(tree)
    }
}

impl NovelFile for Yw7File {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Novel> {
        let tree = self.load_tree()?;
        let root = tree.root();
        let mut novel = Novel {
            title: tree
                .find_child(root, "PROJECT")
                .and_then(|project| non_empty_text(&tree, project, "Title")),
            ..Novel::default()
        };

        if let Some(scenes) = tree.find_child(root, "SCENES") {
            for node in tree.children_named(scenes, "SCENE") {
                let Some(sc_id) = non_empty_text(&tree, node, "ID") else {
                    warn!(path = %self.path.display(), "Scene without ID skipped");
                    continue;
                };
                novel.scenes.insert(sc_id, read_scene(&tree, node));
            }
        }

        if let Some(chapters) = tree.find_child(root, "CHAPTERS") {
            for node in tree.children_named(chapters, "CHAPTER") {
                let Some(ch_id) = non_empty_text(&tree, node, "ID") else {
                    warn!(path = %self.path.display(), "Chapter without ID skipped");
                    continue;
                };
                let scene_ids = tree
                    .find_child(node, "Scenes")
                    .map(|list| {
                        tree.children_named(list, "ScID")
                            .filter_map(|id| tree.text(id))
                            .map(|id| id.trim().to_string())
                            .filter(|id| novel.scenes.contains_key(id))
                            .collect()
                    })
                    .unwrap_or_default();
                novel.chapter_order.push(ch_id.clone());
                novel.chapters.insert(
                    ch_id,
                    Chapter {
                        title: non_empty_text(&tree, node, "Title"),
                        scene_ids,
                    },
                );
            }
        }

        debug!(
            path = %self.path.display(),
            chapters = novel.chapter_order.len(),
            scenes = novel.scenes.len(),
            "Project read"
        );
        Ok(novel)
    }

    fn write(&self, novel: &Novel) -> Result<()> {
        let mut tree = if self.path.is_file() {
            self.load_tree()?
        } else {
            new_project()
        };
        let root = tree.root();

        if let Some(title) = &novel.title {
            let project = tree.get_or_create_child(root, "PROJECT");
            tree.set_child_text(project, "Title", title.as_str());
        }

        let scenes = tree.get_or_create_child(root, "SCENES");
        let mut existing = index_by_id(&tree, scenes, "SCENE");
        for node in existing.values() {
            let keep = tree
                .child_text(*node, "ID")
                .is_some_and(|id| novel.scenes.contains_key(id.trim()));
            if !keep {
                tree.remove_child(scenes, *node);
            }
        }
        for sc_id in sorted_ids(novel.scenes.keys()) {
            let node = match existing.remove(sc_id) {
                Some(node) => node,
                None => {
                    let node = tree.append_child(scenes, "SCENE");
                    tree.set_child_text(node, "ID", sc_id.as_str());
                    node
                }
            };
            write_scene(&mut tree, node, &novel.scenes[sc_id]);
        }

        let chapters = tree.get_or_create_child(root, "CHAPTERS");
        let mut existing = index_by_id(&tree, chapters, "CHAPTER");
        let wanted: HashSet<&str> = novel.chapter_order.iter().map(String::as_str).collect();
        for (ch_id, node) in &existing {
            if !wanted.contains(ch_id.as_str()) {
                tree.remove_child(chapters, *node);
            }
        }
        for ch_id in &novel.chapter_order {
            let Some(chapter) = novel.chapters.get(ch_id) else {
                continue;
            };
            let node = match existing.remove(ch_id) {
                Some(node) => node,
                None => {
                    let node = tree.append_child(chapters, "CHAPTER");
                    tree.set_child_text(node, "ID", ch_id.as_str());
                    node
                }
            };
            write_chapter(&mut tree, node, chapter);
        }

        persist::write_with_backup(&self.path, &tree.serialize())?;
        info!(
            path = %self.path.display(),
            scenes = novel.scenes.len(),
            "Project written"
        );
        Ok(())
    }
}

fn new_project() -> XmlTree {
    let mut tree = XmlTree::new(ROOT);
    let root = tree.root();
    let project = tree.append_child(root, "PROJECT");
    tree.set_child_text(project, "Ver", FORMAT_VERSION);
    tree.append_child(root, "SCENES");
    tree.append_child(root, "CHAPTERS");
    tree
}

fn read_scene(tree: &XmlTree, node: NodeId) -> Scene {
    let day = parsed(tree, node, "Day");
    let hour = parsed(tree, node, "Hour");
    let minute = parsed(tree, node, "Minute");
    let has_offsets = day.is_some() || hour.is_some() || minute.is_some();
    // With both forms present, only the mode marker selects the specific date.
    let specific_mode =
        non_empty_text(tree, node, "SpecificDateMode").as_deref() == Some(SPECIFIC_MODE);
    let specific = non_empty_text(tree, node, "SpecificDateTime")
        .filter(|_| !has_offsets || specific_mode);

    let when = match specific {
        Some(stamp) => {
            let (date, time) = match stamp.split_once(' ') {
                Some((date, time)) => (date.to_string(), Some(time.trim().to_string())),
                None => (stamp.clone(), None),
            };
            if date == NULL_DATE {
                SceneDate::Historical
            } else {
                SceneDate::Absolute { date, time }
            }
        }
        None if has_offsets => SceneDate::Relative { day, hour, minute },
        None => SceneDate::Unspecified,
    };

    let field_type = tree
        .find_child(node, "Fields")
        .and_then(|fields| non_empty_text(tree, fields, "Field_SceneType"));
    let scene_type = match field_type.as_deref() {
        Some(NOTES_TYPE) => SceneType::Notes,
        Some(TODO_TYPE) => SceneType::Todo,
        _ if tree.child_text(node, "Unused").map(str::trim) == Some(UNUSED_MARK) => {
            SceneType::Unused
        }
        _ => SceneType::Normal,
    };

    Scene {
        title: verbatim_text(tree, node, "Title"),
        desc: verbatim_text(tree, node, "Desc"),
        when,
        lasts_days: parsed(tree, node, "LastsDays"),
        lasts_hours: parsed(tree, node, "LastsHours"),
        lasts_minutes: parsed(tree, node, "LastsMinutes"),
        scene_type,
        status: parsed(tree, node, "Status"),
    }
}

fn write_scene(tree: &mut XmlTree, node: NodeId, scene: &Scene) {
    set_or_remove(tree, node, "Title", scene.title.clone());
    set_or_remove(tree, node, "Desc", scene.desc.clone());
    if let Some(status) = scene.status {
        tree.set_child_text(node, "Status", status.to_string());
    }

    set_or_remove(
        tree,
        node,
        "Unused",
        (scene.scene_type == SceneType::Unused).then(|| UNUSED_MARK.to_string()),
    );
    let field_type = match scene.scene_type {
        SceneType::Notes => Some(NOTES_TYPE.to_string()),
        SceneType::Todo => Some(TODO_TYPE.to_string()),
        SceneType::Normal | SceneType::Unused => None,
    };
    match (field_type, tree.find_child(node, "Fields")) {
        (Some(value), fields) => {
            let fields = fields.unwrap_or_else(|| tree.append_child(node, "Fields"));
            tree.set_child_text(fields, "Field_SceneType", value);
        }
        (None, Some(fields)) => set_or_remove(tree, fields, "Field_SceneType", None),
        (None, None) => {}
    }

    let (specific, day, hour, minute) = match &scene.when {
        SceneDate::Absolute { date, time } => (
            Some(format!("{date} {}", time.as_deref().unwrap_or(NULL_TIME))),
            None,
            None,
            None,
        ),
        SceneDate::Historical => (Some(format!("{NULL_DATE} {NULL_TIME}")), None, None, None),
        SceneDate::Relative { day, hour, minute } => (
            None,
            day.map(|value| value.to_string()),
            hour.map(|value| value.to_string()),
            minute.map(|value| value.to_string()),
        ),
        SceneDate::Unspecified => (None, None, None, None),
    };
    let mode = specific.as_ref().map(|_| SPECIFIC_MODE.to_string());
    set_or_remove(tree, node, "SpecificDateTime", specific);
    set_or_remove(tree, node, "SpecificDateMode", mode);
    set_or_remove(tree, node, "Day", day);
    set_or_remove(tree, node, "Hour", hour);
    set_or_remove(tree, node, "Minute", minute);

    set_or_remove(tree, node, "LastsDays", scene.lasts_days.map(|v| v.to_string()));
    set_or_remove(tree, node, "LastsHours", scene.lasts_hours.map(|v| v.to_string()));
    set_or_remove(tree, node, "LastsMinutes", scene.lasts_minutes.map(|v| v.to_string()));
}

fn write_chapter(tree: &mut XmlTree, node: NodeId, chapter: &Chapter) {
    set_or_remove(tree, node, "Title", chapter.title.clone());
    if let Some(list) = tree.find_child(node, "Scenes") {
        tree.remove_child(node, list);
    }
    if !chapter.scene_ids.is_empty() {
        let list = tree.append_child(node, "Scenes");
        for sc_id in &chapter.scene_ids {
            let entry = tree.append_child(list, "ScID");
            tree.set_text(entry, sc_id.as_str());
        }
    }
}

fn set_or_remove(tree: &mut XmlTree, parent: NodeId, name: &str, value: Option<String>) {
    match value {
        Some(value) => {
            tree.set_child_text(parent, name, value);
        }
        None => {
            if let Some(child) = tree.find_child(parent, name) {
                tree.remove_child(parent, child);
            }
        }
    }
}

fn index_by_id(tree: &XmlTree, parent: NodeId, name: &str) -> HashMap<String, NodeId> {
    tree.children_named(parent, name)
        .filter_map(|node| {
            tree.child_text(node, "ID")
                .map(|id| (id.trim().to_string(), node))
        })
        .collect()
}

fn non_empty_text(tree: &XmlTree, parent: NodeId, name: &str) -> Option<String> {
    tree.child_text(parent, name)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

// Scene text keeps its surrounding whitespace so round trips are lossless.
fn verbatim_text(tree: &XmlTree, parent: NodeId, name: &str) -> Option<String> {
    tree.child_text(parent, name)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn parsed<T: std::str::FromStr>(tree: &XmlTree, parent: NodeId, name: &str) -> Option<T> {
    non_empty_text(tree, parent, name).and_then(|text| text.parse().ok())
}

/// Scene IDs in numeric order, non-numeric IDs last.
fn sorted_ids<'a>(ids: impl Iterator<Item = &'a String>) -> Vec<&'a String> {
    let mut ids: Vec<_> = ids.collect();
    ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.as_str()));
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PROJECT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<YWRITER7>
  <PROJECT>
    <Ver>7</Ver>
    <Title>Harbor</Title>
  </PROJECT>
  <CHARACTERS>
    <CHARACTER>
      <ID>1</ID>
      <Title>Ada</Title>
    </CHARACTER>
  </CHARACTERS>
  <SCENES>
    <SCENE>
      <ID>1</ID>
      <Title>Arrival</Title>
      <Desc><![CDATA[Ships & storms]]></Desc>
      <SpecificDateTime>2021-07-26 10:00:00</SpecificDateTime>
      <LastsHours>2</LastsHours>
      <Characters>
        <CharID>1</CharID>
      </Characters>
    </SCENE>
    <SCENE>
      <ID>2</ID>
      <Title>Later</Title>
      <Day>3</Day>
      <Hour>7</Hour>
    </SCENE>
    <SCENE>
      <ID>3</ID>
      <Title>Ideas</Title>
      <Fields>
        <Field_SceneType>1</Field_SceneType>
      </Fields>
    </SCENE>
    <SCENE>
      <ID>4</ID>
      <Unused>-1</Unused>
      <SpecificDateTime>0001-01-01 00:00:00</SpecificDateTime>
    </SCENE>
  </SCENES>
  <CHAPTERS>
    <CHAPTER>
      <ID>1</ID>
      <Title>One</Title>
      <Scenes>
        <ScID>1</ScID>
        <ScID>2</ScID>
        <ScID>3</ScID>
        <ScID>4</ScID>
      </Scenes>
    </CHAPTER>
  </CHAPTERS>
</YWRITER7>
"#;

    fn project_file(dir: &Path) -> Yw7File {
        let path = dir.join("harbor.yw7");
        fs::write(&path, PROJECT).unwrap();
        Yw7File::new(path)
    }

    #[test]
    fn test_read_maps_scene_fields() {
        let temp = tempdir().unwrap();
        let novel = project_file(temp.path()).read().unwrap();

        assert_eq!(novel.title.as_deref(), Some("Harbor"));
        assert_eq!(novel.chapters["1"].scene_ids, vec!["1", "2", "3", "4"]);

        let arrival = &novel.scenes["1"];
        assert_eq!(arrival.desc.as_deref(), Some("Ships & storms"));
        assert_eq!(
            arrival.when,
            SceneDate::Absolute {
                date: "2021-07-26".to_string(),
                time: Some("10:00:00".to_string()),
            }
        );
        assert_eq!(arrival.lasts_hours, Some(2));
        assert_eq!(
            novel.scenes["2"].when,
            SceneDate::Relative {
                day: Some(3),
                hour: Some(7),
                minute: None,
            }
        );
        assert_eq!(novel.scenes["3"].scene_type, SceneType::Notes);
        assert_eq!(novel.scenes["4"].scene_type, SceneType::Unused);
        assert_eq!(novel.scenes["4"].when, SceneDate::Historical);
    }

    #[test]
    fn test_write_patches_in_place() {
        let temp = tempdir().unwrap();
        let file = project_file(temp.path());
        let mut novel = file.read().unwrap();
        let later = novel.scenes.get_mut("2").unwrap();
        later.when = SceneDate::Absolute {
            date: "2021-08-01".to_string(),
            time: Some("09:30:00".to_string()),
        };
        later.lasts_minutes = Some(45);

        file.write(&novel).unwrap();

        let written = fs::read_to_string(file.path()).unwrap();
        assert!(written.contains("<CharID>1</CharID>"));
        assert!(written.contains("<Title>Ada</Title>"));
        assert!(!written.contains("<Day>"));
        assert!(written.contains("<SpecificDateTime>2021-08-01 09:30:00</SpecificDateTime>"));
        assert!(persist::backup_path(file.path()).exists());

        let reread = file.read().unwrap();
        assert_eq!(reread, novel);
    }

    #[test]
    fn test_write_creates_new_project() {
        let temp = tempdir().unwrap();
        let file = Yw7File::new(temp.path().join("fresh.yw7"));
        let mut novel = Novel::default();
        novel.chapter_order.push("1".to_string());
        novel.chapters.insert(
            "1".to_string(),
            Chapter {
                title: Some("Chapter 1".to_string()),
                scene_ids: vec!["2".to_string(), "1".to_string()],
            },
        );
        for id in ["1", "2"] {
            novel.scenes.insert(
                id.to_string(),
                Scene {
                    title: Some(format!("Scene {id}")),
                    status: Some(1),
                    ..Scene::default()
                },
            );
        }

        file.write(&novel).unwrap();

        assert_eq!(file.read().unwrap().chapters["1"].scene_ids, vec!["2", "1"]);
        assert!(!persist::backup_path(file.path()).exists());
    }

    #[test]
    fn test_date_mode_marker_selects_between_date_forms() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("modes.yw7");
        fs::write(
            &path,
            "<YWRITER7><SCENES>\
             <SCENE><ID>1</ID><SpecificDateTime>2021-07-26 10:00:00</SpecificDateTime>\
             <Day>2</Day><Hour>8</Hour></SCENE>\
             <SCENE><ID>2</ID><SpecificDateTime>2021-07-26 10:00:00</SpecificDateTime>\
             <SpecificDateMode>-1</SpecificDateMode><Day>2</Day></SCENE>\
             </SCENES></YWRITER7>",
        )
        .unwrap();
        let file = Yw7File::new(&path);

        let mut novel = file.read().unwrap();
        assert_eq!(
            novel.scenes["1"].when,
            SceneDate::Relative {
                day: Some(2),
                hour: Some(8),
                minute: None,
            }
        );
        assert!(matches!(novel.scenes["2"].when, SceneDate::Absolute { .. }));

        novel.scenes.get_mut("1").unwrap().when = SceneDate::Absolute {
            date: "2021-08-01".to_string(),
            time: None,
        };
        novel.scenes.get_mut("2").unwrap().when = SceneDate::Relative {
            day: Some(5),
            hour: None,
            minute: None,
        };
        file.write(&novel).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written.matches("<SpecificDateMode>-1</SpecificDateMode>").count(), 1);
        let reread = file.read().unwrap();
        assert_eq!(
            reread.scenes["1"].when,
            SceneDate::Absolute {
                date: "2021-08-01".to_string(),
                time: Some("00:00:00".to_string()),
            }
        );
        assert_eq!(reread.scenes["2"].when, novel.scenes["2"].when);
    }

    #[test]
    fn test_read_keeps_whitespace_in_scene_text() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("spaces.yw7");
        fs::write(
            &path,
            "<YWRITER7><SCENES><SCENE><ID> 1 </ID><Title>Dawn </Title>\
             <Desc>  indented line\nsecond\n</Desc></SCENE></SCENES></YWRITER7>",
        )
        .unwrap();

        let novel = Yw7File::new(path).read().unwrap();

        assert_eq!(novel.scenes["1"].title.as_deref(), Some("Dawn "));
        assert_eq!(novel.scenes["1"].desc.as_deref(), Some("  indented line\nsecond\n"));
    }

    #[test]
    fn test_read_rejects_other_documents() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("odd.yw7");
        fs::write(&path, "<timeline />").unwrap();

        let err = Yw7File::new(path).read().unwrap_err();
        assert!(matches!(err, SyncError::Parse { .. }));
    }
}
