use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::novel::NovelFile;
use crate::timeline::{TIMELINE_EXTENSION, TimelineDocument};
use crate::yw7::{YW7_EXTENSION, Yw7File};

pub type SyncProgressCallback = Arc<dyn Fn(SyncProgressEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone, Serialize)]
pub struct SyncProgressEvent {
    pub kind: SyncProgressEventKind,
    pub stage: Option<String>,
    pub elapsed_ms: f64,
    pub stage_elapsed_ms: Option<f64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncProgressEventKind {
    Begin,
    End,
    Note,
}

/// What a conversion run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// New novel project bootstrapped from a timeline.
    CreateNovel,
    /// Existing novel project updated from its timeline.
    ImportToNovel,
    /// Timeline created or updated from a novel project.
    ExportToTimeline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub direction: SyncDirection,
    /// The file that was written.
    pub output: PathBuf,
    pub scenes: usize,
}

struct ProgressReporter {
    run_start: Instant,
    stage_start: Instant,
    current_stage: Option<String>,
    callback: Option<SyncProgressCallback>,
}

impl ProgressReporter {
    fn new(callback: Option<SyncProgressCallback>) -> Self {
        let now = Instant::now();
        Self {
            run_start: now,
            stage_start: now,
            current_stage: None,
            callback,
        }
    }

    fn begin(&mut self, name: &str) {
        self.stage_start = Instant::now();
        self.current_stage = Some(name.to_string());
        self.emit(
            SyncProgressEventKind::Begin,
            None,
            format!("Starting {name}"),
        );
    }

    fn end(&mut self) {
        let stage_elapsed = elapsed_ms(self.stage_start);
        let name = self.current_stage.clone().unwrap_or_default();
        info!(stage = %name, elapsed_ms = stage_elapsed, "Stage finished");
        self.emit(
            SyncProgressEventKind::End,
            Some(stage_elapsed),
            format!("Finished {name} ({stage_elapsed:.3} ms)"),
        );
        self.current_stage = None;
    }

    fn note(&self, message: impl Into<String>) {
        let text = message.into();
        info!("{text}");
        self.emit(
            SyncProgressEventKind::Note,
            Some(elapsed_ms(self.stage_start)),
            text,
        );
    }

    fn emit(&self, kind: SyncProgressEventKind, stage_elapsed_ms: Option<f64>, message: String) {
        if let Some(callback) = &self.callback {
            callback(SyncProgressEvent {
                kind,
                stage: self.current_stage.clone(),
                elapsed_ms: elapsed_ms(self.run_start),
                stage_elapsed_ms,
                message: Some(message),
            });
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1_000.0
}

/// Synchronizes a timeline with the novel project of the same name.
#[derive(Clone)]
pub struct SyncConverter {
    settings: SyncSettings,
    callback: Option<SyncProgressCallback>,
}

impl SyncConverter {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            callback: None,
        }
    }

    pub fn with_progress(mut self, callback: SyncProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Convert `source` into the other format, chosen by its extension.
    ///
    /// A `.timeline` source updates the sibling `.yw7` project, or creates it
    /// when missing. A `.yw7` source updates or creates the sibling timeline.
    /// Both documents are fully read before anything is written.
    pub fn run(&self, source: &Path) -> Result<SyncOutcome> {
        if !source.is_file() {
            return Err(SyncError::NotFound(source.to_path_buf()));
        }
        let mut progress = ProgressReporter::new(self.callback.clone());

        let outcome = match extension_of(source).as_deref() {
            Some(TIMELINE_EXTENSION) => {
                let project = source.with_extension(YW7_EXTENSION);
                if project.is_file() {
                    self.import_to_novel(source, &project, &mut progress)?
                } else {
                    self.create_novel(source, &project, &mut progress)?
                }
            }
            Some(YW7_EXTENSION) => {
                let timeline = source.with_extension(TIMELINE_EXTENSION);
                self.export_to_timeline(source, &timeline, &mut progress)?
            }
            _ => return Err(SyncError::UnsupportedType(source.to_path_buf())),
        };

        progress.note(format!("File written: \"{}\"", outcome.output.display()));
        Ok(outcome)
    }

    fn create_novel(
        &self,
        source: &Path,
        target: &Path,
        progress: &mut ProgressReporter,
    ) -> Result<SyncOutcome> {
        progress.begin("Read timeline");
        let mut timeline = TimelineDocument::new(source, self.settings.clone());
        timeline.read(None)?;
        progress.note(format!(
            "{} scenes found in \"{}\"",
            timeline.events.len(),
            source.display()
        ));
        progress.end();

        progress.begin("Create project");
        let novel = timeline.to_novel();
        Yw7File::new(target).write(&novel)?;
        progress.end();

        Ok(SyncOutcome {
            direction: SyncDirection::CreateNovel,
            output: target.to_path_buf(),
            scenes: novel.scenes.len(),
        })
    }

    fn import_to_novel(
        &self,
        source: &Path,
        target: &Path,
        progress: &mut ProgressReporter,
    ) -> Result<SyncOutcome> {
        progress.begin("Read project");
        let project = Yw7File::new(target);
        let mut novel = project.read()?;
        progress.end();

        progress.begin("Read timeline");
        let mut timeline = TimelineDocument::new(source, self.settings.clone());
        timeline.read(Some(&novel))?;
        progress.end();

        progress.begin("Update project");
        let scenes = if novel.scenes.is_empty() {
            let outline = timeline.to_novel();
            novel.chapter_order = outline.chapter_order;
            novel.chapters = outline.chapters;
            novel.scenes = outline.scenes;
            novel.scenes.len()
        } else {
            let updated = timeline.apply_to(&mut novel);
            let skipped = timeline.events.len() - updated;
            if skipped > 0 {
                warn!(skipped, "Timeline events without a matching scene were skipped");
            }
            updated
        };
        project.write(&novel)?;
        progress.end();

        Ok(SyncOutcome {
            direction: SyncDirection::ImportToNovel,
            output: target.to_path_buf(),
            scenes,
        })
    }

    fn export_to_timeline(
        &self,
        source: &Path,
        target: &Path,
        progress: &mut ProgressReporter,
    ) -> Result<SyncOutcome> {
        progress.begin("Read project");
        let novel = Yw7File::new(source).read()?;
        progress.end();

        progress.begin("Update timeline");
        let mut timeline = TimelineDocument::new(target, self.settings.clone());
        timeline.merge(&novel)?;
        timeline.write()?;
        progress.end();

        Ok(SyncOutcome {
            direction: SyncDirection::ExportToTimeline,
            output: target.to_path_buf(),
            scenes: timeline.exported_scene_ids().len(),
        })
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
}

/// Relative age of a timeline compared to its novel project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Freshness {
    TimelineNewer,
    TimelineOlder,
    Unchanged,
    TimelineMissing,
}

#[derive(Debug, Clone)]
pub struct FreshnessReport {
    pub project: PathBuf,
    pub timeline: PathBuf,
    pub freshness: Freshness,
    pub timeline_modified: Option<DateTime<Local>>,
}

/// Compare the modification time of `project` with its sibling timeline.
pub fn compare_timestamps(project: &Path) -> Result<FreshnessReport> {
    let project_modified = modified(project)?;
    let timeline = project.with_extension(TIMELINE_EXTENSION);
    if !timeline.is_file() {
        return Ok(FreshnessReport {
            project: project.to_path_buf(),
            timeline,
            freshness: Freshness::TimelineMissing,
            timeline_modified: None,
        });
    }

    let timeline_modified = modified(&timeline)?;
    let freshness = match timeline_modified.cmp(&project_modified) {
        std::cmp::Ordering::Greater => Freshness::TimelineNewer,
        std::cmp::Ordering::Less => Freshness::TimelineOlder,
        std::cmp::Ordering::Equal => Freshness::Unchanged,
    };
    Ok(FreshnessReport {
        project: project.to_path_buf(),
        timeline,
        freshness,
        timeline_modified: Some(DateTime::<Local>::from(timeline_modified)),
    })
}

fn modified(path: &Path) -> Result<SystemTime> {
    if !path.is_file() {
        return Err(SyncError::NotFound(path.to_path_buf()));
    }
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|err| SyncError::read(path, err))
}
