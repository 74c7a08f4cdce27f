//! Per-video stages. Each stage reads what the previous one wrote under the
//! data root; a stage that finds no input logs a notice and produces nothing,
//! so later stages degrade the same way.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::ai::{self, TextModel, VisionModel};
use crate::alerts::{self, AlertRule, KeywordRule};
use crate::config::{ModelRegistry, Settings, DIARY_ROLE, VISION_ROLE};
use crate::diary;
use crate::normalize;
use crate::paths::DataLayout;
use crate::preprocess;
use crate::ranking::{self, DefaultScorer, ShotScorer};
use crate::schema::{AlertEvent, AlertLevel, AnnotationRecord, BestShotRecord, FrameRecord};
use crate::store;

pub(crate) struct Pipeline {
    settings: Settings,
    layout: DataLayout,
    vision: VisionModel,
    text: TextModel,
    scorer: Box<dyn ShotScorer>,
    alert_rules: Vec<Box<dyn AlertRule>>,
}

/// Frame statistics from a manifest.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ManifestSummary {
    pub frames: usize,
    pub time_range: Option<(f64, f64)>,
    pub too_dark: usize,
    pub blurry: usize,
}

/// Timestamp-based id such as `20240501_093000_video`.
pub(crate) fn generate_video_id() -> String {
    format!("{}_video", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

impl Pipeline {
    pub(crate) fn new(settings: Settings, models: &ModelRegistry) -> Self {
        let layout = DataLayout::new(&settings.data_root);
        let alert_rules: Vec<Box<dyn AlertRule>> = vec![Box::new(KeywordRule::new(
            settings.alerts.keywords.clone(),
            AlertLevel::Warning,
        ))];
        Self {
            layout,
            vision: VisionModel::from_resolved(&models.for_role(VISION_ROLE)),
            text: TextModel::from_resolved(&models.for_role(DIARY_ROLE)),
            scorer: Box::new(DefaultScorer),
            alert_rules,
            settings,
        }
    }

    /// Copies a video into `raw_videos/` and returns its id.
    pub(crate) fn import_video(&self, src: &Path, video_id: Option<String>) -> anyhow::Result<String> {
        if !src.is_file() {
            anyhow::bail!("Video not found: {}", src.display());
        }
        let video_id = video_id.unwrap_or_else(generate_video_id);
        let ext = src
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".mp4".to_owned());
        let dest = self.layout.raw_video(&video_id, &ext);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, &dest)?;
        info!(video_id = %video_id, path = %dest.display(), "imported video");
        Ok(video_id)
    }

    /// Samples, preprocesses and records the frames of an imported video.
    #[cfg(feature = "ffmpeg")]
    pub(crate) fn extract_frames(&self, video_id: &str) -> anyhow::Result<Vec<FrameRecord>> {
        let video = self.find_raw_video(video_id)?;
        let frames = crate::capture::capture_frames(
            &video,
            video_id,
            self.settings.frame_interval_sec,
            &self.layout,
        )?;
        let frames = preprocess::preprocess_frames(frames, &self.settings.preprocess);
        self.build_manifest(video_id, &frames)?;
        Ok(frames)
    }

    #[cfg(not(feature = "ffmpeg"))]
    pub(crate) fn extract_frames(&self, _video_id: &str) -> anyhow::Result<Vec<FrameRecord>> {
        anyhow::bail!("frame extraction needs a build with the `ffmpeg` feature")
    }

    #[cfg(feature = "ffmpeg")]
    fn find_raw_video(&self, video_id: &str) -> anyhow::Result<std::path::PathBuf> {
        let dir = self.layout.raw_videos_dir();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.file_stem().is_some_and(|stem| stem == video_id) {
                return Ok(path);
            }
        }
        anyhow::bail!("Video not found: {video_id} in {}", dir.display())
    }

    pub(crate) fn build_manifest(&self, video_id: &str, frames: &[FrameRecord]) -> anyhow::Result<()> {
        let path = self.layout.manifest(video_id);
        store::write_jsonl(&path, frames)?;
        info!(video_id, count = frames.len(), path = %path.display(), "wrote manifest");
        Ok(())
    }

    /// Re-runs the quality checks on the frames already in the manifest.
    pub(crate) fn preprocess_manifest(&self, video_id: &str) -> anyhow::Result<Vec<FrameRecord>> {
        let manifest = self.layout.manifest(video_id);
        let frames: Vec<FrameRecord> = store::read_jsonl(&manifest)?;
        if frames.is_empty() {
            info!(path = %manifest.display(), "No frames found in manifest");
            return Ok(Vec::new());
        }
        let frames = preprocess::preprocess_frames(frames, &self.settings.preprocess);
        self.build_manifest(video_id, &frames)?;
        Ok(frames)
    }

    pub(crate) fn summarize_manifest(&self, video_id: &str) -> anyhow::Result<ManifestSummary> {
        let frames: Vec<FrameRecord> = store::read_jsonl(&self.layout.manifest(video_id))?;
        let time_range = frames.iter().map(|f| f.time_sec).fold(None, |range, t| match range {
            None => Some((t, t)),
            Some((lo, hi)) => Some((f64::min(lo, t), f64::max(hi, t))),
        });
        Ok(ManifestSummary {
            frames: frames.len(),
            time_range,
            too_dark: frames.iter().filter(|f| f.is_too_dark).count(),
            blurry: frames.iter().filter(|f| f.is_blurry).count(),
        })
    }

    /// Asks the vision model about every frame in the manifest and writes the
    /// analysis file.
    pub(crate) async fn run_captioning(&self, video_id: &str) -> anyhow::Result<Vec<AnnotationRecord>> {
        let manifest = self.layout.manifest(video_id);
        let frames: Vec<FrameRecord> = store::read_jsonl(&manifest)?;
        if frames.is_empty() {
            info!(path = %manifest.display(), "No frames found in manifest");
            return Ok(Vec::new());
        }

        let prompt = ai::vision_caption_prompt();
        let mut analyses = Vec::with_capacity(frames.len());
        for frame in &frames {
            let raw = self.vision.describe(&prompt, Path::new(&frame.frame_path)).await;
            analyses.push(normalize::normalize(frame, &raw, &self.settings.grid));
        }

        let path = self.layout.analysis(video_id);
        store::write_jsonl(&path, &analyses)?;
        info!(video_id, count = analyses.len(), path = %path.display(), "wrote analysis");
        Ok(analyses)
    }

    fn load_analysis(&self, video_id: &str) -> anyhow::Result<Vec<AnnotationRecord>> {
        let path = self.layout.analysis(video_id);
        let mut analyses: Vec<AnnotationRecord> = store::read_jsonl(&path)?;
        for analysis in &mut analyses {
            let old_label = analysis.grid_label().map(str::to_owned);
            if analysis.relocate(&self.settings.grid) {
                warn!(
                    frame = %analysis.frame_path,
                    stored = ?old_label,
                    located = ?analysis.grid_label(),
                    "Stored placement disagrees with the grid; recomputed"
                );
            }
        }
        if analyses.is_empty() {
            info!(path = %path.display(), "No analysis found");
        }
        Ok(analyses)
    }

    pub(crate) fn select_bestshots(&self, video_id: &str) -> anyhow::Result<Vec<BestShotRecord>> {
        let analyses = self.load_analysis(video_id)?;
        Ok(ranking::select_best(
            video_id,
            &analyses,
            self.settings.max_bestshots,
            self.scorer.as_ref(),
            &self.layout,
        )?)
    }

    /// Writes the diary markdown and returns its text; empty when there is no
    /// analysis.
    pub(crate) async fn generate_diary(&self, video_id: &str) -> anyhow::Result<String> {
        let analyses = self.load_analysis(video_id)?;
        if analyses.is_empty() {
            return Ok(String::new());
        }
        let captions: Vec<String> = analyses.into_iter().map(|a| a.caption).collect();
        let text = diary::synthesize(
            &captions,
            self.settings.diary.max_chars,
            &self.settings.diary.language,
            &self.text,
        )
        .await;

        let path = self.layout.diary(video_id);
        store::write_text(&path, &text)?;
        info!(video_id, path = %path.display(), "Wrote diary markdown");
        Ok(text)
    }

    pub(crate) fn detect_alerts(&self, video_id: &str) -> anyhow::Result<Vec<AlertEvent>> {
        let analyses = self.load_analysis(video_id)?;
        if analyses.is_empty() {
            return Ok(Vec::new());
        }
        let events = alerts::detect(&analyses, &self.alert_rules);
        let path = self.layout.alerts(video_id);
        store::write_jsonl(&path, &events)?;
        info!(video_id, count = events.len(), path = %path.display(), "wrote alerts");
        Ok(events)
    }
}
