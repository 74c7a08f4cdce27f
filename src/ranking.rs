//! Best-shot selection: score every annotation, keep the top `max_k`, copy
//! their images next to a JSON summary.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::paths::DataLayout;
use crate::schema::{AnnotationRecord, BestShotRecord};
use crate::store::{self, StoreError};

/// Scoring policy for best-shot ranking. Higher is better.
pub(crate) trait ShotScorer {
    fn score(&self, annotation: &AnnotationRecord) -> f64;
}

/// `cuteness` if the model gave one, else the mean of all scores, else 0.5.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DefaultScorer;

impl ShotScorer for DefaultScorer {
    fn score(&self, annotation: &AnnotationRecord) -> f64 {
        if let Some(cuteness) = annotation.scores.get("cuteness") {
            return *cuteness;
        }
        if annotation.scores.is_empty() {
            return 0.5;
        }
        annotation.scores.values().sum::<f64>() / annotation.scores.len() as f64
    }
}

/// The `max_k` best annotations with their scores, best first. Equal scores
/// keep their temporal order.
pub(crate) fn rank<'a>(
    annotations: &'a [AnnotationRecord],
    scorer: &dyn ShotScorer,
    max_k: usize,
) -> Vec<(&'a AnnotationRecord, f64)> {
    let mut scored: Vec<_> = annotations.iter().map(|a| (a, scorer.score(a))).collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(max_k);
    scored
}

/// Ranks `annotations`, copies each selected frame to the best-shot folder
/// and writes the metadata file.
///
/// A frame whose image cannot be copied is logged and left out; the frames
/// that made it keep contiguous ranks starting at 1.
pub(crate) fn select_best(
    video_id: &str,
    annotations: &[AnnotationRecord],
    max_k: usize,
    scorer: &dyn ShotScorer,
    layout: &DataLayout,
) -> Result<Vec<BestShotRecord>, StoreError> {
    if annotations.is_empty() {
        return Ok(Vec::new());
    }

    let dest_dir = layout.bestshots_dir(video_id);
    fs::create_dir_all(&dest_dir).map_err(|source| StoreError::Io {
        path: dest_dir.clone(),
        source,
    })?;
    remove_previous_images(video_id, &dest_dir)?;

    let mut shots = Vec::new();
    for (annotation, score) in rank(annotations, scorer, max_k) {
        let rank = shots.len() as u32 + 1;
        let source = Path::new(&annotation.frame_path);
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let dest = layout.bestshot_image(video_id, rank, &ext);

        if let Err(e) = fs::copy(source, &dest) {
            warn!(
                frame = %annotation.frame_path,
                frame_index = annotation.frame_index,
                "skipping best shot, copy failed: {e}"
            );
            continue;
        }

        shots.push(BestShotRecord {
            video_id: annotation.video_id.clone(),
            frame_index: annotation.frame_index,
            rank,
            score,
            frame_path: dest.to_string_lossy().into_owned(),
            source_path: annotation.frame_path.clone(),
            caption: annotation.caption.clone(),
        });
    }

    let meta = layout.bestshot_meta(video_id);
    store::write_json_pretty(&meta, &shots)?;
    info!(video_id, count = shots.len(), path = %meta.display(), "wrote best shots");
    Ok(shots)
}

/// Deletes `{video_id}_best_NN.*` images left by an earlier selection.
fn remove_previous_images(video_id: &str, dir: &Path) -> Result<(), StoreError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StoreError::Io { path, source }
    };
    let prefix = format!("{video_id}_best_");

    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        let is_rank_image = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(&prefix))
            .is_some_and(is_rank_suffix);
        if is_rank_image && path.is_file() {
            fs::remove_file(&path).map_err(io_err(&path))?;
        }
    }
    Ok(())
}

/// `02.png`, `13`: a rank number, optionally followed by an extension.
fn is_rank_suffix(rest: &str) -> bool {
    let (digits, ext) = rest.split_once('.').unwrap_or((rest, ""));
    digits.len() >= 2
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !ext.contains('.')
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::geometry::GridSpec;
    use crate::schema::tests::frame;
    use crate::schema::VisionFields;

    fn annotation(index: u32, path: &str, scores: &[(&str, f64)]) -> AnnotationRecord {
        AnnotationRecord::new(
            &frame(index, path),
            VisionFields {
                caption: format!("frame {index}"),
                scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                ..Default::default()
            },
            &GridSpec::default(),
            BTreeMap::new(),
        )
    }

    fn cute(values: &[f64]) -> Vec<AnnotationRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| annotation(i as u32, &format!("f{i}.png"), &[("cuteness", *v)]))
            .collect()
    }

    #[test]
    fn default_scorer_policy() {
        let scorer = DefaultScorer;
        assert_eq!(scorer.score(&annotation(0, "a", &[("cuteness", 0.3), ("x", 1.0)])), 0.3);
        assert_eq!(scorer.score(&annotation(0, "a", &[("a", 0.25), ("b", 0.5)])), 0.375);
        assert_eq!(scorer.score(&annotation(0, "a", &[])), 0.5);
    }

    #[test]
    fn ties_keep_temporal_order() {
        let annotations = cute(&[0.9, 0.1, 0.9, 0.4, 0.2]);
        let top = rank(&annotations, &DefaultScorer, 2);
        let picked: Vec<_> = top.iter().map(|(a, _)| a.frame_index).collect();
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn max_k_larger_than_input() {
        let annotations = cute(&[0.2, 0.8]);
        let top = rank(&annotations, &DefaultScorer, 10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0.frame_index, 1);
    }

    struct ByIndex;

    impl ShotScorer for ByIndex {
        fn score(&self, annotation: &AnnotationRecord) -> f64 {
            annotation.frame_index as f64
        }
    }

    #[test]
    fn scorer_is_swappable() {
        let annotations = cute(&[0.9, 0.1, 0.9]);
        let top = rank(&annotations, &ByIndex, 1);
        assert_eq!(top[0].0.frame_index, 2);
    }

    #[test]
    fn empty_input_selects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let shots = select_best("vid", &[], 3, &DefaultScorer, &layout).unwrap();
        assert!(shots.is_empty());
        assert!(!layout.bestshot_meta("vid").exists());
    }

    #[test]
    fn copies_images_and_writes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("out"));
        let mut annotations = Vec::new();
        for (i, score) in [0.9, 0.1, 0.9, 0.4, 0.2].into_iter().enumerate() {
            let path = dir.path().join(format!("f{i}.png"));
            fs::write(&path, format!("image {i}")).unwrap();
            annotations.push(annotation(i as u32, path.to_str().unwrap(), &[("cuteness", score)]));
        }

        let shots = select_best("vid", &annotations, 2, &DefaultScorer, &layout).unwrap();
        assert_eq!(shots.len(), 2);
        assert_eq!((shots[0].rank, shots[0].frame_index), (1, 0));
        assert_eq!((shots[1].rank, shots[1].frame_index), (2, 2));
        assert_eq!(shots[1].caption, "frame 2");

        let copied = layout.bestshot_image("vid", 2, ".png");
        assert_eq!(fs::read_to_string(copied).unwrap(), "image 2");

        let meta: Vec<BestShotRecord> =
            serde_json::from_str(&fs::read_to_string(layout.bestshot_meta("vid")).unwrap())
                .unwrap();
        assert_eq!(meta, shots);
    }

    #[test]
    fn rerun_with_fewer_shots_removes_stale_images() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("out"));
        let mut annotations = Vec::new();
        for (i, score) in [0.9, 0.8, 0.7].into_iter().enumerate() {
            let path = dir.path().join(format!("f{i}.png"));
            fs::write(&path, format!("image {i}")).unwrap();
            annotations.push(annotation(i as u32, path.to_str().unwrap(), &[("cuteness", score)]));
        }
        assert_eq!(select_best("vid", &annotations, 3, &DefaultScorer, &layout).unwrap().len(), 3);
        assert!(layout.bestshot_image("vid", 3, ".png").exists());

        let other = layout.bestshots_dir("vid").join("cover.png");
        fs::write(&other, "kept").unwrap();

        let shots = select_best("vid", &annotations, 1, &DefaultScorer, &layout).unwrap();
        assert_eq!(shots.len(), 1);
        assert!(layout.bestshot_image("vid", 1, ".png").exists());
        assert!(!layout.bestshot_image("vid", 2, ".png").exists());
        assert!(!layout.bestshot_image("vid", 3, ".png").exists());
        assert!(layout.bestshot_meta("vid").exists());
        assert!(other.exists());
    }

    #[test]
    fn rank_suffixes() {
        assert!(is_rank_suffix("01.png"));
        assert!(is_rank_suffix("12"));
        assert!(!is_rank_suffix("bestshots.json"));
        assert!(!is_rank_suffix("1.png"));
        assert!(!is_rank_suffix("01.png.bak"));
    }

    #[test]
    fn missing_image_is_skipped_and_ranks_stay_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("out"));
        let present = dir.path().join("f1.png");
        fs::write(&present, "ok").unwrap();

        let annotations = vec![
            annotation(0, dir.path().join("gone.png").to_str().unwrap(), &[("cuteness", 0.9)]),
            annotation(1, present.to_str().unwrap(), &[("cuteness", 0.5)]),
        ];
        let shots = select_best("vid", &annotations, 2, &DefaultScorer, &layout).unwrap();
        assert_eq!(shots.len(), 1);
        assert_eq!((shots[0].rank, shots[0].frame_index), (1, 1));
    }
}
