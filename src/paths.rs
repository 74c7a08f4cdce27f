use std::path::PathBuf;

/// File naming under the data root. Writers create parent directories
/// themselves, so nothing here touches the filesystem.
#[derive(Debug, Clone)]
pub(crate) struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn raw_videos_dir(&self) -> PathBuf {
        self.root.join("raw_videos")
    }

    pub(crate) fn raw_video(&self, video_id: &str, ext: &str) -> PathBuf {
        self.raw_videos_dir().join(format!("{video_id}{ext}"))
    }

    pub(crate) fn frames_dir(&self, video_id: &str) -> PathBuf {
        self.root.join("frames").join(video_id)
    }

    pub(crate) fn frame(&self, video_id: &str, frame_index: u32) -> PathBuf {
        self.frames_dir(video_id)
            .join(format!("{video_id}_f{frame_index:05}.png"))
    }

    pub(crate) fn manifest(&self, video_id: &str) -> PathBuf {
        self.root
            .join("manifests")
            .join(format!("{video_id}_frames_manifest.jsonl"))
    }

    pub(crate) fn analysis(&self, video_id: &str) -> PathBuf {
        self.root
            .join("analysis")
            .join(format!("{video_id}_analysis.jsonl"))
    }

    pub(crate) fn bestshots_dir(&self, video_id: &str) -> PathBuf {
        self.root.join("bestshots").join(video_id)
    }

    /// `ext` includes the leading dot, or is empty.
    pub(crate) fn bestshot_image(&self, video_id: &str, rank: u32, ext: &str) -> PathBuf {
        self.bestshots_dir(video_id)
            .join(format!("{video_id}_best_{rank:02}{ext}"))
    }

    pub(crate) fn bestshot_meta(&self, video_id: &str) -> PathBuf {
        self.bestshots_dir(video_id)
            .join(format!("{video_id}_bestshots.json"))
    }

    pub(crate) fn diary(&self, video_id: &str) -> PathBuf {
        self.root.join("diary").join(format!("{video_id}_diary.md"))
    }

    pub(crate) fn alerts(&self, video_id: &str) -> PathBuf {
        self.root
            .join("alerts")
            .join(format!("{video_id}_alerts.jsonl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_zero_padded() {
        let layout = DataLayout::new("out");
        assert_eq!(
            layout.frame("v1", 7),
            PathBuf::from("out/frames/v1/v1_f00007.png")
        );
        assert_eq!(
            layout.bestshot_image("v1", 2, ".jpg"),
            PathBuf::from("out/bestshots/v1/v1_best_02.jpg")
        );
        assert_eq!(
            layout.analysis("v1"),
            PathBuf::from("out/analysis/v1_analysis.jsonl")
        );
    }
}
