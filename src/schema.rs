//! Records persisted per video: sampled frames, frame annotations, best shots
//! and alert events.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geometry::{self, GridCell, GridSpec};

/// A sampled frame before it has been shown to the vision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FrameRecord {
    pub video_id: String,
    pub frame_index: u32,
    pub time_sec: f64,
    pub frame_path: String,
    #[serde(default)]
    pub is_blurry: bool,
    #[serde(default)]
    pub is_too_dark: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InvalidBBox(pub String);

impl fmt::Display for InvalidBBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid bbox: {}", self.0)
    }
}

impl std::error::Error for InvalidBBox {}

/// Bounding box normalized to the image size, stored as
/// `[x_min, y_min, x_max, y_max]`.
///
/// Every coordinate is finite and within `[0, 1]`; the only way to build one
/// is through [`BBox::new`], so the grid mapper never sees an invalid box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 4]")]
pub(crate) struct BBox {
    x_min: f64,
    y_min: f64,
    x_max: f64,
    y_max: f64,
}

impl BBox {
    pub(crate) fn new(coords: [f64; 4]) -> Result<Self, InvalidBBox> {
        if let Some(bad) = coords
            .iter()
            .find(|c| !c.is_finite() || !(0.0..=1.0).contains(*c))
        {
            return Err(InvalidBBox(format!(
                "coordinate {bad} outside [0, 1] in {coords:?}"
            )));
        }
        let [x_min, y_min, x_max, y_max] = coords;
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    pub(crate) fn center(&self) -> (f64, f64) {
        (
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    pub(crate) fn coords(&self) -> [f64; 4] {
        [self.x_min, self.y_min, self.x_max, self.y_max]
    }
}

impl TryFrom<Vec<f64>> for BBox {
    type Error = InvalidBBox;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        let coords: [f64; 4] = value
            .as_slice()
            .try_into()
            .map_err(|_| InvalidBBox(format!("expected 4 coordinates, got {}", value.len())))?;
        Self::new(coords)
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        bbox.coords()
    }
}

/// A located subject: the box and the grid cell its center falls in.
///
/// Kept together so a record can never carry a box without a cell or the
/// other way round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Placement {
    pub bbox: BBox,
    pub grid_row: u32,
    pub grid_col: u32,
    pub grid_label: String,
}

impl Placement {
    pub(crate) fn locate(bbox: BBox, grid: &GridSpec) -> Self {
        let GridCell { row, col, label } = geometry::map_to_grid(&bbox, grid.rows, grid.cols);
        Self {
            bbox,
            grid_row: row,
            grid_col: col,
            grid_label: label,
        }
    }
}

/// What the vision model told us about one frame, already coerced to the
/// expected types.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct VisionFields {
    pub caption: String,
    pub tags: Vec<String>,
    pub scores: BTreeMap<String, f64>,
    pub has_child: bool,
    pub num_children: u32,
    pub main_subject: String,
    pub bbox: Option<BBox>,
}

/// One analysed frame; one line of `analysis/{video_id}_analysis.jsonl`.
///
/// On disk the placement is four flat nullable fields. A line must carry
/// either all of them or none, and the label must name its row and column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredAnnotation", into = "StoredAnnotation")]
pub(crate) struct AnnotationRecord {
    pub video_id: String,
    pub frame_index: u32,
    pub time_sec: f64,
    pub frame_path: String,

    pub caption: String,
    pub tags: Vec<String>,
    pub scores: BTreeMap<String, f64>,

    pub has_child: bool,
    pub num_children: u32,
    pub main_subject: String,

    pub placement: Option<Placement>,

    pub flags: BTreeMap<String, bool>,

    /// Diagnostic passthrough, e.g. the raw model response.
    pub extra: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct StoredAnnotation {
    video_id: String,
    frame_index: u32,
    time_sec: f64,
    frame_path: String,
    caption: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    scores: BTreeMap<String, f64>,
    #[serde(default)]
    has_child: bool,
    #[serde(default)]
    num_children: u32,
    #[serde(default)]
    main_subject: String,
    #[serde(default)]
    bbox: Option<BBox>,
    #[serde(default)]
    grid_row: Option<u32>,
    #[serde(default)]
    grid_col: Option<u32>,
    #[serde(default)]
    grid_label: Option<String>,
    #[serde(default)]
    flags: BTreeMap<String, bool>,
    #[serde(default)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InvalidPlacement(String);

impl fmt::Display for InvalidPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid placement: {}", self.0)
    }
}

impl std::error::Error for InvalidPlacement {}

impl TryFrom<StoredAnnotation> for AnnotationRecord {
    type Error = InvalidPlacement;

    fn try_from(s: StoredAnnotation) -> Result<Self, Self::Error> {
        let placement = match (s.bbox, s.grid_row, s.grid_col, s.grid_label) {
            (None, None, None, None) => None,
            (Some(bbox), Some(grid_row), Some(grid_col), Some(grid_label)) => {
                let expected = geometry::cell_label(grid_row, grid_col);
                if grid_label != expected {
                    return Err(InvalidPlacement(format!(
                        "grid_label {grid_label} does not match row {grid_row} col {grid_col} ({expected})"
                    )));
                }
                Some(Placement {
                    bbox,
                    grid_row,
                    grid_col,
                    grid_label,
                })
            }
            (bbox, ..) => {
                return Err(InvalidPlacement(if bbox.is_some() {
                    "bbox without a grid cell".to_owned()
                } else {
                    "grid cell without a bbox".to_owned()
                }))
            }
        };
        Ok(Self {
            video_id: s.video_id,
            frame_index: s.frame_index,
            time_sec: s.time_sec,
            frame_path: s.frame_path,
            caption: s.caption,
            tags: s.tags,
            scores: s.scores,
            has_child: s.has_child,
            num_children: s.num_children,
            main_subject: s.main_subject,
            placement,
            flags: s.flags,
            extra: s.extra,
        })
    }
}

impl From<AnnotationRecord> for StoredAnnotation {
    fn from(r: AnnotationRecord) -> Self {
        let (bbox, grid_row, grid_col, grid_label) = match r.placement {
            Some(p) => (Some(p.bbox), Some(p.grid_row), Some(p.grid_col), Some(p.grid_label)),
            None => (None, None, None, None),
        };
        Self {
            video_id: r.video_id,
            frame_index: r.frame_index,
            time_sec: r.time_sec,
            frame_path: r.frame_path,
            caption: r.caption,
            tags: r.tags,
            scores: r.scores,
            has_child: r.has_child,
            num_children: r.num_children,
            main_subject: r.main_subject,
            bbox,
            grid_row,
            grid_col,
            grid_label,
            flags: r.flags,
            extra: r.extra,
        }
    }
}

impl AnnotationRecord {
    /// Builds the record for `frame`, locating the box on `grid` and deriving
    /// the flags. Every field is set here.
    pub(crate) fn new(
        frame: &FrameRecord,
        fields: VisionFields,
        grid: &GridSpec,
        extra: BTreeMap<String, Value>,
    ) -> Self {
        let placement = fields.bbox.map(|bbox| Placement::locate(bbox, grid));
        let flags = geometry::build_flags(
            fields.has_child,
            fields.num_children,
            placement.as_ref().map(|p| p.grid_label.as_str()),
            &grid.center_cells,
        );
        Self {
            video_id: frame.video_id.clone(),
            frame_index: frame.frame_index,
            time_sec: frame.time_sec,
            frame_path: frame.frame_path.clone(),
            caption: fields.caption,
            tags: fields.tags,
            scores: fields.scores,
            has_child: fields.has_child,
            num_children: fields.num_children,
            main_subject: fields.main_subject,
            placement,
            flags,
            extra,
        }
    }

    /// Recomputes the placement and flags on `grid`. Returns `true` when the
    /// stored values disagreed with it.
    pub(crate) fn relocate(&mut self, grid: &GridSpec) -> bool {
        let placement = self.bbox().map(|bbox| Placement::locate(bbox, grid));
        let flags = geometry::build_flags(
            self.has_child,
            self.num_children,
            placement.as_ref().map(|p| p.grid_label.as_str()),
            &grid.center_cells,
        );
        let changed = placement != self.placement || flags != self.flags;
        self.placement = placement;
        self.flags = flags;
        changed
    }

    pub(crate) fn bbox(&self) -> Option<BBox> {
        self.placement.as_ref().map(|p| p.bbox)
    }

    pub(crate) fn grid_label(&self) -> Option<&str> {
        self.placement.as_ref().map(|p| p.grid_label.as_str())
    }
}

/// A frame chosen as a best shot, with the path of its copied image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct BestShotRecord {
    pub video_id: String,
    pub frame_index: u32,
    pub rank: u32,
    pub score: f64,
    pub frame_path: String,
    pub source_path: String,
    pub caption: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AlertEvent {
    pub video_id: String,
    pub start_time_sec: f64,
    pub end_time_sec: f64,
    pub level: AlertLevel,
    pub reason: String,
    #[serde(default)]
    pub related_frames: Vec<u32>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn frame(index: u32, path: &str) -> FrameRecord {
        FrameRecord {
            video_id: "vid".to_owned(),
            frame_index: index,
            time_sec: index as f64 * 5.0,
            frame_path: path.to_owned(),
            is_blurry: false,
            is_too_dark: false,
        }
    }

    #[test]
    fn bbox_rejects_out_of_range_and_non_finite() {
        assert!(BBox::new([0.0, 0.0, 1.0, 1.0]).is_ok());
        assert!(BBox::new([0.0, 0.0, 1.2, 1.0]).is_err());
        assert!(BBox::new([f64::NAN, 0.0, 0.5, 0.5]).is_err());
        assert!(BBox::try_from(vec![0.1, 0.2, 0.3]).is_err());
    }

    #[test]
    fn placement_is_present_only_with_a_box() {
        let grid = GridSpec::default();
        let with_box = AnnotationRecord::new(
            &frame(0, "f0.png"),
            VisionFields {
                bbox: Some(BBox::new([0.4, 0.4, 0.6, 0.6]).unwrap()),
                ..Default::default()
            },
            &grid,
            BTreeMap::new(),
        );
        assert_eq!(with_box.grid_label(), Some("F6"));
        assert!(with_box.flags["center_position"]);

        let without = AnnotationRecord::new(
            &frame(1, "f1.png"),
            VisionFields::default(),
            &grid,
            BTreeMap::new(),
        );
        assert!(without.placement.is_none());
        assert!(!without.flags["center_position"]);
    }

    #[test]
    fn annotation_json_keeps_flat_grid_fields() {
        let record = AnnotationRecord::new(
            &frame(3, "f3.png"),
            VisionFields {
                caption: "子どもが遊んでいる".to_owned(),
                bbox: Some(BBox::new([0.35, 0.40, 0.65, 0.80]).unwrap()),
                ..Default::default()
            },
            &GridSpec::default(),
            BTreeMap::new(),
        );
        let json: Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["grid_label"], "G6");
        assert_eq!(json["grid_row"], 6);
        assert_eq!(json["bbox"], serde_json::json!([0.35, 0.40, 0.65, 0.80]));
    }

    #[test]
    fn null_grid_fields_read_back_as_no_placement() {
        let line = r#"{"video_id":"v","frame_index":0,"time_sec":0.0,"frame_path":"f.png",
            "caption":"c","bbox":null,"grid_row":null,"grid_col":null,"grid_label":null}"#;
        let record: AnnotationRecord = serde_json::from_str(line).unwrap();
        assert!(record.placement.is_none());
        assert!(record.tags.is_empty());
    }

    #[test]
    fn placement_fields_must_come_together() {
        let bbox_only = r#"{"video_id":"v","frame_index":0,"time_sec":0.0,"frame_path":"f.png",
            "caption":"c","bbox":[0.1,0.1,0.2,0.2]}"#;
        let err = serde_json::from_str::<AnnotationRecord>(bbox_only).unwrap_err();
        assert!(err.to_string().contains("bbox without a grid cell"));

        let cell_only = r#"{"video_id":"v","frame_index":0,"time_sec":0.0,"frame_path":"f.png",
            "caption":"c","grid_row":0,"grid_col":0,"grid_label":"A1"}"#;
        assert!(serde_json::from_str::<AnnotationRecord>(cell_only).is_err());
    }

    #[test]
    fn grid_label_must_name_its_cell() {
        let line = r#"{"video_id":"v","frame_index":0,"time_sec":0.0,"frame_path":"f.png",
            "caption":"c","bbox":[0.0,0.0,0.1,0.1],"grid_row":0,"grid_col":0,"grid_label":"J10"}"#;
        let err = serde_json::from_str::<AnnotationRecord>(line).unwrap_err();
        assert!(err.to_string().contains("J10"));
    }

    #[test]
    fn relocate_fixes_a_cell_from_another_grid() {
        let line = r#"{"video_id":"v","frame_index":0,"time_sec":0.0,"frame_path":"f.png",
            "caption":"c","has_child":true,"bbox":[0.0,0.0,0.1,0.1],
            "grid_row":9,"grid_col":9,"grid_label":"J10","flags":{"center_position":true}}"#;
        let mut record: AnnotationRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.grid_label(), Some("J10"));

        assert!(record.relocate(&GridSpec::default()));
        assert_eq!(record.grid_label(), Some("A1"));
        assert!(!record.flags["center_position"]);
        assert!(record.flags["child_present"]);
        assert!(!record.relocate(&GridSpec::default()));
    }

    #[test]
    fn records_without_a_box_write_null_grid_fields() {
        let record = AnnotationRecord::new(
            &frame(2, "f2.png"),
            VisionFields::default(),
            &GridSpec::default(),
            BTreeMap::new(),
        );
        let json: Value = serde_json::to_value(&record).unwrap();
        assert!(json["bbox"].is_null());
        assert!(json["grid_label"].is_null());
        assert_eq!(serde_json::from_value::<AnnotationRecord>(json).unwrap(), record);
    }

    #[test]
    fn alert_levels_are_ordered() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Critical);
        assert_eq!(
            serde_json::to_string(&AlertLevel::Warning).unwrap(),
            "\"warning\""
        );
    }
}
