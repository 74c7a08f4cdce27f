use std::collections::BTreeMap;

use crate::schema::{AlertEvent, AlertLevel, AnnotationRecord};

/// A rule looking at one annotation at a time.
pub(crate) trait AlertRule {
    fn evaluate(&self, annotation: &AnnotationRecord) -> Option<AlertEvent>;
}

/// Fires when the caption contains any of the keywords.
pub(crate) struct KeywordRule {
    keywords: Vec<String>,
    level: AlertLevel,
}

impl KeywordRule {
    pub(crate) fn new(keywords: Vec<String>, level: AlertLevel) -> Self {
        let keywords = keywords.into_iter().filter(|k| !k.is_empty()).collect();
        Self { keywords, level }
    }
}

impl AlertRule for KeywordRule {
    fn evaluate(&self, annotation: &AnnotationRecord) -> Option<AlertEvent> {
        if !self
            .keywords
            .iter()
            .any(|k| annotation.caption.contains(k.as_str()))
        {
            return None;
        }
        Some(AlertEvent {
            video_id: annotation.video_id.clone(),
            start_time_sec: annotation.time_sec,
            end_time_sec: annotation.time_sec,
            level: self.level,
            reason: format!("keyword in caption: {}", annotation.caption),
            related_frames: vec![annotation.frame_index],
            extra: BTreeMap::new(),
        })
    }
}

/// Runs every rule over the annotations, which must be in temporal order;
/// events come out in the same order.
pub(crate) fn detect(
    annotations: &[AnnotationRecord],
    rules: &[Box<dyn AlertRule>],
) -> Vec<AlertEvent> {
    annotations
        .iter()
        .flat_map(move |a| rules.iter().filter_map(move |rule| rule.evaluate(a)))
        .collect()
}
