use serde_derive::{Deserialize, Serialize};
use std::io::BufRead;

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;

/// One decoded candidate in source-image pixel coordinates.
///
/// `alternates` holds the top class guesses (primary first) as
/// `(label, percent)` pairs, at most three of them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionBox {
    pub bbox: BBox<Ltrb>,
    pub label: String,
    #[serde(rename = "p")]
    pub confidence: f32,
    pub alternates: Vec<(String, u8)>,
}

impl DetectionBox {
    pub fn new(bbox: BBox<Ltrb>, label: impl Into<String>, confidence: f32) -> Self {
        let label = label.into();
        let confidence = confidence.clamp(0.0, 1.0);

        Self {
            alternates: vec![(label.clone(), percent(confidence))],
            bbox,
            label,
            confidence,
        }
    }

    #[inline]
    pub fn iou(&self, other: &DetectionBox) -> f32 {
        self.bbox.iou(&other.bbox)
    }

    /// Confidence this box carries for `target`, through its primary label
    /// or one of the alternates.
    pub fn confidence_for(&self, target: &str) -> Option<f32> {
        let target = target.trim();
        if target.is_empty() {
            return None;
        }

        if same_label(&self.label, target) {
            return Some(self.confidence);
        }

        self.alternates
            .iter()
            .find(|(label, _)| same_label(label, target))
            .map(|(_, pct)| *pct as f32 / 100.0)
    }

    /// Rewrites the box as a `target` detection if it matches at or above
    /// `min_confidence`. Alternate matches are relabelled with the
    /// alternate's confidence.
    pub fn as_target(&self, target: &str, min_confidence: f32) -> Option<DetectionBox> {
        let conf = self.confidence_for(target)?;
        if conf < min_confidence {
            return None;
        }

        if same_label(&self.label, target) {
            Some(self.clone())
        } else {
            let target = target.trim().to_string();
            Some(DetectionBox {
                bbox: self.bbox,
                alternates: vec![(target.clone(), percent(conf))],
                label: target,
                confidence: conf,
            })
        }
    }
}

#[inline]
pub fn same_label(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[inline]
pub(crate) fn percent(conf: f32) -> u8 {
    (conf.clamp(0.0, 1.0) * 100.0) as u8
}

/// Class-id to label table of the detector model.
#[derive(Debug, Clone, Default)]
pub struct ClassLabels(Vec<String>);

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    /// One label per line, line index is the class id. Blank lines and
    /// lines starting with `#` are skipped.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut labels = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            labels.push(line.to_string());
        }

        Ok(Self(labels))
    }

    pub fn get(&self, class_id: usize) -> String {
        self.0
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(label: &str, conf: f32, alts: &[(&str, u8)]) -> DetectionBox {
        DetectionBox {
            bbox: BBox::ltrb(0.0, 0.0, 10.0, 10.0),
            label: label.to_string(),
            confidence: conf,
            alternates: alts.iter().map(|(l, p)| (l.to_string(), *p)).collect(),
        }
    }

    #[test]
    fn matches_primary_label_case_insensitive() {
        let d = boxed("Cola", 0.8, &[("Cola", 80)]);
        assert_eq!(d.confidence_for(" cola "), Some(0.8));
    }

    #[test]
    fn alternate_match_is_relabelled() {
        let d = boxed("sprite", 0.9, &[("sprite", 90), ("cola", 60)]);
        let t = d.as_target("cola", 0.5).unwrap();
        assert_eq!(t.label, "cola");
        assert!((t.confidence - 0.6).abs() < 1e-6);
        assert!(d.as_target("cola", 0.7).is_none());
    }

    #[test]
    fn blank_target_never_matches() {
        let d = boxed("cola", 0.9, &[]);
        assert!(d.confidence_for("  ").is_none());
    }

    #[test]
    fn parses_label_file() {
        let text = "# labels\ncola\n\nsprite\n";
        let labels = ClassLabels::parse(text.as_bytes()).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(1), "sprite");
        assert_eq!(labels.get(7), "class_7");
    }
}
