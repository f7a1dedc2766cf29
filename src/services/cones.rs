//! Bearing estimation from bounding boxes.
//!
//! A detection box occupies a horizontal slice of the camera frame. Knowing the camera
//! heading and its angle of view, that slice maps to a cone: the bearing of the box
//! center and the angular width of the box.

use crate::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

static BOXES_RE: Lazy<Regex> = Lazy::new(|| {
    let num = r"\s*[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?\s*";
    let tuple = format!(r"\(\s*{n},{n},{n},{n},{n}\s*\)", n = num);
    Regex::new(&format!(r"^\s*\[\s*{t}(?:\s*,\s*{t})*\s*,?\s*\]\s*$", t = tuple))
        .expect("valid boxes regex")
});
static TUPLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^()]*)\)").expect("valid tuple regex"));

/// Normalized detection box, 0 is the left/top edge of the frame and 1 the right/bottom edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub confidence: f64,
}

impl BoundingBox {
    pub fn from_tuple(values: [f64; 5]) -> Result<Self, Error> {
        let [xmin, ymin, xmax, ymax, confidence] = values;
        if values.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0) {
            return Err(Error::InvalidInput(format!(
                "box values must be within [0, 1], got {:?}",
                values
            )));
        }
        if xmin >= xmax || ymin >= ymax {
            return Err(Error::InvalidInput(
                "xmin & ymin are expected to be respectively smaller than xmax & ymax".to_string(),
            ));
        }
        Ok(Self { xmin, ymin, xmax, ymax, confidence })
    }

    pub fn center_x(&self) -> f64 {
        (self.xmin + self.xmax) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }
}

/// Estimated bearing toward a fire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cone {
    /// Degrees in [0, 360)
    pub azimuth: f64,
    /// Opening angle in degrees, [0, 180]
    pub angle: f64,
}

/// Parse the textual box list `[(xmin,ymin,xmax,ymax,conf),...]`
pub fn parse_bboxes(raw: &str) -> Result<Vec<BoundingBox>, Error> {
    if !BOXES_RE.is_match(raw) {
        return Err(Error::InvalidInput(format!("malformed bounding boxes: {}", raw)));
    }

    TUPLE_RE
        .captures_iter(raw)
        .map(|caps| {
            let mut values = [0.0; 5];
            for (slot, part) in values.iter_mut().zip(caps[1].split(',')) {
                *slot = part
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| Error::InvalidInput(format!("invalid box value {:?}: {}", part, e)))?;
            }
            BoundingBox::from_tuple(values)
        })
        .collect()
}

/// Render boxes in the canonical textual form
pub fn format_bboxes(boxes: &[BoundingBox]) -> String {
    let mut out = String::from("[");
    for (i, b) in boxes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "({},{},{},{},{})", b.xmin, b.ymin, b.xmax, b.ymax, b.confidence);
    }
    out.push(']');
    out
}

/// Most confident box, first occurrence wins ties
pub fn most_confident(boxes: &[BoundingBox]) -> Option<&BoundingBox> {
    boxes
        .iter()
        .fold(None, |best: Option<&BoundingBox>, b| match best {
            Some(current) if current.confidence >= b.confidence => Some(current),
            _ => Some(b),
        })
}

/// Compute the cone of the most confident box
pub fn resolve_cone(azimuth: f64, bboxes: &[BoundingBox], aov: f64) -> Result<Cone, Error> {
    let best = most_confident(bboxes)
        .ok_or_else(|| Error::InvalidInput("at least one bounding box is required".to_string()))?;
    cone_for_box(azimuth, best, aov)
}

/// Same as [`resolve_cone`] from the textual box list
pub fn resolve_cone_str(azimuth: f64, bboxes: &str, aov: f64) -> Result<Cone, Error> {
    resolve_cone(azimuth, &parse_bboxes(bboxes)?, aov)
}

pub(crate) fn cone_for_box(azimuth: f64, bbox: &BoundingBox, aov: f64) -> Result<Cone, Error> {
    if !aov.is_finite() || aov <= 0.0 {
        return Err(Error::InvalidInput(format!("angle of view must be positive, got {}", aov)));
    }
    if !azimuth.is_finite() {
        return Err(Error::InvalidInput(format!("invalid azimuth {}", azimuth)));
    }

    let raw_azimuth = azimuth + aov * (bbox.center_x() - 0.5);
    let mut cone_azimuth = round1(raw_azimuth.rem_euclid(360.0));
    if cone_azimuth >= 360.0 {
        cone_azimuth -= 360.0;
    }
    let cone_angle = round1(aov * bbox.width()).min(aov).min(180.0).max(0.0);

    Ok(Cone { azimuth: cone_azimuth, angle: cone_angle })
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(xmin: f64, xmax: f64, confidence: f64) -> BoundingBox {
        BoundingBox::from_tuple([xmin, 0.1, xmax, 0.9, confidence]).unwrap()
    }

    #[test]
    fn centered_box_keeps_camera_heading() {
        let cone = resolve_cone_str(180.0, "[(0.4,0.1,0.6,0.9,0.95)]", 90.0).unwrap();
        assert_eq!(cone, Cone { azimuth: 180.0, angle: 18.0 });
    }

    #[test]
    fn off_center_box_shifts_bearing() {
        // center at 0.75 -> +0.25 * 60 degrees
        let cone = resolve_cone(100.0, &[bbox(0.7, 0.8, 0.5)], 60.0).unwrap();
        assert_eq!(cone.azimuth, 115.0);
        assert_eq!(cone.angle, 6.0);
    }

    #[test]
    fn azimuth_wraps_around_north() {
        let cone = resolve_cone(355.0, &[bbox(0.9, 1.0, 0.5)], 90.0).unwrap();
        // 355 + 90 * 0.45 = 395.5
        assert_eq!(cone.azimuth, 35.5);

        let cone = resolve_cone(5.0, &[bbox(0.0, 0.1, 0.5)], 90.0).unwrap();
        // 5 - 90 * 0.45 = -35.5
        assert_eq!(cone.azimuth, 324.5);
    }

    #[test]
    fn value_rounding_to_360_wraps_to_zero() {
        let cone = resolve_cone(359.96, &[bbox(0.45, 0.55, 0.5)], 1.0).unwrap();
        assert_eq!(cone.azimuth, 0.0);
    }

    #[test]
    fn selects_highest_confidence_not_largest_xmax() {
        let boxes = [bbox(0.8, 0.9, 0.2), bbox(0.1, 0.3, 0.9)];
        let cone = resolve_cone(90.0, &boxes, 100.0).unwrap();
        // center 0.2 -> 90 - 30
        assert_eq!(cone.azimuth, 60.0);
        assert_eq!(cone.angle, 20.0);
    }

    #[test]
    fn confidence_ties_go_to_first_box() {
        let boxes = [bbox(0.1, 0.2, 0.7), bbox(0.6, 0.9, 0.7)];
        assert_eq!(most_confident(&boxes), Some(&boxes[0]));
    }

    #[test]
    fn angle_never_exceeds_aov() {
        let cone = resolve_cone(0.0, &[bbox(0.0, 1.0, 0.5)], 54.27).unwrap();
        assert!(cone.angle <= 54.27);
        let cone = resolve_cone(0.0, &[bbox(0.0, 1.0, 0.5)], 270.0).unwrap();
        assert_eq!(cone.angle, 180.0);
    }

    #[test]
    fn outputs_stay_in_range_over_a_sweep() {
        for heading in (0..720).step_by(7) {
            for step in 0..9 {
                let xmin = step as f64 / 10.0;
                let b = bbox(xmin, xmin + 0.1, 0.5);
                for aov in [1.0, 45.5, 90.0, 180.0] {
                    let cone = resolve_cone(heading as f64 - 180.0, &[b], aov).unwrap();
                    assert!((0.0..360.0).contains(&cone.azimuth), "{:?}", cone);
                    assert!(cone.angle >= 0.0 && cone.angle <= aov, "{:?}", cone);
                }
            }
        }
    }

    #[test]
    fn rejects_empty_and_malformed_input() {
        assert!(matches!(resolve_cone(0.0, &[], 90.0), Err(Error::InvalidInput(_))));
        for raw in [
            "",
            "[]",
            "[(0.1,0.1,0.2,0.2)]",
            "[(0.1,0.1,0.2,0.2,0.5,0.3)]",
            "(0.1,0.1,0.2,0.2,0.5)",
            "[(0.1,a,0.2,0.2,0.5)]",
            "[(0.3,0.1,0.2,0.2,0.5)]",
            "[(0.1,0.1,1.2,0.2,0.5)]",
        ] {
            assert!(
                matches!(resolve_cone_str(0.0, raw, 90.0), Err(Error::InvalidInput(_))),
                "accepted {:?}",
                raw
            );
        }
    }

    #[test]
    fn rejects_invalid_angle_of_view() {
        let boxes = [bbox(0.1, 0.2, 0.5)];
        assert!(resolve_cone(0.0, &boxes, 0.0).is_err());
        assert!(resolve_cone(0.0, &boxes, f64::NAN).is_err());
    }

    #[test]
    fn parses_multiple_boxes_with_whitespace() {
        let boxes = parse_bboxes("[ (0.1, 0.2, 0.3, 0.4, 0.5), (0.5,0.5,0.6,0.7,0.9), ]").unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[1].confidence, 0.9);
        assert_eq!(format_bboxes(&boxes), "[(0.1,0.2,0.3,0.4,0.5),(0.5,0.5,0.6,0.7,0.9)]");
    }
}
