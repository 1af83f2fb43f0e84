use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RadarConfig;

pub const MAX_DISTANCE: f64 = 100.0;
pub const MAX_ANGLE: f64 = 90.0;
pub const MIN_SIZE: f64 = 5.0;
pub const MAX_SIZE: f64 = 20.0;
pub const DEFAULT_SIZE: f64 = 10.0;

// Aircraft at (50,50), forward arc is y in [0,50]
const CENTER: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Bird,
    SmallPlane,
    BigPlane,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Bird => "BIRD",
            ObjectType::SmallPlane => "SMALL_PLANE",
            ObjectType::BigPlane => "BIG_PLANE",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = DetectionError;

    /// Accepts the canonical names plus the loose spellings models tend to
    /// produce ("small plane", "Big-Plane").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "BIRD" => Ok(ObjectType::Bird),
            "SMALL_PLANE" => Ok(ObjectType::SmallPlane),
            "BIG_PLANE" => Ok(ObjectType::BigPlane),
            _ => Err(DetectionError::UnknownType(s.to_string())),
        }
    }
}

/// Image-space box in percentages of the source frame, (0,0) top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub distance: f64,
    pub angle: f64,
    pub size: f64,
    pub kind: ObjectType,
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarDot {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    #[serde(rename = "type")]
    pub kind: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// What to do with detections whose angle falls outside the forward arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArcPolicy {
    #[default]
    Clamp,
    Drop,
}

#[derive(Debug, Error, PartialEq)]
pub enum DetectionError {
    #[error("detection is not a JSON object")]
    NotAnObject,
    #[error("detection is missing `{0}`")]
    MissingField(&'static str),
    #[error("detection field `{0}` is not a finite number")]
    NotANumber(&'static str),
    #[error("unknown object type `{0}`")]
    UnknownType(String),
}

impl Detection {
    /// Numbers may be JSON numbers or numeric strings. Missing size falls back
    /// to [`DEFAULT_SIZE`]. Missing `distance` or `angle` is an error, not a
    /// default, so no dot is drawn at a position the model never reported;
    /// `map_detections` skips such entries and maps the rest.
    pub fn from_value(value: &Value) -> Result<Self, DetectionError> {
        let object = value.as_object().ok_or(DetectionError::NotAnObject)?;

        let distance = required_number(object.get("distance"), "distance")?;
        let angle = required_number(object.get("angle"), "angle")?;
        let size = match object.get("size") {
            None | Some(Value::Null) => DEFAULT_SIZE,
            Some(v) => number(v).ok_or(DetectionError::NotANumber("size"))?,
        };

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DetectionError::MissingField("type"))?
            .parse::<ObjectType>()?;

        let bounding_box = object
            .get("boundingBox")
            .or_else(|| object.get("bounding_box"))
            .and_then(|b| serde_json::from_value::<BoundingBox>(b.clone()).ok());

        Ok(Self {
            distance,
            angle,
            size,
            kind,
            bounding_box,
        })
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn required_number(value: Option<&Value>, field: &'static str) -> Result<f64, DetectionError> {
    match value {
        None | Some(Value::Null) => Err(DetectionError::MissingField(field)),
        Some(v) => number(v).ok_or(DetectionError::NotANumber(field)),
    }
}

/// Returns `None` only when `policy` drops an out-of-arc angle.
pub fn map_detection(detection: &Detection, policy: ArcPolicy) -> Option<RadarDot> {
    let distance = detection.distance.clamp(0.0, MAX_DISTANCE);

    let angle = if (-MAX_ANGLE..=MAX_ANGLE).contains(&detection.angle) {
        detection.angle
    } else {
        match policy {
            ArcPolicy::Clamp => detection.angle.clamp(-MAX_ANGLE, MAX_ANGLE),
            ArcPolicy::Drop => return None,
        }
    };

    let radians = angle.to_radians();
    let x = CENTER + radians.sin() * distance / 2.0;
    let y = CENTER - radians.cos() * distance / 2.0;

    Some(RadarDot {
        x,
        y,
        size: detection.size.clamp(MIN_SIZE, MAX_SIZE),
        kind: detection.kind,
        bounding_box: detection.bounding_box,
    })
}

/// Maps a batch of raw detections. Entries that fail to parse are logged and
/// skipped; they never discard the rest of the batch.
pub fn map_detections(raw: &[Value], config: &RadarConfig) -> Vec<RadarDot> {
    let mut dots = Vec::with_capacity(raw.len());

    for (index, value) in raw.iter().enumerate() {
        let detection = match Detection::from_value(value) {
            Ok(d) => d,
            Err(e) => {
                warn!("Skipping detection #{}: {} ({})", index, e, value);
                continue;
            }
        };

        match map_detection(&detection, config.arc_policy) {
            Some(dot) => dots.push(dot),
            None => debug!(
                "Dropped out-of-arc {} at angle {:.1}",
                detection.kind, detection.angle
            ),
        }
    }

    suppress_duplicates(dots, config.dedupe_radius)
}

/// Bare array, or an object's `radarDots`/`detections`.
pub fn detection_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::Object(object) => Some(
            object
                .get("radarDots")
                .or_else(|| object.get("detections"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        ),
        _ => None,
    }
}

/// Removes dots of the same type lying within `radius` display units of a dot
/// already kept. The first report wins. A radius of zero keeps everything.
pub fn suppress_duplicates(dots: Vec<RadarDot>, radius: f64) -> Vec<RadarDot> {
    if radius <= 0.0 {
        return dots;
    }

    let mut kept: Vec<RadarDot> = Vec::with_capacity(dots.len());
    for dot in dots {
        let duplicate = kept.iter().any(|k| {
            k.kind == dot.kind && (k.x - dot.x).hypot(k.y - dot.y) < radius
        });
        if duplicate {
            debug!("Suppressed duplicate {} at ({:.1}, {:.1})", dot.kind, dot.x, dot.y);
        } else {
            kept.push(dot);
        }
    }
    kept
}

/// Keeps the spoken/written report consistent with the markers. A blank
/// report is replaced with a summary derived from the dots.
pub fn consistent_summary(message: Option<&str>, dots: &[RadarDot]) -> String {
    if let Some(text) = message.map(str::trim).filter(|t| !t.is_empty()) {
        return text.to_string();
    }

    match dots.len() {
        0 => "No threats detected".to_string(),
        1 => format!("1 contact on radar: {}", dots[0].kind),
        n => format!("{} contacts on radar", n),
    }
}
