//! Transition selection between consecutive clips.
//!
//! The set of transition effects is closed: [`TransitionKind`] enumerates
//! every effect the renderer knows, each with its own default parameter set.
//! [`TransitionType`] adds the two pseudo-types a user can pick: `None`
//! (hard cuts everywhere) and `Random` (a concrete kind is drawn at each
//! clip boundary).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A concrete, renderable transition effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    /// Linear dissolve.
    Fade,
    /// Fade through a solid color.
    FadeColor,
    /// Push the outgoing frame off-screen in a direction.
    Directional,
    /// Soft-edged wipe along a direction.
    Wipe,
    /// Expanding circle reveals the incoming frame.
    CircleOpen,
    /// Clock-hand sweep around the center.
    Radial,
    /// Blocky mosaic peaking at the midpoint.
    Pixelize,
}

impl TransitionKind {
    /// Every concrete kind, in a stable order.
    pub const ALL: [TransitionKind; 7] = [
        TransitionKind::Fade,
        TransitionKind::FadeColor,
        TransitionKind::Directional,
        TransitionKind::Wipe,
        TransitionKind::CircleOpen,
        TransitionKind::Radial,
        TransitionKind::Pixelize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TransitionKind::Fade => "fade",
            TransitionKind::FadeColor => "fadecolor",
            TransitionKind::Directional => "directional",
            TransitionKind::Wipe => "wipe",
            TransitionKind::CircleOpen => "circleopen",
            TransitionKind::Radial => "radial",
            TransitionKind::Pixelize => "pixelize",
        }
    }

    /// Default uniform values for this effect.
    pub fn default_params(self) -> Map<String, Value> {
        let value = match self {
            TransitionKind::Fade => json!({}),
            TransitionKind::FadeColor => json!({ "color": [0.0, 0.0, 0.0], "colorPhase": 0.4 }),
            TransitionKind::Directional => json!({ "direction": [0.0, 1.0] }),
            TransitionKind::Wipe => json!({ "direction": [1.0, 0.0], "smoothness": 0.1 }),
            TransitionKind::CircleOpen => json!({ "smoothness": 0.3, "opening": true }),
            TransitionKind::Radial => json!({ "smoothness": 1.0 }),
            TransitionKind::Pixelize => json!({ "squaresMin": [20, 20], "steps": 50 }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Merge user parameters over this kind's defaults. Unknown keys are kept
    /// so the renderer can warn about them.
    pub fn merged_params(self, overrides: &Map<String, Value>) -> Map<String, Value> {
        let mut params = self.default_params();
        for (key, value) in overrides {
            params.insert(key.clone(), value.clone());
        }
        params
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for unrecognized transition names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown transition type: {0}")]
pub struct UnknownTransition(pub String);

impl FromStr for TransitionKind {
    type Err = UnknownTransition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TransitionKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| UnknownTransition(s.to_string()))
    }
}

/// What the user picked for transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransitionType {
    /// Hard cuts only; forces zero-length transitions.
    None,
    /// Re-sample a concrete kind at each clip boundary.
    Random,
    /// Always use this kind.
    Kind(TransitionKind),
}

impl TransitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionType::None => "None",
            TransitionType::Random => "Random",
            TransitionType::Kind(kind) => kind.name(),
        }
    }
}

impl FromStr for TransitionType {
    type Err = UnknownTransition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TransitionType::None),
            "random" => Ok(TransitionType::Random),
            _ => s.parse().map(TransitionType::Kind),
        }
    }
}

impl TryFrom<String> for TransitionType {
    type Error = UnknownTransition;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransitionType> for String {
    fn from(value: TransitionType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition settings for an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    /// Effect selection.
    #[serde(rename = "type")]
    pub kind: TransitionType,

    /// Configured length of each transition (seconds).
    pub duration_secs: f64,

    /// Effect parameters overriding the kind's defaults.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TransitionSpec {
    pub fn new(kind: TransitionType, duration_secs: f64) -> Self {
        Self {
            kind,
            duration_secs,
            params: Map::new(),
        }
    }

    /// Hard cuts between every clip.
    pub fn none() -> Self {
        Self::new(TransitionType::None, 0.0)
    }

    /// Configured duration, forced to zero for `None`.
    pub fn effective_duration_secs(&self) -> f64 {
        match self.kind {
            TransitionType::None => 0.0,
            _ => self.duration_secs.max(0.0),
        }
    }
}

impl Default for TransitionSpec {
    fn default() -> Self {
        Self::new(TransitionType::Kind(TransitionKind::Fade), 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_case_insensitively() {
        assert_eq!("None".parse::<TransitionType>(), Ok(TransitionType::None));
        assert_eq!("random".parse::<TransitionType>(), Ok(TransitionType::Random));
        assert_eq!(
            "CircleOpen".parse::<TransitionType>(),
            Ok(TransitionType::Kind(TransitionKind::CircleOpen))
        );
        assert!("sparkles".parse::<TransitionType>().is_err());
    }

    #[test]
    fn test_spec_json_shape() {
        let spec: TransitionSpec = serde_json::from_str(
            r#"{"type":"wipe","duration_secs":0.5,"params":{"smoothness":0.4}}"#,
        )
        .unwrap();
        assert_eq!(spec.kind, TransitionType::Kind(TransitionKind::Wipe));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "wipe");
    }

    #[test]
    fn test_none_forces_zero_duration() {
        let spec = TransitionSpec::new(TransitionType::None, 2.0);
        assert_eq!(spec.effective_duration_secs(), 0.0);
        let spec = TransitionSpec::new(TransitionType::Random, 2.0);
        assert_eq!(spec.effective_duration_secs(), 2.0);
    }

    #[test]
    fn test_overrides_merge_over_defaults() {
        let mut overrides = Map::new();
        overrides.insert("smoothness".into(), json!(0.5));
        let merged = TransitionKind::Wipe.merged_params(&overrides);
        assert_eq!(merged["smoothness"], json!(0.5));
        assert_eq!(merged["direction"], json!([1.0, 0.0]));
    }

    #[test]
    fn test_every_kind_round_trips_its_name() {
        for kind in TransitionKind::ALL {
            assert_eq!(kind.name().parse::<TransitionKind>(), Ok(kind));
        }
    }
}
