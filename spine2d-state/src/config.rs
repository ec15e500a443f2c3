//! Crossfade durations loaded from data instead of code.

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

/// Mix durations applied to an [`crate::AnimationStateData`].
///
/// ```json
/// { "default_mix": 0.2, "mixes": [{ "from": "walk", "to": "run", "duration": 0.4 }] }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize), serde(default))]
pub struct MixConfig {
    /// Seconds used for pairs without an explicit entry.
    pub default_mix: f32,
    pub mixes: Vec<MixPair>,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct MixPair {
    pub from: String,
    pub to: String,
    pub duration: f32,
}

#[cfg(feature = "json")]
impl MixConfig {
    pub fn from_json_str(s: &str) -> Result<Self, crate::Error> {
        serde_json::from_str(s).map_err(|e| crate::Error::Config {
            message: e.to_string(),
        })
    }
}
