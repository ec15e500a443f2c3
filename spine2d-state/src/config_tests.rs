use crate::{
    Animation, AnimationStateData, BoneData, EMPTY_ANIMATION_NAME, Error, MixConfig, MixPair,
    SkeletonData,
};
use std::sync::Arc;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-6,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn skeleton_data() -> Arc<SkeletonData> {
    let mut data = SkeletonData::new(vec![BoneData::new("root", None)], Vec::new()).unwrap();
    for name in ["walk", "run"] {
        data.add_animation(Animation::new(name, Vec::new(), Some(1.0)).unwrap())
            .unwrap();
    }
    Arc::new(data)
}

#[cfg(feature = "json")]
#[test]
fn parses_mix_config_json() {
    let config = MixConfig::from_json_str(
        r#"{
            "default_mix": 0.2,
            "mixes": [
                { "from": "walk", "to": "run", "duration": 0.4 },
                { "from": "run", "to": "<empty>", "duration": 0.1 }
            ]
        }"#,
    )
    .unwrap();
    assert_approx(config.default_mix, 0.2);
    assert_eq!(
        config.mixes[0],
        MixPair {
            from: "walk".to_string(),
            to: "run".to_string(),
            duration: 0.4,
        }
    );
    assert_eq!(config.mixes.len(), 2);
}

#[cfg(feature = "json")]
#[test]
fn missing_fields_use_defaults() {
    let config = MixConfig::from_json_str("{}").unwrap();
    assert_eq!(config, MixConfig::default());
}

#[cfg(feature = "json")]
#[test]
fn malformed_json_is_a_config_error() {
    let err = MixConfig::from_json_str(r#"{ "default_mix": "fast" }"#).unwrap_err();
    assert!(matches!(err, Error::Config { .. }), "{err}");
}

#[test]
fn from_config_applies_pairs_and_default() {
    let config = MixConfig {
        default_mix: 0.2,
        mixes: vec![
            MixPair {
                from: "walk".to_string(),
                to: "run".to_string(),
                duration: 0.4,
            },
            MixPair {
                from: "run".to_string(),
                to: EMPTY_ANIMATION_NAME.to_string(),
                duration: 0.1,
            },
        ],
    };
    let data = AnimationStateData::from_config(skeleton_data(), &config).unwrap();
    assert_approx(data.mix("walk", "run"), 0.4);
    assert_approx(data.mix("run", "walk"), 0.2);
    assert_approx(data.mix("run", EMPTY_ANIMATION_NAME), 0.1);
}

#[test]
fn from_config_rejects_unknown_animation() {
    let config = MixConfig {
        default_mix: 0.0,
        mixes: vec![MixPair {
            from: "walk".to_string(),
            to: "jump".to_string(),
            duration: 0.3,
        }],
    };
    let err = AnimationStateData::from_config(skeleton_data(), &config).unwrap_err();
    assert!(matches!(err, Error::UnknownAnimation { ref name } if name == "jump"), "{err}");
}

#[test]
fn rejects_negative_or_non_finite_durations() {
    let config = MixConfig {
        default_mix: -1.0,
        mixes: Vec::new(),
    };
    assert!(matches!(
        AnimationStateData::from_config(skeleton_data(), &config),
        Err(Error::InvalidValue { .. })
    ));

    let mut data = AnimationStateData::new(skeleton_data());
    assert!(data.set_mix("walk", "run", f32::NAN).is_err());
    assert!(data.set_mix("walk", "run", -0.5).is_err());
    assert!(data.set_mix("walk", "run", 0.0).is_ok());
}
