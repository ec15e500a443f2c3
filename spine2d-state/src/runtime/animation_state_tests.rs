use crate::{
    Animation, AnimationState, AnimationStateData, AnimationStateEvent, AnimationStateListener,
    BoneData, CurveFrame, CurveTimeline, Error, ListenerError, Skeleton, SkeletonData, TargetKind,
    Timeline, TrackEntrySnapshot,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-6,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

#[derive(Clone, Default)]
struct Recorder {
    log: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.borrow_mut())
    }
}

impl AnimationStateListener for Recorder {
    fn on_event(
        &mut self,
        _state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    ) -> Result<(), ListenerError> {
        let event = match event {
            AnimationStateEvent::Complete { loop_count } => format!("complete:{loop_count}"),
            AnimationStateEvent::Event(e) => format!("event:{}", e.name),
            other => other.name().to_string(),
        };
        self.log
            .borrow_mut()
            .push(format!("{} {event}", entry.animation.name()));
        Ok(())
    }
}

fn keys(keys: &[(f32, f32)]) -> Vec<CurveFrame<1>> {
    keys.iter()
        .map(|&(time, value)| CurveFrame::linear(time, [value]))
        .collect()
}

fn skeleton_data() -> Arc<SkeletonData> {
    let mut data = SkeletonData::new(
        vec![BoneData::new("root", None), BoneData::new("arm", Some(0))],
        Vec::new(),
    )
    .unwrap();
    let animations = [
        ("walk", Timeline::TranslateX(CurveTimeline::new(0, keys(&[(0.0, 0.0), (1.0, 100.0)])))),
        ("a", Timeline::TranslateX(CurveTimeline::new(0, keys(&[(0.0, 10.0)])))),
        ("b", Timeline::TranslateX(CurveTimeline::new(0, keys(&[(0.0, 20.0)])))),
        ("spin", Timeline::Rotate(CurveTimeline::new(1, keys(&[(0.0, 0.0), (1.0, 360.0)])))),
    ];
    for (name, timeline) in animations {
        data.add_animation(Animation::new(name, vec![timeline], Some(1.0)).unwrap())
            .unwrap();
    }
    Arc::new(data)
}

fn setup() -> (AnimationState, Skeleton, Recorder) {
    let data = skeleton_data();
    let skeleton = Skeleton::new(data.clone());
    let mut state = AnimationState::new(AnimationStateData::new(data));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    (state, skeleton, recorder)
}

fn step(state: &mut AnimationState, skeleton: &mut Skeleton, delta: f32) {
    state.update(delta);
    state.apply(skeleton).unwrap();
}

#[test]
fn unknown_animation_is_an_error() {
    let (mut state, _, recorder) = setup();
    let err = state.set_animation(0, "fly", true).unwrap_err();
    assert!(matches!(err, Error::UnknownAnimation { ref name } if name == "fly"), "{err}");
    assert!(state.current(0).is_none());
    assert!(recorder.take().is_empty());
}

#[test]
fn empty_state_applies_nothing() {
    let (mut state, mut skeleton, _) = setup();
    state.update(0.5);
    assert!(!state.apply(&mut skeleton).unwrap());
}

#[test]
fn looping_entry_wraps_animation_time() {
    let (mut state, mut skeleton, recorder) = setup();
    state.set_animation(0, "walk", true).unwrap();

    step(&mut state, &mut skeleton, 1.25);
    assert_approx(skeleton.bones[0].x, 25.0);

    let entry = state.entry(state.current(0).unwrap()).unwrap();
    assert_approx(entry.animation_time(), 0.25);
    assert_eq!(entry.loop_count(), 1);
    assert_approx(entry.track_complete(), 2.0);
    assert!(!entry.is_complete());
    assert_eq!(recorder.take(), ["walk start", "walk complete:1"]);
}

#[test]
fn looping_complete_fires_once_per_loop() {
    let (mut state, mut skeleton, recorder) = setup();
    state.set_animation(0, "spin", true).unwrap();

    step(&mut state, &mut skeleton, 0.5);
    step(&mut state, &mut skeleton, 0.75);
    step(&mut state, &mut skeleton, 0.25);
    step(&mut state, &mut skeleton, 0.75);

    assert_eq!(
        recorder.take(),
        ["spin start", "spin complete:1", "spin complete:2"]
    );
}

#[test]
fn non_looping_entry_holds_last_frame_then_ends() {
    let (mut state, mut skeleton, recorder) = setup();
    let handle = state.set_animation(0, "walk", false).unwrap();

    step(&mut state, &mut skeleton, 1.5);
    assert_approx(skeleton.bones[0].x, 100.0);
    let entry = state.entry(handle).unwrap();
    assert!(entry.is_complete());
    assert_approx(entry.animation_time(), 1.0);
    assert_eq!(recorder.take(), ["walk start", "walk complete:1"]);

    step(&mut state, &mut skeleton, 0.1);
    assert!(state.current(0).is_none());
    assert!(state.entry(handle).is_none());
    assert_eq!(recorder.take(), ["walk end", "walk dispose"]);
}

#[test]
fn shortened_track_end_stops_applying_non_looping_entry() {
    let (mut state, mut skeleton, _) = setup();
    let handle = state.set_animation(0, "walk", false).unwrap();
    handle.set_track_end(&mut state, 0.5);

    step(&mut state, &mut skeleton, 0.25);
    assert_approx(skeleton.bones[0].x, 25.0);

    step(&mut state, &mut skeleton, 0.35);
    assert_approx(skeleton.bones[0].x, 0.0);
    assert!(state.current(0).is_some());
}

#[test]
fn queued_entry_starts_after_previous_completes() {
    let (mut state, mut skeleton, recorder) = setup();
    let a = state.set_animation(0, "a", false).unwrap();
    let b = state.add_animation(0, "b", false, 0.0).unwrap();
    assert_approx(state.entry(b).unwrap().delay, 1.0);
    assert_eq!(state.entry(a).unwrap().next(), Some(b));
    assert_eq!(state.entry(b).unwrap().previous(), Some(a));

    step(&mut state, &mut skeleton, 0.5);
    step(&mut state, &mut skeleton, 0.5);
    assert_eq!(state.current(0), Some(a));
    assert_approx(skeleton.bones[0].x, 10.0);

    step(&mut state, &mut skeleton, 0.1);
    assert_eq!(state.current(0), Some(b));
    let entry = state.entry(b).unwrap();
    assert_approx(entry.track_time, 0.1);
    assert_eq!(entry.mixing_from(), Some(a));
    assert_eq!(entry.previous(), None);
    assert_approx(skeleton.bones[0].x, 20.0);

    step(&mut state, &mut skeleton, 0.1);
    assert!(state.entry(a).is_none());
    assert_eq!(
        recorder.take(),
        [
            "a start",
            "a complete:1",
            "a interrupt",
            "b start",
            "a end",
            "a dispose"
        ]
    );
}

#[test]
fn delay_defers_start() {
    let (mut state, mut skeleton, _) = setup();
    let handle = state.add_animation(0, "a", true, 0.5).unwrap();
    assert_eq!(state.current(0), Some(handle));

    state.update(0.25);
    assert!(!state.apply(&mut skeleton).unwrap());
    assert_approx(skeleton.bones[0].x, 0.0);

    state.update(0.5);
    assert!(state.apply(&mut skeleton).unwrap());
    let entry = state.entry(handle).unwrap();
    assert_approx(entry.delay, 0.0);
    assert_approx(entry.track_time, 0.25);
    assert_approx(skeleton.bones[0].x, 10.0);
}

#[test]
fn set_before_first_apply_replaces_without_mixing() {
    let (mut state, _, recorder) = setup();
    let a = state.set_animation(0, "a", true).unwrap();
    let b = state.set_animation(0, "b", true).unwrap();

    assert!(state.entry(a).is_none());
    assert_eq!(state.entry(b).unwrap().mixing_from(), None);
    assert_eq!(
        recorder.take(),
        ["a start", "a interrupt", "a end", "a dispose", "b start"]
    );
}

#[test]
fn clear_track_is_idempotent() {
    let (mut state, mut skeleton, recorder) = setup();
    state.set_animation(0, "walk", true).unwrap();
    state.add_animation(0, "a", true, 0.0).unwrap();
    step(&mut state, &mut skeleton, 0.5);
    recorder.take();

    state.clear_track(0);
    state.clear_track(0);
    state.clear_track(7);

    assert!(state.current(0).is_none());
    assert_eq!(recorder.take(), ["walk end", "walk dispose", "a dispose"]);
    // The pose is left as it was.
    assert_approx(skeleton.bones[0].x, 50.0);
}

#[test]
fn clear_tracks_empties_every_track() {
    let (mut state, _, recorder) = setup();
    state.set_animation(0, "a", true).unwrap();
    state.set_animation(3, "spin", true).unwrap();
    recorder.take();

    state.clear_tracks();
    assert_eq!(state.tracks().count(), 0);
    assert_eq!(
        recorder.take(),
        ["a end", "a dispose", "spin end", "spin dispose"]
    );
}

#[test]
fn tracks_apply_in_index_order() {
    let (mut state, mut skeleton, _) = setup();
    state.set_animation(2, "b", true).unwrap();
    state.set_animation(0, "a", true).unwrap();
    assert_eq!(
        state.tracks().map(|(index, _)| index).collect::<Vec<_>>(),
        [0, 2]
    );

    step(&mut state, &mut skeleton, 0.1);
    // Track 2 replaces track 0 for the shared property.
    assert_approx(skeleton.bones[0].x, 20.0);
}

#[test]
fn spin_end_to_end() {
    let (mut state, mut skeleton, _) = setup();
    state.set_animation(0, "spin", true).unwrap();

    step(&mut state, &mut skeleton, 0.25);
    assert_approx(skeleton.bones[1].rotation, 90.0);
    step(&mut state, &mut skeleton, 0.25);
    assert_approx(skeleton.bones[1].rotation, 180.0);
    step(&mut state, &mut skeleton, 0.75);
    assert_approx(skeleton.bones[1].rotation, 90.0);

    skeleton.update_world_transform();
    let arm = &skeleton.bones[1];
    assert!((arm.world_rotation_x() - 90.0).abs() < 1.0e-3);
}

#[test]
fn reverse_plays_backwards() {
    let (mut state, mut skeleton, _) = setup();
    let handle = state.set_animation(0, "walk", false).unwrap();
    handle.set_reverse(&mut state, true);

    step(&mut state, &mut skeleton, 0.25);
    assert_approx(skeleton.bones[0].x, 75.0);
}

#[test]
fn time_scales_multiply() {
    let (mut state, mut skeleton, _) = setup();
    let handle = state.set_animation(0, "walk", true).unwrap();
    state.set_time_scale(0.5);
    handle.set_time_scale(&mut state, 3.0);

    step(&mut state, &mut skeleton, 0.5);
    assert_approx(state.entry(handle).unwrap().track_time, 0.75);
    assert_approx(skeleton.bones[0].x, 75.0);
}

#[test]
fn replaying_the_same_script_is_deterministic() {
    fn run() -> Vec<f32> {
        let (mut state, mut skeleton, _) = setup();
        state.data_mut().set_mix("a", "walk", 0.3).unwrap();
        state.set_animation(0, "a", true).unwrap();
        state.add_animation(0, "walk", true, 0.4).unwrap();
        state.set_animation(1, "spin", true).unwrap();
        let mut samples = Vec::new();
        for frame in 0..40 {
            if frame == 25 {
                state.set_empty_animation(1, 0.2).unwrap();
            }
            step(&mut state, &mut skeleton, 1.0 / 30.0);
            samples.push(skeleton.bones[0].x);
            samples.push(skeleton.bones[1].rotation);
        }
        samples
    }

    assert_eq!(run(), run());
}

#[test]
fn apply_rejects_skeleton_missing_targets() {
    let data = skeleton_data();
    let mut state = AnimationState::new(AnimationStateData::new(data));
    state.set_animation(0, "spin", true).unwrap();
    state.update(0.25);

    let small = SkeletonData::new(vec![BoneData::new("root", None)], Vec::new()).unwrap();
    let mut skeleton = Skeleton::new(Arc::new(small));
    skeleton.bones[0].x = 3.0;

    let err = state.apply(&mut skeleton).unwrap_err();
    assert!(
        matches!(
            err,
            Error::TimelineTargetOutOfRange {
                kind: TargetKind::Bone,
                index: 1,
                len: 1,
                ..
            }
        ),
        "{err}"
    );
    assert_approx(skeleton.bones[0].x, 3.0);
}

#[test]
fn foreign_animation_is_validated() {
    let (mut state, _, _) = setup();
    let foreign = Arc::new(
        Animation::new(
            "tail",
            vec![Timeline::Rotate(CurveTimeline::new(5, keys(&[(0.0, 1.0)])))],
            None,
        )
        .unwrap(),
    );
    assert!(state.set_animation_with(0, Some(foreign.clone()), true).is_err());
    assert!(state.add_animation_with(0, foreign, true, 0.0).is_err());
    assert!(state.current(0).is_none());
}

#[test]
fn invalid_delay_and_mix_are_rejected() {
    let (mut state, _, _) = setup();
    assert!(matches!(
        state.add_animation(0, "a", true, f32::NAN),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(
        state.set_empty_animation(0, -1.0),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(
        state.add_empty_animation(0, f32::INFINITY, 0.0),
        Err(Error::InvalidValue { .. })
    ));
    assert!(state.current(0).is_none());
}

#[test]
fn stale_handle_setters_do_nothing() {
    let (mut state, _, _) = setup();
    let a = state.set_animation(0, "a", true).unwrap();
    state.clear_track(0);
    assert!(state.entry(a).is_none());

    a.set_alpha(&mut state, 0.5);
    a.set_time_scale(&mut state, 2.0);
    assert!(state.entry(a).is_none());
}

#[test]
fn mix_progress_is_clamped() {
    let (mut state, mut skeleton, _) = setup();
    state.data_mut().set_mix("a", "b", 0.5).unwrap();
    state.set_animation(0, "a", true).unwrap();
    step(&mut state, &mut skeleton, 0.1);

    let b = state.set_animation(0, "b", true).unwrap();
    assert_approx(state.entry(b).unwrap().mix_progress(), 0.0);
    step(&mut state, &mut skeleton, 0.25);
    assert_approx(state.entry(b).unwrap().mix_progress(), 0.5);
    step(&mut state, &mut skeleton, 1.0);
    assert_approx(state.entry(b).unwrap().mix_progress(), 1.0);
}
