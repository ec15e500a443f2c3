use crate::runtime::{MixBlend, MixDirection};
use crate::{
    Animation, AnimationState, AnimationStateData, AttachmentFrame, AttachmentTimeline, BoneData,
    CurveFrame, CurveTimeline, Error, IkConstraintData, IkConstraintTimeline, IkFrame, Skeleton,
    SkeletonData, SkinData, SlotData, TargetKind, Timeline, TransformConstraintData,
};
use std::sync::Arc;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-4,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn bone(name: &str, parent: Option<usize>, x: f32, y: f32, length: f32) -> BoneData {
    BoneData {
        x,
        y,
        length,
        ..BoneData::new(name, parent)
    }
}

fn one_bone_ik() -> Arc<SkeletonData> {
    let mut data = SkeletonData::new(
        vec![
            bone("root", None, 0.0, 0.0, 0.0),
            bone("upper", Some(0), 0.0, 0.0, 10.0),
            bone("hand", Some(1), 10.0, 0.0, 0.0),
            bone("target", Some(0), 0.0, 10.0, 0.0),
        ],
        Vec::new(),
    )
    .unwrap();
    data.ik_constraints
        .push(IkConstraintData::new("reach", vec![1], 3));
    let timeline = Timeline::IkConstraint(IkConstraintTimeline {
        constraint: 0,
        frames: vec![IkFrame::new(0.0, 0.0, 0.0), IkFrame::new(1.0, 1.0, 0.0)],
    });
    data.add_animation(Animation::new("reach", vec![timeline], None).unwrap())
        .unwrap();
    Arc::new(data)
}

fn two_bone_ik(bend_direction: i32) -> Skeleton {
    let mut data = SkeletonData::new(
        vec![
            bone("root", None, 0.0, 0.0, 0.0),
            bone("upper", Some(0), 0.0, 0.0, 10.0),
            bone("lower", Some(1), 10.0, 0.0, 10.0),
            bone("target", Some(0), 10.0, 10.0, 0.0),
        ],
        Vec::new(),
    )
    .unwrap();
    data.ik_constraints.push(IkConstraintData {
        bend_direction,
        ..IkConstraintData::new("leg", vec![1, 2], 3)
    });
    Skeleton::new(Arc::new(data))
}

fn follow(local: bool) -> Skeleton {
    let mut data = SkeletonData::new(
        vec![
            bone("root", None, 0.0, 0.0, 0.0),
            BoneData {
                rotation: 30.0,
                ..bone("source", Some(0), 5.0, 0.0, 0.0)
            },
            bone("follower", Some(0), 0.0, 0.0, 0.0),
        ],
        Vec::new(),
    )
    .unwrap();
    let mix = if local { 1.0 } else { 0.5 };
    data.transform_constraints.push(TransformConstraintData {
        local,
        mix_rotate: mix,
        mix_x: mix,
        mix_y: mix,
        mix_scale_x: 0.0,
        mix_scale_y: 0.0,
        mix_shear_y: 0.0,
        ..TransformConstraintData::new("follow", vec![2], 1)
    });
    Skeleton::new(Arc::new(data))
}

#[test]
fn animated_ik_mix_rotates_the_chain_toward_the_target() {
    let data = one_bone_ik();
    let mut skeleton = Skeleton::new(data.clone());
    let mut state = AnimationState::new(AnimationStateData::new(data));
    state.set_animation(0, "reach", false).unwrap();

    state.update(0.0);
    state.apply(&mut skeleton).unwrap();
    skeleton.update_world_transform();
    assert_approx(skeleton.bones[1].world_rotation_x(), 0.0);
    assert_approx(skeleton.bones[2].world_x, 10.0);

    state.update(0.5);
    state.apply(&mut skeleton).unwrap();
    skeleton.update_world_transform();
    assert_approx(skeleton.ik_constraints[0].mix, 0.5);
    assert_approx(skeleton.bones[1].world_rotation_x(), 45.0);
    assert_approx(skeleton.bones[2].world_x, 7.071_068);
    assert_approx(skeleton.bones[2].world_y, 7.071_068);
    // Solving writes the applied pose only.
    assert_approx(skeleton.bones[1].rotation, 0.0);

    state.update(0.5);
    state.apply(&mut skeleton).unwrap();
    skeleton.update_world_transform();
    assert_approx(skeleton.bones[1].world_rotation_x(), 90.0);
    assert_approx(skeleton.bones[2].world_x, 0.0);
    assert_approx(skeleton.bones[2].world_y, 10.0);
}

#[test]
fn two_bone_ik_bends_positive() {
    let mut skeleton = two_bone_ik(1);
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].arotation, 0.0);
    assert_approx(skeleton.bones[2].arotation, 90.0);
    let [x, y] = skeleton.bones[2].local_to_world(10.0, 0.0);
    assert_approx(x, 10.0);
    assert_approx(y, 10.0);
}

#[test]
fn two_bone_ik_bends_negative() {
    let mut skeleton = two_bone_ik(-1);
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].arotation, 90.0);
    assert_approx(skeleton.bones[2].world_x, 0.0);
    assert_approx(skeleton.bones[2].world_y, 10.0);
    let [x, y] = skeleton.bones[2].local_to_world(10.0, 0.0);
    assert_approx(x, 10.0);
    assert_approx(y, 10.0);
}

#[test]
fn ik_with_zero_mix_leaves_pose_alone() {
    let mut skeleton = two_bone_ik(1);
    skeleton.ik_constraints[0].mix = 0.0;
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[2].world_x, 10.0);
    assert_approx(skeleton.bones[2].world_y, 0.0);
    assert_approx(skeleton.bones[2].world_rotation_x(), 0.0);
}

#[test]
fn world_transform_constraint_mixes_toward_target() {
    let mut skeleton = follow(false);
    skeleton.update_world_transform();

    let follower = &skeleton.bones[2];
    assert_approx(follower.world_rotation_x(), 15.0);
    assert_approx(follower.world_x, 2.5);
    assert_approx(follower.world_y, 0.0);
    assert_approx(follower.world_scale_x(), 1.0);
    assert_approx(follower.arotation, 15.0);
    assert_approx(follower.ax, 2.5);
}

#[test]
fn local_transform_constraint_copies_target_local_pose() {
    let mut skeleton = follow(true);
    skeleton.update_world_transform();

    let follower = &skeleton.bones[2];
    assert_approx(follower.world_rotation_x(), 30.0);
    assert_approx(follower.world_x, 5.0);
    assert_approx(follower.world_y, 0.0);
}

#[test]
fn constraint_order_decides_which_runs_first() {
    let mut data = SkeletonData::new(
        vec![
            bone("root", None, 0.0, 0.0, 0.0),
            bone("upper", Some(0), 0.0, 0.0, 10.0),
            bone("target", Some(0), 0.0, 10.0, 0.0),
            bone("follower", Some(0), 0.0, 0.0, 0.0),
        ],
        Vec::new(),
    )
    .unwrap();
    data.transform_constraints.push(TransformConstraintData {
        order: 1,
        mix_x: 0.0,
        mix_y: 0.0,
        mix_scale_x: 0.0,
        mix_scale_y: 0.0,
        mix_shear_y: 0.0,
        ..TransformConstraintData::new("copy", vec![3], 1)
    });
    data.ik_constraints.push(IkConstraintData {
        order: 0,
        ..IkConstraintData::new("reach", vec![1], 2)
    });
    let mut skeleton = Skeleton::new(Arc::new(data));
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_rotation_x(), 90.0);
    assert_approx(skeleton.bones[3].world_rotation_x(), 90.0);
}

fn skinned() -> Arc<SkeletonData> {
    let mut data = SkeletonData::new(
        vec![
            bone("root", None, 0.0, 0.0, 0.0),
            BoneData {
                skin_required: true,
                ..bone("cape", Some(0), 0.0, 0.0, 0.0)
            },
        ],
        vec![
            SlotData {
                attachment: Some("body".to_string()),
                ..SlotData::new("body", 0)
            },
            SlotData {
                attachment: Some("cape".to_string()),
                ..SlotData::new("cape", 1)
            },
        ],
    )
    .unwrap();

    let mut default = SkinData::new("default");
    default.set_attachment(0, "body", "body-default");
    default.set_attachment(0, "alt", "alt-default");
    data.add_skin(default);

    let mut red = SkinData::new("red");
    red.set_attachment(0, "body", "body-red");
    red.set_attachment(0, "alt", "alt-red");
    red.set_attachment(1, "cape", "cape-red");
    red.bones.push(1);
    data.add_skin(red);

    let swap = Timeline::Attachment(AttachmentTimeline {
        slot: 0,
        frames: vec![
            AttachmentFrame {
                time: 0.0,
                name: Some("alt".to_string()),
            },
            AttachmentFrame {
                time: 1.0,
                name: Some("ghost".to_string()),
            },
        ],
    });
    data.add_animation(Animation::new("swap", vec![swap], None).unwrap())
        .unwrap();
    Arc::new(data)
}

#[test]
fn setup_attachments_resolve_through_default_skin() {
    let skeleton = Skeleton::new(skinned());

    assert_eq!(skeleton.skin(), None);
    assert_eq!(skeleton.slot_attachment(0), Some("body-default"));
    assert_eq!(skeleton.slot_attachment(1), None);
    assert!(!skeleton.bones[1].active);
    assert!(!skeleton.is_active(TargetKind::Slot, 1));
}

#[test]
fn unknown_skin_is_rejected() {
    let mut skeleton = Skeleton::new(skinned());
    let err = skeleton.set_skin(Some("blue")).unwrap_err();
    assert!(matches!(err, Error::UnknownSkin { name } if name == "blue"));
    assert_eq!(skeleton.skin(), None);
}

#[test]
fn setting_a_skin_attaches_its_setup_attachments() {
    let mut skeleton = Skeleton::new(skinned());
    skeleton.set_skin(Some("red")).unwrap();

    assert_eq!(skeleton.skin(), Some("red"));
    assert_eq!(skeleton.slot_attachment(0), Some("body-red"));
    assert_eq!(skeleton.slot_attachment(1), Some("cape-red"));
    assert!(skeleton.bones[1].active);
    assert_eq!(skeleton.attachment(0, "alt"), Some("alt-red"));
}

#[test]
fn switching_skins_keeps_attachments_the_new_skin_lacks() {
    let mut skeleton = Skeleton::new(skinned());
    skeleton.set_skin(Some("red")).unwrap();
    skeleton.set_skin(Some("default")).unwrap();

    assert_eq!(skeleton.slot_attachment(0), Some("body-default"));
    assert_eq!(skeleton.slot_attachment(1), Some("cape-red"));
    assert!(!skeleton.bones[1].active);
}

#[test]
fn attachment_keys_resolve_through_current_skin() {
    let data = skinned();
    let mut skeleton = Skeleton::new(data.clone());
    skeleton.set_skin(Some("red")).unwrap();
    let mut state = AnimationState::new(AnimationStateData::new(data));
    state.set_animation(0, "swap", false).unwrap();

    state.update(0.0);
    state.apply(&mut skeleton).unwrap();
    assert_eq!(skeleton.slots[0].attachment.as_deref(), Some("alt"));
    assert_eq!(skeleton.slot_attachment(0), Some("alt-red"));

    // No skin has this key.
    state.update(1.0);
    state.apply(&mut skeleton).unwrap();
    assert_eq!(skeleton.slots[0].attachment, None);
    assert_eq!(skeleton.slot_attachment(0), None);
}

#[test]
fn timelines_skip_bones_the_skin_does_not_enable() {
    let mut skeleton = Skeleton::new(skinned());
    let rotate = Timeline::Rotate(CurveTimeline::new(1, vec![CurveFrame::linear(0.0, [45.0])]));

    rotate.apply(&mut skeleton, -1.0, 0.0, None, 1.0, MixBlend::Setup, MixDirection::In);
    assert_approx(skeleton.bones[1].rotation, 0.0);

    skeleton.set_skin(Some("red")).unwrap();
    rotate.apply(&mut skeleton, -1.0, 0.0, None, 1.0, MixBlend::Setup, MixDirection::In);
    assert_approx(skeleton.bones[1].rotation, 45.0);
}
