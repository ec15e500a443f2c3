use crate::{
    BoneData, IkConstraintData, Inherit, PathConstraintData, Skeleton, SkeletonData, SlotData,
    TransformConstraintData,
};
use std::sync::Arc;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-6,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn bone(name: &str, parent: Option<usize>, x: f32, y: f32, rotation: f32) -> BoneData {
    BoneData {
        x,
        y,
        rotation,
        ..BoneData::new(name, parent)
    }
}

fn skeleton(bones: Vec<BoneData>) -> Skeleton {
    Skeleton::new(Arc::new(SkeletonData::new(bones, Vec::new()).unwrap()))
}

#[test]
fn update_world_transform_root_and_child() {
    let mut skeleton = skeleton(vec![
        bone("root", None, 10.0, 20.0, 0.0),
        bone("child", Some(0), 5.0, 0.0, 90.0),
    ]);
    skeleton.update_world_transform();

    let root = &skeleton.bones[0];
    assert_approx(root.world_x, 10.0);
    assert_approx(root.world_y, 20.0);
    assert_approx(root.a, 1.0);
    assert_approx(root.b, 0.0);
    assert_approx(root.c, 0.0);
    assert_approx(root.d, 1.0);

    let child = &skeleton.bones[1];
    assert_approx(child.world_x, 15.0);
    assert_approx(child.world_y, 20.0);
    assert_approx(child.a, 0.0);
    assert_approx(child.b, -1.0);
    assert_approx(child.c, 1.0);
    assert_approx(child.d, 0.0);
}

#[test]
fn update_world_transform_parent_rotation_affects_child_translation() {
    let mut skeleton = skeleton(vec![
        bone("root", None, 0.0, 0.0, 90.0),
        bone("child", Some(0), 1.0, 0.0, 0.0),
    ]);
    skeleton.update_world_transform();

    let child = &skeleton.bones[1];
    assert_approx(child.world_x, 0.0);
    assert_approx(child.world_y, 1.0);
    assert!((child.world_rotation_x() - 90.0).abs() < 1.0e-4);
}

#[test]
fn skeleton_position_and_scale_apply_to_root() {
    let mut skeleton = skeleton(vec![bone("root", None, 2.0, 3.0, 0.0)]);
    skeleton.x = 100.0;
    skeleton.y = 50.0;
    skeleton.scale_x = 2.0;
    skeleton.scale_y = -1.0;
    skeleton.update_world_transform();

    let root = &skeleton.bones[0];
    assert_approx(root.world_x, 104.0);
    assert_approx(root.world_y, 47.0);
    assert_approx(root.world_scale_x(), 2.0);
    assert_approx(root.d, -1.0);
}

#[test]
fn only_translation_ignores_parent_rotation() {
    let mut child = bone("child", Some(0), 1.0, 0.0, 0.0);
    child.inherit = Inherit::OnlyTranslation;
    let mut skeleton = skeleton(vec![bone("root", None, 0.0, 0.0, 90.0), child]);
    skeleton.update_world_transform();

    let child = &skeleton.bones[1];
    assert_approx(child.world_x, 0.0);
    assert_approx(child.world_y, 1.0);
    assert_approx(child.a, 1.0);
    assert_approx(child.d, 1.0);
}

#[test]
fn no_scale_keeps_unit_axes_under_scaled_parent() {
    let mut root = bone("root", None, 0.0, 0.0, 0.0);
    root.scale_x = 3.0;
    root.scale_y = 3.0;
    let mut child = bone("child", Some(0), 1.0, 0.0, 0.0);
    child.inherit = Inherit::NoScale;
    let mut skeleton = skeleton(vec![root, child]);
    skeleton.update_world_transform();

    let child = &skeleton.bones[1];
    assert_approx(child.world_x, 3.0);
    assert_approx(child.world_scale_x(), 1.0);
    assert_approx(child.world_scale_y(), 1.0);
}

#[test]
fn local_to_world_uses_bone_matrix() {
    let mut skeleton = skeleton(vec![bone("root", None, 5.0, 0.0, 90.0)]);
    skeleton.update_world_transform();
    let [x, y] = skeleton.bones[0].local_to_world(2.0, 0.0);
    assert_approx(x, 5.0);
    assert_approx(y, 2.0);
}

#[test]
fn set_to_setup_pose_restores_everything() {
    let mut data = SkeletonData::new(
        vec![bone("root", None, 1.0, 2.0, 30.0)],
        vec![
            SlotData {
                attachment: Some("body".to_string()),
                ..SlotData::new("body", 0)
            },
            SlotData::new("arm", 0),
        ],
    )
    .unwrap();
    data.ik_constraints
        .push(IkConstraintData::new("aim", vec![0], 0));
    data.transform_constraints
        .push(TransformConstraintData::new("follow", vec![0], 0));
    data.path_constraints.push(PathConstraintData::new("rail"));
    let mut skeleton = Skeleton::new(Arc::new(data));

    skeleton.bones[0].rotation = 120.0;
    skeleton.bones[0].x = -4.0;
    skeleton.slots[0].set_attachment(None);
    skeleton.slots[1].color = [0.5, 0.5, 0.5, 0.25];
    skeleton.draw_order = vec![1, 0];
    skeleton.ik_constraints[0].mix = 0.0;
    skeleton.ik_constraints[0].bend_direction = -1;
    skeleton.transform_constraints[0].mix_x = 0.0;
    skeleton.path_constraints[0].position = 7.0;

    skeleton.set_to_setup_pose();

    assert_approx(skeleton.bones[0].rotation, 30.0);
    assert_approx(skeleton.bones[0].x, 1.0);
    assert_eq!(skeleton.slots[0].attachment.as_deref(), Some("body"));
    assert_eq!(skeleton.slots[1].color, [1.0; 4]);
    assert_eq!(skeleton.draw_order, vec![0, 1]);
    assert_approx(skeleton.ik_constraints[0].mix, 1.0);
    assert_eq!(skeleton.ik_constraints[0].bend_direction, 1);
    assert_approx(skeleton.transform_constraints[0].mix_x, 1.0);
    assert_approx(skeleton.path_constraints[0].position, 0.0);
}

#[test]
fn changing_attachment_discards_deform() {
    let data = SkeletonData::new(
        vec![bone("root", None, 0.0, 0.0, 0.0)],
        vec![SlotData {
            attachment: Some("a".to_string()),
            ..SlotData::new("slot", 0)
        }],
    )
    .unwrap();
    let mut skeleton = Skeleton::new(Arc::new(data));
    skeleton.slots[0].deform = vec![1.0, 2.0];

    skeleton.slots[0].set_attachment(Some("a"));
    assert_eq!(skeleton.slots[0].deform.len(), 2);

    skeleton.slots[0].set_attachment(Some("b"));
    assert!(skeleton.slots[0].deform.is_empty());
}

#[test]
fn find_by_name() {
    let skeleton = skeleton(vec![
        bone("root", None, 0.0, 0.0, 0.0),
        bone("hip", Some(0), 0.0, 0.0, 0.0),
    ]);
    assert_eq!(skeleton.find_bone("hip").map(|b| b.data_index()), Some(1));
    assert_eq!(skeleton.find_bone("hip").and_then(|b| b.parent_index()), Some(0));
    assert!(skeleton.find_slot("missing").is_none());
}
