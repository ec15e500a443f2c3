use crate::{
    Animation, AttachmentTimeline, Bone, BoneData, CurveTimeline, DeformTimeline, DrawOrderTimeline,
    Event, IkConstraint, IkConstraintTimeline, Skeleton, TargetKind, Timeline,
};

/// How a timeline's value is combined with the pose already in the skeleton.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MixBlend {
    /// Mix between the setup pose and the timeline value.
    Setup,
    /// Like `Setup` before the first key, `Replace` after it.
    First,
    /// Mix between the current pose and the timeline value.
    #[default]
    Replace,
    /// Add the timeline value to the current pose.
    Add,
}

/// Whether the animation is mixing in (towards its own values) or out (towards the setup pose).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MixDirection {
    In,
    Out,
}

pub(crate) const ATTACHMENT_STATE_SETUP: i32 = 1;
pub(crate) const ATTACHMENT_STATE_CURRENT: i32 = 2;

/// Applies every timeline of `animation` at `time`.
///
/// When `looped`, both times wrap to the animation's duration. Events keyed in `(last_time, time]`
/// are appended to `events` when given.
#[allow(clippy::too_many_arguments)]
pub fn apply_animation(
    animation: &Animation,
    skeleton: &mut Skeleton,
    last_time: f32,
    time: f32,
    looped: bool,
    mut events: Option<&mut Vec<Event>>,
    alpha: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    let mut time = time;
    let mut last_time = last_time;
    let duration = animation.duration();
    if looped && duration != 0.0 {
        time %= duration;
        if last_time > 0.0 {
            last_time %= duration;
        }
    }

    for timeline in animation.timelines() {
        timeline.apply(
            skeleton,
            last_time,
            time,
            events.as_deref_mut(),
            alpha,
            blend,
            direction,
        );
    }
}

impl Timeline {
    /// Writes this timeline's value at `time` into `skeleton`, mixed by `alpha`.
    ///
    /// Only event timelines read `last_time`, to fire keys in `(last_time, time]`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &self,
        skeleton: &mut Skeleton,
        last_time: f32,
        time: f32,
        events: Option<&mut Vec<Event>>,
        alpha: f32,
        blend: MixBlend,
        direction: MixDirection,
    ) {
        use BoneProperty as B;
        if let Some((kind, index)) = self.target() {
            if !skeleton.is_active(kind, index) {
                return;
            }
        }
        match self {
            Timeline::Rotate(t) => apply_bone_relative(t, [B::Rotation], skeleton, time, alpha, blend),
            Timeline::Translate(t) => apply_bone_relative(t, [B::X, B::Y], skeleton, time, alpha, blend),
            Timeline::TranslateX(t) => apply_bone_relative(t, [B::X], skeleton, time, alpha, blend),
            Timeline::TranslateY(t) => apply_bone_relative(t, [B::Y], skeleton, time, alpha, blend),
            Timeline::Scale(t) => apply_bone_scale(
                t,
                [B::ScaleX, B::ScaleY],
                skeleton,
                time,
                alpha,
                blend,
                direction,
            ),
            Timeline::ScaleX(t) => {
                apply_bone_scale(t, [B::ScaleX], skeleton, time, alpha, blend, direction)
            }
            Timeline::ScaleY(t) => {
                apply_bone_scale(t, [B::ScaleY], skeleton, time, alpha, blend, direction)
            }
            Timeline::Shear(t) => {
                apply_bone_relative(t, [B::ShearX, B::ShearY], skeleton, time, alpha, blend)
            }
            Timeline::ShearX(t) => apply_bone_relative(t, [B::ShearX], skeleton, time, alpha, blend),
            Timeline::ShearY(t) => apply_bone_relative(t, [B::ShearY], skeleton, time, alpha, blend),
            Timeline::Rgba(t) => {
                let (Some(slot), Some(data)) =
                    (skeleton.slots.get_mut(t.target), skeleton.data.slots.get(t.target))
                else {
                    return;
                };
                let [r, g, b, a] = &mut slot.color;
                apply_absolute(t, [r, g, b, a], data.color, time, alpha, blend);
            }
            Timeline::Rgb(t) => {
                let (Some(slot), Some(data)) =
                    (skeleton.slots.get_mut(t.target), skeleton.data.slots.get(t.target))
                else {
                    return;
                };
                let [r, g, b, _] = &mut slot.color;
                let [sr, sg, sb, _] = data.color;
                apply_absolute(t, [r, g, b], [sr, sg, sb], time, alpha, blend);
            }
            Timeline::Alpha(t) => {
                let (Some(slot), Some(data)) =
                    (skeleton.slots.get_mut(t.target), skeleton.data.slots.get(t.target))
                else {
                    return;
                };
                apply_absolute(t, [&mut slot.color[3]], [data.color[3]], time, alpha, blend);
            }
            Timeline::Rgba2(t) => {
                let (Some(slot), Some(data)) =
                    (skeleton.slots.get_mut(t.target), skeleton.data.slots.get(t.target))
                else {
                    return;
                };
                let setup_dark = data.dark_color.unwrap_or([0.0; 3]);
                let [sr, sg, sb, sa] = data.color;
                let [dr0, dg0, db0] = setup_dark;
                let [r, g, b, a] = &mut slot.color;
                let [dr, dg, db] = slot.dark_color.get_or_insert(setup_dark);
                apply_absolute(
                    t,
                    [r, g, b, a, dr, dg, db],
                    [sr, sg, sb, sa, dr0, dg0, db0],
                    time,
                    alpha,
                    blend,
                );
            }
            Timeline::Attachment(t) => {
                if direction == MixDirection::Out {
                    if blend == MixBlend::Setup {
                        let setup = skeleton
                            .data
                            .slots
                            .get(t.slot)
                            .and_then(|s| s.attachment.clone());
                        skeleton.attach(t.slot, setup.as_deref());
                    }
                    return;
                }
                apply_attachment(t, skeleton, time, blend, None);
            }
            Timeline::Deform(t) => apply_deform(t, skeleton, time, alpha, blend),
            Timeline::DrawOrder(t) => apply_draw_order(t, skeleton, time, blend, direction),
            Timeline::Event(t) => {
                if let Some(events) = events {
                    t.collect(last_time, time, events);
                }
            }
            Timeline::IkConstraint(t) => {
                apply_ik_constraint(t, skeleton, time, alpha, blend, direction)
            }
            Timeline::TransformConstraint(t) => {
                let (Some(c), Some(data)) = (
                    skeleton.transform_constraints.get_mut(t.target),
                    skeleton.data.transform_constraints.get(t.target),
                ) else {
                    return;
                };
                apply_absolute(t, c.mixes_mut(), data.mixes(), time, alpha, blend);
            }
            Timeline::PathConstraintPosition(t) => {
                let (Some(c), Some(data)) = (
                    skeleton.path_constraints.get_mut(t.target),
                    skeleton.data.path_constraints.get(t.target),
                ) else {
                    return;
                };
                apply_absolute(t, [&mut c.position], [data.position], time, alpha, blend);
            }
            Timeline::PathConstraintSpacing(t) => {
                let (Some(c), Some(data)) = (
                    skeleton.path_constraints.get_mut(t.target),
                    skeleton.data.path_constraints.get(t.target),
                ) else {
                    return;
                };
                apply_absolute(t, [&mut c.spacing], [data.spacing], time, alpha, blend);
            }
            Timeline::PathConstraintMix(t) => {
                let (Some(c), Some(data)) = (
                    skeleton.path_constraints.get_mut(t.target),
                    skeleton.data.path_constraints.get(t.target),
                ) else {
                    return;
                };
                apply_absolute(
                    t,
                    [&mut c.mix_rotate, &mut c.mix_x, &mut c.mix_y],
                    [data.mix_rotate, data.mix_x, data.mix_y],
                    time,
                    alpha,
                    blend,
                );
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum BoneProperty {
    Rotation,
    X,
    Y,
    ScaleX,
    ScaleY,
    ShearX,
    ShearY,
}

impl BoneProperty {
    fn get_mut(self, bone: &mut Bone) -> &mut f32 {
        match self {
            BoneProperty::Rotation => &mut bone.rotation,
            BoneProperty::X => &mut bone.x,
            BoneProperty::Y => &mut bone.y,
            BoneProperty::ScaleX => &mut bone.scale_x,
            BoneProperty::ScaleY => &mut bone.scale_y,
            BoneProperty::ShearX => &mut bone.shear_x,
            BoneProperty::ShearY => &mut bone.shear_y,
        }
    }

    fn setup(self, data: &BoneData) -> f32 {
        match self {
            BoneProperty::Rotation => data.rotation,
            BoneProperty::X => data.x,
            BoneProperty::Y => data.y,
            BoneProperty::ScaleX => data.scale_x,
            BoneProperty::ScaleY => data.scale_y,
            BoneProperty::ShearX => data.shear_x,
            BoneProperty::ShearY => data.shear_y,
        }
    }
}

/// Rotation, translation and shear: key values are offsets from the setup pose.
fn apply_bone_relative<const N: usize>(
    timeline: &CurveTimeline<N>,
    properties: [BoneProperty; N],
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let (Some(bone), Some(data)) = (
        skeleton.bones.get_mut(timeline.target),
        skeleton.data.bones.get(timeline.target),
    ) else {
        return;
    };

    if time < timeline.first_time() {
        for property in properties {
            let setup = property.setup(data);
            let current = property.get_mut(bone);
            match blend {
                MixBlend::Setup => *current = setup,
                MixBlend::First => *current += (setup - *current) * alpha,
                _ => {}
            }
        }
        return;
    }

    let values = timeline.sample(time);
    for (property, value) in properties.into_iter().zip(values) {
        let setup = property.setup(data);
        let current = property.get_mut(bone);
        match blend {
            MixBlend::Setup => *current = setup + value * alpha,
            MixBlend::First | MixBlend::Replace => *current += (value + setup - *current) * alpha,
            MixBlend::Add => *current += value * alpha,
        }
    }
}

fn signum(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Scale keys are multipliers of the setup scale. Mixing keeps the sign of the side being mixed
/// from so a flip happens at once instead of passing through zero.
#[allow(clippy::too_many_arguments)]
fn apply_bone_scale<const N: usize>(
    timeline: &CurveTimeline<N>,
    properties: [BoneProperty; N],
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    let (Some(bone), Some(data)) = (
        skeleton.bones.get_mut(timeline.target),
        skeleton.data.bones.get(timeline.target),
    ) else {
        return;
    };

    if time < timeline.first_time() {
        for property in properties {
            let setup = property.setup(data);
            let current = property.get_mut(bone);
            match blend {
                MixBlend::Setup => *current = setup,
                MixBlend::First => *current += (setup - *current) * alpha,
                _ => {}
            }
        }
        return;
    }

    let values = timeline.sample(time);
    for (property, mult) in properties.into_iter().zip(values) {
        let setup = property.setup(data);
        let current = property.get_mut(bone);
        let value = mult * setup;

        if alpha == 1.0 {
            if blend == MixBlend::Add {
                *current += value - setup;
            } else {
                *current = value;
            }
            continue;
        }

        *current = match (direction, blend) {
            (_, MixBlend::Add) => *current + (value - setup) * alpha,
            (MixDirection::Out, MixBlend::Setup) => {
                setup + (value.abs() * signum(setup) - setup) * alpha
            }
            (MixDirection::Out, _) => {
                *current + (value.abs() * signum(*current) - *current) * alpha
            }
            (MixDirection::In, MixBlend::Setup) => {
                let from = setup.abs() * signum(value);
                from + (value - from) * alpha
            }
            (MixDirection::In, _) => {
                let from = current.abs() * signum(value);
                from + (value - from) * alpha
            }
        };
    }
}

/// Colors and constraint parameters: key values replace the pose rather than offsetting it.
fn apply_absolute<const N: usize>(
    timeline: &CurveTimeline<N>,
    current: [&mut f32; N],
    setup: [f32; N],
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    if time < timeline.first_time() {
        for (current, setup) in current.into_iter().zip(setup) {
            match blend {
                MixBlend::Setup => *current = setup,
                MixBlend::First => *current += (setup - *current) * alpha,
                _ => {}
            }
        }
        return;
    }

    let values = timeline.sample(time);
    for ((current, setup), value) in current.into_iter().zip(setup).zip(values) {
        if alpha == 1.0 {
            *current = value;
        } else if blend == MixBlend::Setup {
            *current = setup + (value - setup) * alpha;
        } else {
            *current += (value - *current) * alpha;
        }
    }
}

/// Bookkeeping [`crate::AnimationState`] passes so attachments it did not key this frame can be
/// restored to setup afterwards.
#[derive(Copy, Clone, Debug)]
pub(crate) struct AttachmentKeying {
    pub(crate) attachments: bool,
    pub(crate) unkeyed_state: i32,
}

pub(crate) fn apply_attachment(
    timeline: &AttachmentTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    blend: MixBlend,
    keying: Option<AttachmentKeying>,
) {
    if !skeleton.is_active(TargetKind::Slot, timeline.slot) {
        return;
    }
    let data = skeleton.data.clone();
    let setup = data
        .slots
        .get(timeline.slot)
        .and_then(|s| s.attachment.as_deref());

    match timeline.sample(time) {
        None => {
            if matches!(blend, MixBlend::Setup | MixBlend::First) {
                set_attachment(skeleton, timeline.slot, setup, keying);
            }
        }
        Some(name) => set_attachment(skeleton, timeline.slot, name, keying),
    }

    if let (Some(keying), Some(slot)) = (keying, skeleton.slots.get_mut(timeline.slot)) {
        if slot.attachment_state <= keying.unkeyed_state {
            slot.attachment_state = keying.unkeyed_state + ATTACHMENT_STATE_SETUP;
        }
    }
}

fn set_attachment(
    skeleton: &mut Skeleton,
    slot_index: usize,
    name: Option<&str>,
    keying: Option<AttachmentKeying>,
) {
    skeleton.attach(slot_index, name);
    if let (Some(keying), Some(slot)) = (keying, skeleton.slots.get_mut(slot_index)) {
        if keying.attachments {
            slot.attachment_state = keying.unkeyed_state + ATTACHMENT_STATE_CURRENT;
        }
    }
}

pub(crate) fn apply_draw_order(
    timeline: &DrawOrderTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    let slot_count = skeleton.slots.len();
    let reset = |draw_order: &mut Vec<usize>| {
        draw_order.clear();
        draw_order.extend(0..slot_count);
    };

    if direction == MixDirection::Out {
        if blend == MixBlend::Setup {
            reset(&mut skeleton.draw_order);
        }
        return;
    }

    match timeline.sample(time) {
        None => {
            if matches!(blend, MixBlend::Setup | MixBlend::First) {
                reset(&mut skeleton.draw_order);
            }
        }
        Some(Some(order)) if order.len() == slot_count => {
            skeleton.draw_order.clear();
            skeleton.draw_order.extend_from_slice(order);
        }
        Some(Some(_)) => {}
        Some(None) => reset(&mut skeleton.draw_order),
    }
}

/// Deform offsets are relative to the attachment's setup vertices, so the setup pose is all zeros.
fn apply_deform(
    timeline: &DeformTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let Some(slot) = skeleton.slots.get_mut(timeline.slot) else {
        return;
    };
    if slot.attachment.as_deref() != Some(timeline.attachment.as_str()) {
        return;
    }
    let deform = &mut slot.deform;

    if time < timeline.first_time() {
        match blend {
            MixBlend::Setup => deform.clear(),
            MixBlend::First => {
                if alpha == 1.0 {
                    deform.clear();
                } else {
                    for d in deform.iter_mut() {
                        *d -= *d * alpha;
                    }
                }
            }
            _ => {}
        }
        return;
    }

    let vertex_count = timeline.vertex_count();
    let mut blend = blend;
    if deform.len() != vertex_count {
        deform.clear();
        deform.resize(vertex_count, 0.0);
        blend = MixBlend::Setup;
    }

    let sample = timeline.bracket(time);
    if alpha == 1.0 {
        for (i, d) in deform.iter_mut().enumerate() {
            if blend == MixBlend::Add {
                *d += sample.value(i);
            } else {
                *d = sample.value(i);
            }
        }
        return;
    }

    for (i, d) in deform.iter_mut().enumerate() {
        let value = sample.value(i);
        match blend {
            MixBlend::Setup => *d = value * alpha,
            MixBlend::First | MixBlend::Replace => *d += (value - *d) * alpha,
            MixBlend::Add => *d += value * alpha,
        }
    }
}

fn apply_ik_constraint(
    timeline: &IkConstraintTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    let (Some(constraint), Some(data)) = (
        skeleton.ik_constraints.get_mut(timeline.constraint),
        skeleton.data.ik_constraints.get(timeline.constraint),
    ) else {
        return;
    };

    if time < timeline.first_time() {
        match blend {
            MixBlend::Setup => {
                constraint.mix = data.mix;
                constraint.softness = data.softness;
            }
            MixBlend::First => {
                constraint.mix += (data.mix - constraint.mix) * alpha;
                constraint.softness += (data.softness - constraint.softness) * alpha;
            }
            _ => return,
        }
        set_ik_discrete(constraint, data.bend_direction, data.compress, data.stretch);
        return;
    }

    let Some((mix, softness, frame)) = timeline.sample(time) else {
        return;
    };

    if blend == MixBlend::Setup {
        constraint.mix = data.mix + (mix - data.mix) * alpha;
        constraint.softness = data.softness + (softness - data.softness) * alpha;
        match direction {
            MixDirection::Out => {
                set_ik_discrete(constraint, data.bend_direction, data.compress, data.stretch)
            }
            MixDirection::In => {
                set_ik_discrete(constraint, frame.bend_direction, frame.compress, frame.stretch)
            }
        }
    } else {
        constraint.mix += (mix - constraint.mix) * alpha;
        constraint.softness += (softness - constraint.softness) * alpha;
        if direction == MixDirection::In {
            set_ik_discrete(constraint, frame.bend_direction, frame.compress, frame.stretch);
        }
    }
}

fn set_ik_discrete(constraint: &mut IkConstraint, bend_direction: i32, compress: bool, stretch: bool) {
    constraint.bend_direction = bend_direction;
    constraint.compress = compress;
    constraint.stretch = stretch;
}

/// Rotation mixed out of a lower track, taking the same direction around the circle on every frame.
///
/// `state` holds `[accumulated total, last diff]` and persists across frames for one timeline.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_rotate_mixed(
    timeline: &CurveTimeline<1>,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    state: &mut [f32],
    first_frame: bool,
) {
    if first_frame {
        state[0] = 0.0;
    }
    if !skeleton.is_active(TargetKind::Bone, timeline.target) {
        return;
    }
    if alpha == 1.0 {
        apply_bone_relative(timeline, [BoneProperty::Rotation], skeleton, time, 1.0, blend);
        return;
    }

    let (Some(bone), Some(data)) = (
        skeleton.bones.get_mut(timeline.target),
        skeleton.data.bones.get(timeline.target),
    ) else {
        return;
    };
    let setup = data.rotation;

    let (r1, r2) = if time < timeline.first_time() {
        match blend {
            MixBlend::Setup => {
                bone.rotation = setup;
                return;
            }
            MixBlend::First => (bone.rotation, setup),
            _ => return,
        }
    } else {
        let r1 = if blend == MixBlend::Setup {
            setup
        } else {
            bone.rotation
        };
        (r1, setup + timeline.sample(time)[0])
    };

    let mut diff = r2 - r1;
    diff -= (diff / 360.0 - 0.5).ceil() * 360.0;

    let total = if diff == 0.0 {
        state[0]
    } else {
        let (mut last_total, last_diff) = if first_frame {
            (0.0, diff)
        } else {
            (state[0], state[1])
        };
        let current = diff > 0.0;
        let mut dir = last_total >= 0.0;
        // A sign change of a small diff means the bones crossed; after a full turn it is a loop.
        if signum(last_diff) != signum(diff) && last_diff.abs() <= 90.0 {
            if last_total.abs() > 180.0 {
                last_total += 360.0 * signum(last_total);
            }
            dir = current;
        }
        let mut total = diff + last_total - last_total % 360.0;
        if dir != current {
            total += 360.0 * signum(last_total);
        }
        state[0] = total;
        total
    };
    state[1] = diff;

    bone.rotation = r1 + total * alpha;
}
