use crate::{Error, TargetKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Name reported by the placeholder animation used for fading tracks in and out.
pub const EMPTY_ANIMATION_NAME: &str = "<empty>";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Inherit {
    #[default]
    Normal,
    OnlyTranslation,
    NoRotationOrReflection,
    NoScale,
    NoScaleOrReflection,
}

#[derive(Clone, Debug)]
pub struct BoneData {
    pub name: String,
    pub parent: Option<usize>,
    pub length: f32,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub shear_x: f32,
    pub shear_y: f32,
    pub inherit: Inherit,
    /// Only active while the skeleton's skin lists this bone.
    pub skin_required: bool,
}

impl BoneData {
    pub fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            length: 0.0,
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            shear_x: 0.0,
            shear_y: 0.0,
            inherit: Inherit::Normal,
            skin_required: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SlotData {
    pub name: String,
    pub bone: usize,
    pub attachment: Option<String>,
    pub color: [f32; 4],
    /// Two-color tinting is enabled when present.
    pub dark_color: Option<[f32; 3]>,
}

impl SlotData {
    pub fn new(name: impl Into<String>, bone: usize) -> Self {
        Self {
            name: name.into(),
            bone,
            attachment: None,
            color: [1.0; 4],
            dark_color: None,
        }
    }
}

/// Rotates one bone, or a parent and child pair, so the chain reaches `target`.
#[derive(Clone, Debug)]
pub struct IkConstraintData {
    pub name: String,
    pub order: i32,
    pub skin_required: bool,
    pub bones: Vec<usize>,
    pub target: usize,
    pub mix: f32,
    pub softness: f32,
    pub bend_direction: i32,
    pub compress: bool,
    pub stretch: bool,
    pub uniform: bool,
}

impl IkConstraintData {
    pub fn new(name: impl Into<String>, bones: Vec<usize>, target: usize) -> Self {
        Self {
            name: name.into(),
            order: 0,
            skin_required: false,
            bones,
            target,
            mix: 1.0,
            softness: 0.0,
            bend_direction: 1,
            compress: false,
            stretch: false,
            uniform: false,
        }
    }
}

/// Pulls the constrained bones toward the transform of `target`, in world or local space.
#[derive(Clone, Debug)]
pub struct TransformConstraintData {
    pub name: String,
    pub order: i32,
    pub skin_required: bool,
    pub bones: Vec<usize>,
    pub target: usize,
    pub local: bool,
    pub relative: bool,
    pub offset_rotation: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub offset_scale_x: f32,
    pub offset_scale_y: f32,
    pub offset_shear_y: f32,
    pub mix_rotate: f32,
    pub mix_x: f32,
    pub mix_y: f32,
    pub mix_scale_x: f32,
    pub mix_scale_y: f32,
    pub mix_shear_y: f32,
}

impl TransformConstraintData {
    pub fn new(name: impl Into<String>, bones: Vec<usize>, target: usize) -> Self {
        Self {
            name: name.into(),
            order: 0,
            skin_required: false,
            bones,
            target,
            local: false,
            relative: false,
            offset_rotation: 0.0,
            offset_x: 0.0,
            offset_y: 0.0,
            offset_scale_x: 0.0,
            offset_scale_y: 0.0,
            offset_shear_y: 0.0,
            mix_rotate: 1.0,
            mix_x: 1.0,
            mix_y: 1.0,
            mix_scale_x: 1.0,
            mix_scale_y: 1.0,
            mix_shear_y: 1.0,
        }
    }

    pub(crate) fn mixes(&self) -> [f32; 6] {
        [
            self.mix_rotate,
            self.mix_x,
            self.mix_y,
            self.mix_scale_x,
            self.mix_scale_y,
            self.mix_shear_y,
        ]
    }
}

/// Animated parameters of a path constraint. Solving needs path attachment geometry, which this
/// crate does not model, so hosts that draw paths read these values themselves.
#[derive(Clone, Debug)]
pub struct PathConstraintData {
    pub name: String,
    pub position: f32,
    pub spacing: f32,
    pub mix_rotate: f32,
    pub mix_x: f32,
    pub mix_y: f32,
}

impl PathConstraintData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: 0.0,
            spacing: 0.0,
            mix_rotate: 1.0,
            mix_x: 1.0,
            mix_y: 1.0,
        }
    }
}

/// Name of the skin consulted when the current skin has no attachment for a key.
pub const DEFAULT_SKIN_NAME: &str = "default";

/// Maps attachment keys to attachment names per slot, and lists the bones and constraints that
/// are only active while the skin is set.
#[derive(Clone, Debug, Default)]
pub struct SkinData {
    pub name: String,
    pub attachments: Vec<HashMap<String, String>>,
    pub bones: Vec<usize>,
    pub ik_constraints: Vec<usize>,
    pub transform_constraints: Vec<usize>,
}

impl SkinData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn set_attachment(
        &mut self,
        slot_index: usize,
        key: impl Into<String>,
        attachment: impl Into<String>,
    ) {
        if self.attachments.len() <= slot_index {
            self.attachments.resize_with(slot_index + 1, HashMap::new);
        }
        self.attachments[slot_index].insert(key.into(), attachment.into());
    }

    pub fn attachment(&self, slot_index: usize, key: &str) -> Option<&str> {
        self.attachments
            .get(slot_index)?
            .get(key)
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventData {
    pub name: String,
    pub int_value: i32,
    pub float_value: f32,
    pub string: String,
    pub audio_path: Option<String>,
    pub volume: f32,
    pub balance: f32,
}

/// A fired (or keyed) event. Keys in an [`EventTimeline`] carry their own payload so a timeline
/// can override the defaults from [`EventData`].
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub time: f32,
    pub name: String,
    pub int_value: i32,
    pub float_value: f32,
    pub string: String,
    pub volume: f32,
    pub balance: f32,
}

impl Event {
    pub fn new(time: f32, data: &EventData) -> Self {
        Self {
            time,
            name: data.name.clone(),
            int_value: data.int_value,
            float_value: data.float_value,
            string: data.string.clone(),
            volume: data.volume,
            balance: data.balance,
        }
    }
}

/// Interpolation from a keyframe to the next one.
///
/// Bezier control points are absolute: `cx*` in seconds, `cy*` in the channel's value space.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Curve {
    #[default]
    Linear,
    Stepped,
    Bezier { cx1: f32, cy1: f32, cx2: f32, cy2: f32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CurveFrame<const N: usize> {
    pub time: f32,
    pub value: [f32; N],
    pub curve: [Curve; N],
}

impl<const N: usize> CurveFrame<N> {
    pub fn linear(time: f32, value: [f32; N]) -> Self {
        Self {
            time,
            value,
            curve: [Curve::Linear; N],
        }
    }

    pub fn stepped(time: f32, value: [f32; N]) -> Self {
        Self {
            time,
            value,
            curve: [Curve::Stepped; N],
        }
    }

    pub fn with_curve(mut self, curve: [Curve; N]) -> Self {
        self.curve = curve;
        self
    }
}

/// Keyframes for `N` interpolated channels of one target (bone, slot or constraint index).
#[derive(Clone, Debug, PartialEq)]
pub struct CurveTimeline<const N: usize> {
    pub target: usize,
    pub frames: Vec<CurveFrame<N>>,
}

impl<const N: usize> CurveTimeline<N> {
    pub fn new(target: usize, frames: Vec<CurveFrame<N>>) -> Self {
        Self { target, frames }
    }

    pub(crate) fn first_time(&self) -> f32 {
        self.frames.first().map(|f| f.time).unwrap_or(0.0)
    }

    /// Value at `time`: the first key before the first frame, the last key after the last frame,
    /// otherwise interpolated between the bracketing keys.
    pub fn sample(&self, time: f32) -> [f32; N] {
        let Some(first) = self.frames.first() else {
            return [0.0; N];
        };
        let index = self.frames.partition_point(|f| f.time <= time);
        if index == 0 {
            return first.value;
        }
        if index >= self.frames.len() {
            return self.frames[self.frames.len() - 1].value;
        }
        let prev = &self.frames[index - 1];
        let next = &self.frames[index];
        std::array::from_fn(|i| {
            curve_value(
                prev.curve[i],
                time,
                prev.time,
                prev.value[i],
                next.time,
                next.value[i],
            )
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentFrame {
    pub time: f32,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentTimeline {
    pub slot: usize,
    pub frames: Vec<AttachmentFrame>,
}

impl AttachmentTimeline {
    /// `None` before the first key; otherwise the attachment keyed at or before `time`.
    pub fn sample(&self, time: f32) -> Option<Option<&str>> {
        let index = self.frames.partition_point(|f| f.time <= time);
        if index == 0 {
            return None;
        }
        Some(self.frames[index - 1].name.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeformFrame {
    pub time: f32,
    /// Per-vertex offsets from the attachment's setup vertices.
    pub offsets: Vec<f32>,
    pub curve: Curve,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeformTimeline {
    pub slot: usize,
    /// Only applied while the slot shows this attachment.
    pub attachment: String,
    pub frames: Vec<DeformFrame>,
}

pub(crate) enum DeformSample<'a> {
    Key(&'a [f32]),
    Between {
        prev: &'a [f32],
        next: &'a [f32],
        percent: f32,
    },
}

impl DeformSample<'_> {
    pub(crate) fn value(&self, i: usize) -> f32 {
        match self {
            DeformSample::Key(values) => values[i],
            DeformSample::Between {
                prev,
                next,
                percent,
            } => prev[i] + (next[i] - prev[i]) * percent,
        }
    }
}

impl DeformTimeline {
    pub fn vertex_count(&self) -> usize {
        self.frames.first().map(|f| f.offsets.len()).unwrap_or(0)
    }

    pub(crate) fn first_time(&self) -> f32 {
        self.frames.first().map(|f| f.time).unwrap_or(0.0)
    }

    pub(crate) fn bracket(&self, time: f32) -> DeformSample<'_> {
        let index = self.frames.partition_point(|f| f.time <= time);
        if index == 0 {
            return DeformSample::Key(&self.frames[0].offsets);
        }
        if index >= self.frames.len() {
            return DeformSample::Key(&self.frames[self.frames.len() - 1].offsets);
        }
        let prev = &self.frames[index - 1];
        let next = &self.frames[index];
        let percent = curve_value(prev.curve, time, prev.time, 0.0, next.time, 1.0);
        DeformSample::Between {
            prev: &prev.offsets,
            next: &next.offsets,
            percent,
        }
    }

    /// Writes the offsets at `time` into `out`, reusing its allocation.
    pub fn sample_into(&self, time: f32, out: &mut Vec<f32>) {
        out.clear();
        if self.frames.is_empty() {
            return;
        }
        let sample = self.bracket(time);
        out.extend((0..self.vertex_count()).map(|i| sample.value(i)));
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawOrderFrame {
    pub time: f32,
    /// `draw_order[i]` is the setup slot index drawn at position `i`; `None` restores setup order.
    pub draw_order: Option<Vec<usize>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawOrderTimeline {
    pub frames: Vec<DrawOrderFrame>,
}

impl DrawOrderTimeline {
    pub fn sample(&self, time: f32) -> Option<Option<&[usize]>> {
        let index = self.frames.partition_point(|f| f.time <= time);
        if index == 0 {
            return None;
        }
        Some(self.frames[index - 1].draw_order.as_deref())
    }
}

/// Events sorted by time. Several events may share a key time; they fire in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct EventTimeline {
    pub events: Vec<Event>,
}

impl EventTimeline {
    /// Appends events keyed in `(last_time, time]`. When `last_time > time` the range wraps around
    /// the end of the animation; a negative `last_time` also fires keys at time zero.
    pub fn collect(&self, last_time: f32, time: f32, out: &mut Vec<Event>) {
        let Some(last) = self.events.last() else {
            return;
        };
        let mut last_time = last_time;
        if last_time > time {
            self.collect(last_time, f32::MAX, out);
            last_time = -1.0;
        } else if last_time >= last.time {
            return;
        }
        if time < self.events[0].time {
            return;
        }
        let start = if last_time < self.events[0].time {
            0
        } else {
            self.events.partition_point(|e| e.time <= last_time)
        };
        let end = self.events.partition_point(|e| e.time <= time);
        if start < end {
            out.extend_from_slice(&self.events[start..end]);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IkFrame {
    pub time: f32,
    pub mix: f32,
    pub softness: f32,
    pub bend_direction: i32,
    pub compress: bool,
    pub stretch: bool,
    /// Curves for `mix` and `softness`; the remaining fields are stepped.
    pub curve: [Curve; 2],
}

impl IkFrame {
    pub fn new(time: f32, mix: f32, softness: f32) -> Self {
        Self {
            time,
            mix,
            softness,
            bend_direction: 1,
            compress: false,
            stretch: false,
            curve: [Curve::Linear; 2],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IkConstraintTimeline {
    pub constraint: usize,
    pub frames: Vec<IkFrame>,
}

impl IkConstraintTimeline {
    pub(crate) fn first_time(&self) -> f32 {
        self.frames.first().map(|f| f.time).unwrap_or(0.0)
    }

    /// Interpolated `(mix, softness)` plus the key whose discrete values are in effect.
    pub fn sample(&self, time: f32) -> Option<(f32, f32, &IkFrame)> {
        let index = self.frames.partition_point(|f| f.time <= time).max(1);
        let prev = self.frames.get(index - 1)?;
        let Some(next) = self.frames.get(index) else {
            return Some((prev.mix, prev.softness, prev));
        };
        if time < prev.time {
            return Some((prev.mix, prev.softness, prev));
        }
        let mix = curve_value(prev.curve[0], time, prev.time, prev.mix, next.time, next.mix);
        let softness = curve_value(
            prev.curve[1],
            time,
            prev.time,
            prev.softness,
            next.time,
            next.softness,
        );
        Some((mix, softness, prev))
    }
}

/// Every kind of keyframed property an [`Animation`] can drive.
///
/// Bone values are relative to the setup pose (rotation/translation/shear offsets, scale
/// multipliers). Color and constraint values are absolute.
#[derive(Clone, Debug, PartialEq)]
pub enum Timeline {
    Rotate(CurveTimeline<1>),
    Translate(CurveTimeline<2>),
    TranslateX(CurveTimeline<1>),
    TranslateY(CurveTimeline<1>),
    Scale(CurveTimeline<2>),
    ScaleX(CurveTimeline<1>),
    ScaleY(CurveTimeline<1>),
    Shear(CurveTimeline<2>),
    ShearX(CurveTimeline<1>),
    ShearY(CurveTimeline<1>),
    /// Slot color `[r, g, b, a]`.
    Rgba(CurveTimeline<4>),
    Rgb(CurveTimeline<3>),
    Alpha(CurveTimeline<1>),
    /// Light `[r, g, b, a]` followed by dark `[r, g, b]`.
    Rgba2(CurveTimeline<7>),
    Attachment(AttachmentTimeline),
    Deform(DeformTimeline),
    DrawOrder(DrawOrderTimeline),
    Event(EventTimeline),
    IkConstraint(IkConstraintTimeline),
    /// `[rotate, x, y, scale_x, scale_y, shear_y]` mixes.
    TransformConstraint(CurveTimeline<6>),
    PathConstraintPosition(CurveTimeline<1>),
    PathConstraintSpacing(CurveTimeline<1>),
    /// `[rotate, x, y]` mixes.
    PathConstraintMix(CurveTimeline<3>),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
enum Property {
    Rotate,
    X,
    Y,
    ScaleX,
    ScaleY,
    ShearX,
    ShearY,
    Rgb,
    Alpha,
    Rgb2,
    Attachment,
    Deform,
    Event,
    DrawOrder,
    IkConstraint,
    TransformConstraint,
    PathConstraintPosition,
    PathConstraintSpacing,
    PathConstraintMix,
}

fn property_id(property: Property, target: usize, extra: u32) -> u64 {
    ((property as u64) << 56) | (((target as u64) & 0x00ff_ffff) << 32) | extra as u64
}

fn name_hash(name: &str) -> u32 {
    // FNV-1a
    name.bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193))
}

/// Identifiers of the pose properties a timeline writes. Two timelines conflict when they share one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PropertyIds {
    ids: [u64; 3],
    len: usize,
}

impl PropertyIds {
    fn one(a: u64) -> Self {
        Self {
            ids: [a, 0, 0],
            len: 1,
        }
    }

    fn two(a: u64, b: u64) -> Self {
        Self {
            ids: [a, b, 0],
            len: 2,
        }
    }

    fn three(a: u64, b: u64, c: u64) -> Self {
        Self {
            ids: [a, b, c],
            len: 3,
        }
    }
}

impl std::ops::Deref for PropertyIds {
    type Target = [u64];

    fn deref(&self) -> &[u64] {
        &self.ids[..self.len]
    }
}

impl Timeline {
    pub fn property_ids(&self) -> PropertyIds {
        use Property as P;
        let id = |p, t| property_id(p, t, 0);
        match self {
            Timeline::Rotate(t) => PropertyIds::one(id(P::Rotate, t.target)),
            Timeline::Translate(t) => PropertyIds::two(id(P::X, t.target), id(P::Y, t.target)),
            Timeline::TranslateX(t) => PropertyIds::one(id(P::X, t.target)),
            Timeline::TranslateY(t) => PropertyIds::one(id(P::Y, t.target)),
            Timeline::Scale(t) => {
                PropertyIds::two(id(P::ScaleX, t.target), id(P::ScaleY, t.target))
            }
            Timeline::ScaleX(t) => PropertyIds::one(id(P::ScaleX, t.target)),
            Timeline::ScaleY(t) => PropertyIds::one(id(P::ScaleY, t.target)),
            Timeline::Shear(t) => {
                PropertyIds::two(id(P::ShearX, t.target), id(P::ShearY, t.target))
            }
            Timeline::ShearX(t) => PropertyIds::one(id(P::ShearX, t.target)),
            Timeline::ShearY(t) => PropertyIds::one(id(P::ShearY, t.target)),
            Timeline::Rgba(t) => PropertyIds::two(id(P::Rgb, t.target), id(P::Alpha, t.target)),
            Timeline::Rgb(t) => PropertyIds::one(id(P::Rgb, t.target)),
            Timeline::Alpha(t) => PropertyIds::one(id(P::Alpha, t.target)),
            Timeline::Rgba2(t) => PropertyIds::three(
                id(P::Rgb, t.target),
                id(P::Alpha, t.target),
                id(P::Rgb2, t.target),
            ),
            Timeline::Attachment(t) => PropertyIds::one(id(P::Attachment, t.slot)),
            Timeline::Deform(t) => {
                PropertyIds::one(property_id(P::Deform, t.slot, name_hash(&t.attachment)))
            }
            Timeline::DrawOrder(_) => PropertyIds::one(id(P::DrawOrder, 0)),
            Timeline::Event(_) => PropertyIds::one(id(P::Event, 0)),
            Timeline::IkConstraint(t) => PropertyIds::one(id(P::IkConstraint, t.constraint)),
            Timeline::TransformConstraint(t) => {
                PropertyIds::one(id(P::TransformConstraint, t.target))
            }
            Timeline::PathConstraintPosition(t) => {
                PropertyIds::one(id(P::PathConstraintPosition, t.target))
            }
            Timeline::PathConstraintSpacing(t) => {
                PropertyIds::one(id(P::PathConstraintSpacing, t.target))
            }
            Timeline::PathConstraintMix(t) => {
                PropertyIds::one(id(P::PathConstraintMix, t.target))
            }
        }
    }

    /// The indexed object this timeline writes to, if any.
    pub fn target(&self) -> Option<(TargetKind, usize)> {
        match self {
            Timeline::Rotate(t)
            | Timeline::TranslateX(t)
            | Timeline::TranslateY(t)
            | Timeline::ScaleX(t)
            | Timeline::ScaleY(t)
            | Timeline::ShearX(t)
            | Timeline::ShearY(t) => Some((TargetKind::Bone, t.target)),
            Timeline::Translate(t) | Timeline::Scale(t) | Timeline::Shear(t) => {
                Some((TargetKind::Bone, t.target))
            }
            Timeline::Rgba(t) => Some((TargetKind::Slot, t.target)),
            Timeline::Rgb(t) => Some((TargetKind::Slot, t.target)),
            Timeline::Alpha(t) => Some((TargetKind::Slot, t.target)),
            Timeline::Rgba2(t) => Some((TargetKind::Slot, t.target)),
            Timeline::Attachment(t) => Some((TargetKind::Slot, t.slot)),
            Timeline::Deform(t) => Some((TargetKind::Slot, t.slot)),
            Timeline::IkConstraint(t) => Some((TargetKind::IkConstraint, t.constraint)),
            Timeline::TransformConstraint(t) => Some((TargetKind::TransformConstraint, t.target)),
            Timeline::PathConstraintPosition(t) | Timeline::PathConstraintSpacing(t) => {
                Some((TargetKind::PathConstraint, t.target))
            }
            Timeline::PathConstraintMix(t) => Some((TargetKind::PathConstraint, t.target)),
            Timeline::DrawOrder(_) | Timeline::Event(_) => None,
        }
    }

    fn frame_times(&self) -> Vec<f32> {
        fn times<T>(frames: &[T], time: impl Fn(&T) -> f32) -> Vec<f32> {
            frames.iter().map(time).collect()
        }
        match self {
            Timeline::Rotate(t)
            | Timeline::TranslateX(t)
            | Timeline::TranslateY(t)
            | Timeline::ScaleX(t)
            | Timeline::ScaleY(t)
            | Timeline::ShearX(t)
            | Timeline::ShearY(t)
            | Timeline::Alpha(t)
            | Timeline::PathConstraintPosition(t)
            | Timeline::PathConstraintSpacing(t) => times(&t.frames, |f| f.time),
            Timeline::Translate(t) | Timeline::Scale(t) | Timeline::Shear(t) => {
                times(&t.frames, |f| f.time)
            }
            Timeline::Rgb(t) | Timeline::PathConstraintMix(t) => times(&t.frames, |f| f.time),
            Timeline::Rgba(t) => times(&t.frames, |f| f.time),
            Timeline::Rgba2(t) => times(&t.frames, |f| f.time),
            Timeline::TransformConstraint(t) => times(&t.frames, |f| f.time),
            Timeline::Attachment(t) => times(&t.frames, |f| f.time),
            Timeline::Deform(t) => times(&t.frames, |f| f.time),
            Timeline::DrawOrder(t) => times(&t.frames, |f| f.time),
            Timeline::Event(t) => times(&t.events, |e| e.time),
            Timeline::IkConstraint(t) => times(&t.frames, |f| f.time),
        }
    }
}

/// Largest index (plus one) each target kind needs, precomputed so applying can check a skeleton
/// without walking every timeline.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct TargetCounts {
    pub(crate) bones: usize,
    pub(crate) slots: usize,
    pub(crate) ik_constraints: usize,
    pub(crate) transform_constraints: usize,
    pub(crate) path_constraints: usize,
}

impl TargetCounts {
    pub(crate) fn of_data(data: &SkeletonData) -> Self {
        Self {
            bones: data.bones.len(),
            slots: data.slots.len(),
            ik_constraints: data.ik_constraints.len(),
            transform_constraints: data.transform_constraints.len(),
            path_constraints: data.path_constraints.len(),
        }
    }

    fn get(&self, kind: TargetKind) -> usize {
        match kind {
            TargetKind::Bone => self.bones,
            TargetKind::Slot | TargetKind::DrawOrder => self.slots,
            TargetKind::IkConstraint => self.ik_constraints,
            TargetKind::TransformConstraint => self.transform_constraints,
            TargetKind::PathConstraint => self.path_constraints,
        }
    }

    fn require(&mut self, kind: TargetKind, index: usize) {
        let slot = match kind {
            TargetKind::Bone => &mut self.bones,
            TargetKind::Slot | TargetKind::DrawOrder => &mut self.slots,
            TargetKind::IkConstraint => &mut self.ik_constraints,
            TargetKind::TransformConstraint => &mut self.transform_constraints,
            TargetKind::PathConstraint => &mut self.path_constraints,
        };
        *slot = (*slot).max(index + 1);
    }
}

/// An immutable named set of timelines.
#[derive(Clone, Debug)]
pub struct Animation {
    name: String,
    duration: f32,
    timelines: Vec<Timeline>,
    property_ids: HashSet<u64>,
    required: TargetCounts,
    /// Exact slot count draw order keys are written for.
    draw_order_slots: Option<usize>,
}

impl Animation {
    /// Validates keyframe ordering. `duration` defaults to the last key time across all timelines.
    pub fn new(
        name: impl Into<String>,
        timelines: Vec<Timeline>,
        duration: Option<f32>,
    ) -> Result<Self, Error> {
        let name = name.into();
        let mut max_time = 0.0f32;
        let mut required = TargetCounts::default();
        let mut draw_order_slots = None;
        let mut property_ids = HashSet::new();

        for (index, timeline) in timelines.iter().enumerate() {
            let times = timeline.frame_times();
            if times.is_empty() {
                return Err(Error::EmptyTimeline {
                    animation: name,
                    timeline: index,
                });
            }
            // Several events may share a time; every other key time must strictly increase.
            let allow_equal = matches!(timeline, Timeline::Event(_));
            for (frame, pair) in times.windows(2).enumerate() {
                let ordered = if allow_equal {
                    pair[0] <= pair[1]
                } else {
                    pair[0] < pair[1]
                };
                if !ordered {
                    return Err(Error::UnorderedKeyframes {
                        animation: name,
                        timeline: index,
                        frame: frame + 1,
                    });
                }
            }
            if let Some(bad) = times.iter().position(|t| !t.is_finite() || *t < 0.0) {
                return Err(Error::InvalidValue {
                    message: format!(
                        "animation '{name}' timeline {index} key {bad} has an invalid time"
                    ),
                });
            }
            max_time = max_time.max(times[times.len() - 1]);

            if let Some((kind, target)) = timeline.target() {
                required.require(kind, target);
            }
            match timeline {
                Timeline::Deform(t) => {
                    let count = t.vertex_count();
                    if t.frames.iter().any(|f| f.offsets.len() != count) {
                        return Err(Error::InvalidValue {
                            message: format!(
                                "animation '{name}' deform timeline {index} keys differ in vertex count"
                            ),
                        });
                    }
                }
                Timeline::DrawOrder(t) => {
                    for order in t.frames.iter().filter_map(|f| f.draw_order.as_ref()) {
                        if let Some(expected) = draw_order_slots {
                            if expected != order.len() {
                                return Err(Error::InvalidValue {
                                    message: format!(
                                        "animation '{name}' draw order keys differ in length"
                                    ),
                                });
                            }
                        }
                        draw_order_slots = Some(order.len());
                        let mut seen = vec![false; order.len()];
                        for &slot in order {
                            if slot >= order.len() || std::mem::replace(&mut seen[slot], true) {
                                return Err(Error::InvalidValue {
                                    message: format!(
                                        "animation '{name}' draw order key is not a permutation"
                                    ),
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
            property_ids.extend(timeline.property_ids().iter().copied());
        }

        let duration = match duration {
            Some(d) if !d.is_finite() || d < 0.0 => {
                return Err(Error::InvalidValue {
                    message: format!("animation '{name}' duration must be finite and >= 0"),
                });
            }
            Some(d) => d,
            None => max_time,
        };

        Ok(Self {
            name,
            duration,
            timelines,
            property_ids,
            required,
            draw_order_slots,
        })
    }

    /// The placeholder with no timelines used to mix tracks in from, or out to, the setup pose.
    pub fn empty() -> Self {
        Self {
            name: EMPTY_ANIMATION_NAME.to_string(),
            duration: 0.0,
            timelines: Vec::new(),
            property_ids: HashSet::new(),
            required: TargetCounts::default(),
            draw_order_slots: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn timelines(&self) -> &[Timeline] {
        &self.timelines
    }

    /// Whether any timeline writes one of `ids`.
    pub fn has_timeline(&self, ids: &[u64]) -> bool {
        ids.iter().any(|id| self.property_ids.contains(id))
    }

    /// Fails if a timeline targets a bone, slot or constraint `data` does not have.
    pub fn validate_against(&self, data: &SkeletonData) -> Result<(), Error> {
        self.check_counts(TargetCounts::of_data(data))
    }

    pub(crate) fn check_counts(&self, counts: TargetCounts) -> Result<(), Error> {
        const KINDS: [TargetKind; 5] = [
            TargetKind::Bone,
            TargetKind::Slot,
            TargetKind::IkConstraint,
            TargetKind::TransformConstraint,
            TargetKind::PathConstraint,
        ];
        for kind in KINDS {
            let required = self.required.get(kind);
            let len = counts.get(kind);
            if required > len {
                return Err(Error::TimelineTargetOutOfRange {
                    animation: self.name.clone(),
                    kind,
                    index: required - 1,
                    len,
                });
            }
        }
        if let Some(slots) = self.draw_order_slots {
            if slots != counts.slots {
                return Err(Error::TimelineTargetOutOfRange {
                    animation: self.name.clone(),
                    kind: TargetKind::DrawOrder,
                    index: slots.saturating_sub(1),
                    len: counts.slots,
                });
            }
        }
        Ok(())
    }
}

/// Immutable skeleton definition shared by every [`crate::Skeleton`] instance built from it.
#[derive(Clone, Debug, Default)]
pub struct SkeletonData {
    pub name: Option<String>,
    pub bones: Vec<BoneData>,
    pub slots: Vec<SlotData>,
    pub ik_constraints: Vec<IkConstraintData>,
    pub transform_constraints: Vec<TransformConstraintData>,
    pub path_constraints: Vec<PathConstraintData>,
    /// Empty means attachment keys are used as attachment names directly.
    pub skins: HashMap<String, SkinData>,
    pub events: Vec<EventData>,
    animations: Vec<Arc<Animation>>,
    animation_index: HashMap<String, usize>,
}

impl SkeletonData {
    /// Checks that bones are ordered parents-first and that slots reference existing bones.
    pub fn new(bones: Vec<BoneData>, slots: Vec<SlotData>) -> Result<Self, Error> {
        for (index, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= index {
                    return Err(Error::InvalidBoneParent {
                        bone: bone.name.clone(),
                        parent,
                    });
                }
            }
        }
        if let Some(slot) = slots.iter().find(|s| s.bone >= bones.len()) {
            return Err(Error::InvalidSlotBone {
                slot: slot.name.clone(),
                bone: slot.bone,
            });
        }
        Ok(Self {
            bones,
            slots,
            ..Self::default()
        })
    }

    /// Registers an animation after checking its targets exist. Replaces one with the same name.
    pub fn add_animation(&mut self, animation: Animation) -> Result<Arc<Animation>, Error> {
        animation.validate_against(self)?;
        if animation.name() == EMPTY_ANIMATION_NAME {
            return Err(Error::InvalidValue {
                message: format!("animation name '{EMPTY_ANIMATION_NAME}' is reserved"),
            });
        }
        let animation = Arc::new(animation);
        match self.animation_index.get(animation.name()) {
            Some(&index) => self.animations[index] = animation.clone(),
            None => {
                self.animation_index
                    .insert(animation.name().to_string(), self.animations.len());
                self.animations.push(animation.clone());
            }
        }
        Ok(animation)
    }

    pub fn animation(&self, name: &str) -> Option<&Arc<Animation>> {
        let index = *self.animation_index.get(name)?;
        self.animations.get(index)
    }

    pub fn animations(&self) -> &[Arc<Animation>] {
        &self.animations
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn find_slot(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    pub fn skin(&self, name: &str) -> Option<&SkinData> {
        self.skins.get(name)
    }

    pub fn add_skin(&mut self, skin: SkinData) {
        self.skins.insert(skin.name.clone(), skin);
    }

    pub fn find_event(&self, name: &str) -> Option<&EventData> {
        self.events.iter().find(|e| e.name == name)
    }
}

pub(crate) fn curve_value(
    curve: Curve,
    time: f32,
    time1: f32,
    value1: f32,
    time2: f32,
    value2: f32,
) -> f32 {
    let denom = time2 - time1;
    if denom.abs() <= 1.0e-12 {
        return value2;
    }

    match curve {
        Curve::Linear => value1 + (value2 - value1) * ((time - time1) / denom),
        Curve::Stepped => value1,
        Curve::Bezier { cx1, cy1, cx2, cy2 } => bezier_value(
            time,
            [time1, value1],
            [cx1, cy1],
            [cx2, cy2],
            [time2, value2],
        ),
    }
}

/// Samples a cubic Bezier at `time` by forward differencing it into a polyline.
fn bezier_value(time: f32, p0: [f32; 2], c1: [f32; 2], c2: [f32; 2], p3: [f32; 2]) -> f32 {
    const POINTS: usize = 9;

    let [time1, value1] = p0;
    let [cx1, cy1] = c1;
    let [cx2, cy2] = c2;
    let [time2, value2] = p3;

    let tmpx = (time1 - cx1 * 2.0 + cx2) * 0.03;
    let tmpy = (value1 - cy1 * 2.0 + cy2) * 0.03;
    let dddx = ((cx1 - cx2) * 3.0 - time1 + time2) * 0.006;
    let dddy = ((cy1 - cy2) * 3.0 - value1 + value2) * 0.006;
    let mut ddx = tmpx * 2.0 + dddx;
    let mut ddy = tmpy * 2.0 + dddy;
    let mut dx = (cx1 - time1) * 0.3 + tmpx + dddx * 0.166_666_67;
    let mut dy = (cy1 - value1) * 0.3 + tmpy + dddy * 0.166_666_67;

    let mut points = [[0.0f32; 2]; POINTS];
    let (mut x, mut y) = (time1 + dx, value1 + dy);
    for point in &mut points {
        *point = [x, y];
        dx += ddx;
        dy += ddy;
        ddx += dddx;
        ddy += dddy;
        x += dx;
        y += dy;
    }

    let lerp = |from: [f32; 2], to: [f32; 2]| {
        let denom = to[0] - from[0];
        if denom.abs() <= 1.0e-12 {
            from[1]
        } else {
            from[1] + (time - from[0]) / denom * (to[1] - from[1])
        }
    };

    let index = points.partition_point(|p| p[0] < time);
    match index {
        0 => lerp(p0, points[0]),
        i if i < POINTS => lerp(points[i - 1], points[i]),
        _ => lerp(points[POINTS - 1], p3),
    }
}
