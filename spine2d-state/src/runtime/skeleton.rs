use crate::{
    DEFAULT_SKIN_NAME, Error, Inherit, SkeletonData, SkinData, TargetCounts, TargetKind,
};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Bone {
    data_index: usize,
    parent: Option<usize>,

    pub inherit: Inherit,
    pub active: bool,

    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub shear_x: f32,
    pub shear_y: f32,

    /// Local transform actually used for the world matrix, after constraints.
    pub ax: f32,
    pub ay: f32,
    pub arotation: f32,
    pub ascale_x: f32,
    pub ascale_y: f32,
    pub ashear_x: f32,
    pub ashear_y: f32,

    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub world_x: f32,
    pub world_y: f32,
}

impl Bone {
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub fn parent_index(&self) -> Option<usize> {
        self.parent
    }

    /// World rotation of the local X axis, in degrees.
    pub fn world_rotation_x(&self) -> f32 {
        self.c.atan2(self.a).to_degrees()
    }

    pub fn world_scale_x(&self) -> f32 {
        (self.a * self.a + self.c * self.c).sqrt()
    }

    pub fn world_scale_y(&self) -> f32 {
        (self.b * self.b + self.d * self.d).sqrt()
    }

    pub fn local_to_world(&self, x: f32, y: f32) -> [f32; 2] {
        [
            self.a * x + self.b * y + self.world_x,
            self.c * x + self.d * y + self.world_y,
        ]
    }

    #[cfg(feature = "glam")]
    pub fn world_affine(&self) -> glam::Affine2 {
        glam::Affine2::from_cols_array(&[
            self.a,
            self.c,
            self.b,
            self.d,
            self.world_x,
            self.world_y,
        ])
    }

    fn set_to_setup_pose(&mut self, data: &crate::BoneData) {
        self.x = data.x;
        self.y = data.y;
        self.rotation = data.rotation;
        self.scale_x = data.scale_x;
        self.scale_y = data.scale_y;
        self.shear_x = data.shear_x;
        self.shear_y = data.shear_y;
        self.inherit = data.inherit;
    }

    fn reset_applied(&mut self) {
        self.ax = self.x;
        self.ay = self.y;
        self.arotation = self.rotation;
        self.ascale_x = self.scale_x;
        self.ascale_y = self.scale_y;
        self.ashear_x = self.shear_x;
        self.ashear_y = self.shear_y;
    }
}

#[derive(Clone, Debug)]
pub struct Slot {
    data_index: usize,
    pub bone: usize,
    /// Attachment key, resolved to an attachment name through the skins.
    pub attachment: Option<String>,
    pub(crate) attachment_skin: Option<String>,
    pub(crate) attachment_state: i32,
    pub color: [f32; 4],
    pub dark_color: Option<[f32; 3]>,
    /// Vertex offsets written by deform timelines for the current attachment. Empty means undeformed.
    pub deform: Vec<f32>,
}

impl Slot {
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    /// Changes the attachment key, discarding deform offsets that belonged to the previous one.
    pub fn set_attachment(&mut self, attachment: Option<&str>) {
        self.set_attachment_from(attachment, None);
    }

    fn set_attachment_from(&mut self, attachment: Option<&str>, skin: Option<&str>) {
        if self.attachment.as_deref() == attachment && self.attachment_skin.as_deref() == skin {
            return;
        }
        self.attachment = attachment.map(str::to_string);
        self.attachment_skin = skin.map(str::to_string);
        self.deform.clear();
    }
}

#[derive(Clone, Debug)]
pub struct IkConstraint {
    data_index: usize,
    pub active: bool,
    pub mix: f32,
    pub softness: f32,
    pub bend_direction: i32,
    pub compress: bool,
    pub stretch: bool,
}

impl IkConstraint {
    pub fn data_index(&self) -> usize {
        self.data_index
    }
}

#[derive(Clone, Debug)]
pub struct TransformConstraint {
    data_index: usize,
    pub active: bool,
    pub mix_rotate: f32,
    pub mix_x: f32,
    pub mix_y: f32,
    pub mix_scale_x: f32,
    pub mix_scale_y: f32,
    pub mix_shear_y: f32,
}

impl TransformConstraint {
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    fn mixes(&self) -> [f32; 6] {
        [
            self.mix_rotate,
            self.mix_x,
            self.mix_y,
            self.mix_scale_x,
            self.mix_scale_y,
            self.mix_shear_y,
        ]
    }

    pub(crate) fn mixes_mut(&mut self) -> [&mut f32; 6] {
        [
            &mut self.mix_rotate,
            &mut self.mix_x,
            &mut self.mix_y,
            &mut self.mix_scale_x,
            &mut self.mix_scale_y,
            &mut self.mix_shear_y,
        ]
    }
}

#[derive(Clone, Debug)]
pub struct PathConstraint {
    data_index: usize,
    pub position: f32,
    pub spacing: f32,
    pub mix_rotate: f32,
    pub mix_x: f32,
    pub mix_y: f32,
}

impl PathConstraint {
    pub fn data_index(&self) -> usize {
        self.data_index
    }
}

/// Mutable pose of one skeleton instance.
#[derive(Clone, Debug)]
pub struct Skeleton {
    pub(crate) data: Arc<SkeletonData>,
    pub bones: Vec<Bone>,
    pub slots: Vec<Slot>,
    /// Slot indices in the order they are drawn.
    pub draw_order: Vec<usize>,
    pub ik_constraints: Vec<IkConstraint>,
    pub transform_constraints: Vec<TransformConstraint>,
    pub path_constraints: Vec<PathConstraint>,
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,

    skin: Option<String>,
    bone_children: Vec<Vec<usize>>,
    update_cache: Vec<UpdateCacheItem>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum UpdateCacheItem {
    Bone(usize),
    Ik(usize),
    Transform(usize),
}

impl Skeleton {
    pub fn new(data: Arc<SkeletonData>) -> Self {
        let bones = data
            .bones
            .iter()
            .enumerate()
            .map(|(index, bone)| Bone {
                data_index: index,
                parent: bone.parent,
                inherit: bone.inherit,
                active: true,
                x: bone.x,
                y: bone.y,
                rotation: bone.rotation,
                scale_x: bone.scale_x,
                scale_y: bone.scale_y,
                shear_x: bone.shear_x,
                shear_y: bone.shear_y,
                ax: bone.x,
                ay: bone.y,
                arotation: bone.rotation,
                ascale_x: bone.scale_x,
                ascale_y: bone.scale_y,
                ashear_x: bone.shear_x,
                ashear_y: bone.shear_y,
                a: 1.0,
                b: 0.0,
                c: 0.0,
                d: 1.0,
                world_x: 0.0,
                world_y: 0.0,
            })
            .collect::<Vec<_>>();

        let slots = data
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| Slot {
                data_index: index,
                bone: slot.bone,
                attachment: None,
                attachment_skin: None,
                attachment_state: 0,
                color: slot.color,
                dark_color: slot.dark_color,
                deform: Vec::new(),
            })
            .collect();

        let ik_constraints = data
            .ik_constraints
            .iter()
            .enumerate()
            .map(|(index, c)| IkConstraint {
                data_index: index,
                active: true,
                mix: c.mix,
                softness: c.softness,
                bend_direction: c.bend_direction,
                compress: c.compress,
                stretch: c.stretch,
            })
            .collect();

        let transform_constraints = data
            .transform_constraints
            .iter()
            .enumerate()
            .map(|(index, c)| TransformConstraint {
                data_index: index,
                active: true,
                mix_rotate: c.mix_rotate,
                mix_x: c.mix_x,
                mix_y: c.mix_y,
                mix_scale_x: c.mix_scale_x,
                mix_scale_y: c.mix_scale_y,
                mix_shear_y: c.mix_shear_y,
            })
            .collect();

        let path_constraints = data
            .path_constraints
            .iter()
            .enumerate()
            .map(|(index, c)| PathConstraint {
                data_index: index,
                position: c.position,
                spacing: c.spacing,
                mix_rotate: c.mix_rotate,
                mix_x: c.mix_x,
                mix_y: c.mix_y,
            })
            .collect();

        let mut children = vec![Vec::new(); bones.len()];
        for (index, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent.filter(|&p| p < children.len()) {
                children[parent].push(index);
            }
        }

        let mut skeleton = Self {
            draw_order: (0..data.slots.len()).collect(),
            data,
            bones,
            slots,
            ik_constraints,
            transform_constraints,
            path_constraints,
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            skin: None,
            bone_children: children,
            update_cache: Vec::new(),
        };
        skeleton.set_slots_to_setup_pose();
        skeleton.update_cache();
        skeleton
    }

    pub fn data(&self) -> &Arc<SkeletonData> {
        &self.data
    }

    pub(crate) fn target_counts(&self) -> TargetCounts {
        TargetCounts {
            bones: self.bones.len(),
            slots: self.slots.len(),
            ik_constraints: self.ik_constraints.len(),
            transform_constraints: self.transform_constraints.len(),
            path_constraints: self.path_constraints.len(),
        }
    }

    /// Whether timelines keyed on this target are applied. Bones and constraints that need a
    /// skin stay inactive until a skin including them is set.
    pub fn is_active(&self, kind: TargetKind, index: usize) -> bool {
        match kind {
            TargetKind::Bone => self.bones.get(index).is_some_and(|b| b.active),
            TargetKind::Slot => self
                .slots
                .get(index)
                .and_then(|s| self.bones.get(s.bone))
                .is_some_and(|b| b.active),
            TargetKind::IkConstraint => self.ik_constraints.get(index).is_some_and(|c| c.active),
            TargetKind::TransformConstraint => self
                .transform_constraints
                .get(index)
                .is_some_and(|c| c.active),
            TargetKind::PathConstraint => index < self.path_constraints.len(),
            TargetKind::DrawOrder => true,
        }
    }

    pub fn skin(&self) -> Option<&str> {
        self.skin.as_deref()
    }

    /// Switches skins. From no skin, setup attachments found in the new skin are attached; from
    /// another skin, attachments that came from the old skin are replaced when the new skin has
    /// the same key.
    pub fn set_skin(&mut self, name: Option<&str>) -> Result<(), Error> {
        let data = self.data.clone();
        let new_skin = match name {
            Some(name) => Some(data.skin(name).ok_or_else(|| Error::UnknownSkin {
                name: name.to_string(),
            })?),
            None => None,
        };
        let old_skin = self.skin.take();
        self.skin = new_skin.map(|s| s.name.clone());

        if let Some(new_skin) = new_skin {
            for (index, slot) in self.slots.iter_mut().enumerate() {
                match old_skin.as_deref() {
                    None => {
                        let setup = data.slots.get(index).and_then(|s| s.attachment.as_deref());
                        if let Some(key) = setup.filter(|k| new_skin.attachment(index, k).is_some())
                        {
                            slot.set_attachment_from(Some(key), Some(&new_skin.name));
                        }
                    }
                    Some(old) => {
                        if slot.attachment_skin.as_deref() != Some(old) {
                            continue;
                        }
                        let key = slot.attachment.clone();
                        if let Some(key) = key.filter(|k| new_skin.attachment(index, k).is_some()) {
                            slot.set_attachment_from(Some(&key), Some(&new_skin.name));
                        }
                    }
                }
            }
        }

        self.update_cache();
        Ok(())
    }

    /// Looks up an attachment name by key in the current skin, then the default skin. Without
    /// any skins the key is the name.
    pub fn attachment<'a>(&'a self, slot_index: usize, key: &'a str) -> Option<&'a str> {
        if self.data.skins.is_empty() {
            return (slot_index < self.slots.len()).then_some(key);
        }
        let skin = self.attachment_skin(slot_index, key)?;
        skin.attachment(slot_index, key)
    }

    /// The attachment name currently shown by a slot.
    pub fn slot_attachment(&self, slot_index: usize) -> Option<&str> {
        let slot = self.slots.get(slot_index)?;
        let key = slot.attachment.as_deref()?;
        if let Some(name) = slot
            .attachment_skin
            .as_deref()
            .and_then(|skin| self.data.skin(skin))
            .and_then(|skin| skin.attachment(slot_index, key))
        {
            return Some(name);
        }
        self.attachment(slot_index, key)
    }

    fn attachment_skin(&self, slot_index: usize, key: &str) -> Option<&SkinData> {
        let current = self.skin.as_deref().and_then(|name| self.data.skin(name));
        let default = match self.skin.as_deref() {
            Some(DEFAULT_SKIN_NAME) => None,
            _ => self.data.skin(DEFAULT_SKIN_NAME),
        };
        [current, default]
            .into_iter()
            .flatten()
            .find(|skin| skin.attachment(slot_index, key).is_some())
    }

    /// Attaches `key` to a slot if a skin provides it, otherwise clears the slot.
    pub(crate) fn attach(&mut self, slot_index: usize, key: Option<&str>) {
        let (key, skin) = match key {
            None => (None, None),
            Some(key) if self.data.skins.is_empty() => (Some(key), None),
            Some(key) => match self.attachment_skin(slot_index, key) {
                Some(skin) => (Some(key), Some(skin.name.clone())),
                None => (None, None),
            },
        };
        if let Some(slot) = self.slots.get_mut(slot_index) {
            slot.set_attachment_from(key, skin.as_deref());
        }
    }

    pub fn set_to_setup_pose(&mut self) {
        self.set_bones_to_setup_pose();
        self.set_slots_to_setup_pose();
    }

    /// Resets bones and constraint parameters.
    pub fn set_bones_to_setup_pose(&mut self) {
        for (bone, data) in self.bones.iter_mut().zip(&self.data.bones) {
            bone.set_to_setup_pose(data);
        }
        for (c, data) in self.ik_constraints.iter_mut().zip(&self.data.ik_constraints) {
            c.mix = data.mix;
            c.softness = data.softness;
            c.bend_direction = data.bend_direction;
            c.compress = data.compress;
            c.stretch = data.stretch;
        }
        for (c, data) in self
            .transform_constraints
            .iter_mut()
            .zip(&self.data.transform_constraints)
        {
            for (mix, setup) in c.mixes_mut().into_iter().zip(data.mixes()) {
                *mix = setup;
            }
        }
        for (c, data) in self
            .path_constraints
            .iter_mut()
            .zip(&self.data.path_constraints)
        {
            c.position = data.position;
            c.spacing = data.spacing;
            c.mix_rotate = data.mix_rotate;
            c.mix_x = data.mix_x;
            c.mix_y = data.mix_y;
        }
    }

    /// Resets slot colors, attachments and draw order.
    pub fn set_slots_to_setup_pose(&mut self) {
        self.draw_order.clear();
        self.draw_order.extend(0..self.slots.len());
        let data = self.data.clone();
        for (index, slot_data) in data.slots.iter().enumerate() {
            if let Some(slot) = self.slots.get_mut(index) {
                slot.color = slot_data.color;
                slot.dark_color = slot_data.dark_color;
                slot.deform.clear();
            }
            self.attach(index, slot_data.attachment.as_deref());
        }
    }

    pub fn find_bone(&self, name: &str) -> Option<&Bone> {
        self.bones.get(self.data.find_bone(name)?)
    }

    pub fn find_slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(self.data.find_slot(name)?)
    }

    /// Recomputes which bones and constraints are active for the current skin and the order they
    /// are updated in. Called by [`Skeleton::new`] and [`Skeleton::set_skin`].
    pub fn update_cache(&mut self) {
        let data = self.data.clone();
        let skin = self.skin.as_deref().and_then(|name| data.skin(name));

        for (bone, bone_data) in self.bones.iter_mut().zip(&data.bones) {
            bone.active = !bone_data.skin_required;
        }
        if let Some(skin) = skin {
            for &index in &skin.bones {
                let mut cursor = Some(index);
                while let Some(bone) = cursor.and_then(|i| self.bones.get_mut(i)) {
                    bone.active = true;
                    cursor = bone.parent;
                }
            }
        }

        let bone_active = |bones: &[Bone], index: usize| bones.get(index).is_some_and(|b| b.active);
        for (index, (c, c_data)) in self
            .ik_constraints
            .iter_mut()
            .zip(&data.ik_constraints)
            .enumerate()
        {
            let in_skin = skin.is_some_and(|s| s.ik_constraints.contains(&index));
            c.active = bone_active(&self.bones, c_data.target) && (!c_data.skin_required || in_skin);
        }
        for (index, (c, c_data)) in self
            .transform_constraints
            .iter_mut()
            .zip(&data.transform_constraints)
            .enumerate()
        {
            let in_skin = skin.is_some_and(|s| s.transform_constraints.contains(&index));
            c.active = bone_active(&self.bones, c_data.target) && (!c_data.skin_required || in_skin);
        }

        self.rebuild_update_cache();
    }

    fn rebuild_update_cache(&mut self) {
        #[derive(Clone, Copy)]
        enum Kind {
            Ik,
            Transform,
        }

        let data = self.data.clone();
        let mut sorted = self.bones.iter().map(|b| !b.active).collect::<Vec<_>>();
        let mut cache = Vec::new();

        let mut ordered = Vec::new();
        for (index, c) in self.ik_constraints.iter().enumerate() {
            if let Some(c_data) = data.ik_constraints.get(index).filter(|_| c.active) {
                ordered.push((c_data.order, Kind::Ik, index));
            }
        }
        for (index, c) in self.transform_constraints.iter().enumerate() {
            if let Some(c_data) = data.transform_constraints.get(index).filter(|_| c.active) {
                ordered.push((c_data.order, Kind::Transform, index));
            }
        }
        ordered.sort_by_key(|&(order, _, _)| order);

        for (_, kind, index) in ordered {
            match kind {
                Kind::Ik => {
                    let c_data = &data.ik_constraints[index];
                    self.sort_bone(c_data.target, &mut sorted, &mut cache);
                    let Some(&parent) = c_data.bones.first() else {
                        continue;
                    };
                    self.sort_bone(parent, &mut sorted, &mut cache);
                    cache.push(UpdateCacheItem::Ik(index));
                    if let Some(sorted) = sorted.get_mut(parent) {
                        *sorted = false;
                    }
                    self.sort_reset_children(parent, &mut sorted);
                }
                Kind::Transform => {
                    let c_data = &data.transform_constraints[index];
                    if !c_data.local {
                        self.sort_bone(c_data.target, &mut sorted, &mut cache);
                        for &bone in &c_data.bones {
                            self.sort_bone(bone, &mut sorted, &mut cache);
                        }
                    }
                    cache.push(UpdateCacheItem::Transform(index));
                    for &bone in &c_data.bones {
                        self.sort_reset_children(bone, &mut sorted);
                    }
                    for &bone in &c_data.bones {
                        if let Some(sorted) = sorted.get_mut(bone) {
                            *sorted = !c_data.local;
                        }
                    }
                }
            }
        }

        for index in 0..self.bones.len() {
            self.sort_bone(index, &mut sorted, &mut cache);
        }
        self.update_cache = cache;
    }

    fn sort_bone(&self, index: usize, sorted: &mut [bool], cache: &mut Vec<UpdateCacheItem>) {
        if sorted.get(index) != Some(&false) {
            return;
        }
        if let Some(parent) = self.bones[index].parent {
            self.sort_bone(parent, sorted, cache);
        }
        sorted[index] = true;
        cache.push(UpdateCacheItem::Bone(index));
    }

    fn sort_reset_children(&self, index: usize, sorted: &mut [bool]) {
        let Some(children) = self.bone_children.get(index) else {
            return;
        };
        for &child in children {
            if !self.bones[child].active || !sorted[child] {
                continue;
            }
            self.sort_reset_children(child, sorted);
            sorted[child] = false;
        }
    }

    /// Computes every active bone's world matrix, solving IK and transform constraints in update
    /// order.
    pub fn update_world_transform(&mut self) {
        for bone in &mut self.bones {
            bone.reset_applied();
        }
        let cache = std::mem::take(&mut self.update_cache);
        for &item in &cache {
            match item {
                UpdateCacheItem::Bone(index) => self.update_bone_world_transform(index),
                UpdateCacheItem::Ik(index) => self.apply_ik_constraint(index),
                UpdateCacheItem::Transform(index) => self.apply_transform_constraint(index),
            }
        }
        self.update_cache = cache;
    }

    fn update_bone_world_transform(&mut self, index: usize) {
        match self.bones[index].parent {
            None => {
                let (x, y, sx, sy) = (self.x, self.y, self.scale_x, self.scale_y);
                update_world_transform_root(&mut self.bones[index], x, y, sx, sy);
            }
            Some(parent) => {
                let parent = ParentTransform::of(&self.bones[parent]);
                let (sx, sy) = (self.scale_x, self.scale_y);
                update_world_transform_child(&mut self.bones[index], sx, sy, &parent);
            }
        }
    }

    fn apply_ik_constraint(&mut self, index: usize) {
        let data = self.data.clone();
        let (Some(ik), Some(ik_data)) = (self.ik_constraints.get(index), data.ik_constraints.get(index))
        else {
            return;
        };
        let mix = ik.mix;
        if mix == 0.0 {
            return;
        }
        let Some(target) = self.bones.get(ik_data.target) else {
            return;
        };
        let (target_x, target_y) = (target.world_x, target.world_y);
        let (softness, bend_direction, compress, stretch) =
            (ik.softness, ik.bend_direction, ik.compress, ik.stretch);

        match ik_data.bones.as_slice() {
            &[bone] => self.apply_ik_one(
                bone,
                [target_x, target_y],
                compress,
                stretch,
                ik_data.uniform,
                mix,
            ),
            &[parent, child] => self.apply_ik_two(
                parent,
                child,
                [target_x, target_y],
                bend_direction,
                softness,
                stretch,
                ik_data.uniform,
                mix,
            ),
            _ => {}
        }
    }

    fn apply_ik_one(
        &mut self,
        index: usize,
        [target_x, target_y]: [f32; 2],
        compress: bool,
        stretch: bool,
        uniform: bool,
        alpha: f32,
    ) {
        if !alpha.is_finite() || alpha <= 0.0 {
            return;
        }
        let Some(parent) = self.bones.get(index).and_then(|b| b.parent) else {
            return;
        };
        let ParentTransform {
            a: pa,
            b: mut pb,
            c: pc,
            d: mut pd,
            world_x: pwx,
            world_y: pwy,
        } = ParentTransform::of(&self.bones[parent]);

        let bone = &self.bones[index];
        let (mut sx, mut sy) = (bone.ascale_x, bone.ascale_y);
        let mut rotation_ik = -bone.ashear_x - bone.arotation;

        let to_parent_space = |pb: f32, pd: f32| {
            let (x, y) = (target_x - pwx, target_y - pwy);
            let det = pa * pd - pb * pc;
            if det.abs() <= 1.0e-4 {
                (0.0, 0.0)
            } else {
                (
                    (x * pd - y * pb) / det - bone.ax,
                    (y * pa - x * pc) / det - bone.ay,
                )
            }
        };
        let (mut tx, mut ty) = match bone.inherit {
            Inherit::OnlyTranslation => (
                (target_x - bone.world_x) * signum(self.scale_x),
                (target_y - bone.world_y) * signum(self.scale_y),
            ),
            Inherit::NoRotationOrReflection => {
                let s = (pa * pd - pb * pc).abs() / (pa * pa + pc * pc).max(1.0e-4);
                let sa = pa / self.scale_x;
                let sc = pc / self.scale_y;
                pb = -sc * s * self.scale_x;
                pd = sa * s * self.scale_y;
                rotation_ik += sc.atan2(sa).to_degrees();
                to_parent_space(pb, pd)
            }
            _ => to_parent_space(pb, pd),
        };

        rotation_ik += ty.atan2(tx).to_degrees();
        if sx < 0.0 {
            rotation_ik += 180.0;
        }
        rotation_ik = shortest_rotation(rotation_ik);

        if compress || stretch {
            if matches!(bone.inherit, Inherit::NoScale | Inherit::NoScaleOrReflection) {
                tx = target_x - bone.world_x;
                ty = target_y - bone.world_y;
            }
            let length = self.data.bones.get(index).map_or(0.0, |d| d.length);
            let b = length * sx;
            if b > 1.0e-4 {
                let dd = tx * tx + ty * ty;
                if (compress && dd < b * b) || (stretch && dd > b * b) {
                    let s = (dd.sqrt() / b - 1.0) * alpha + 1.0;
                    sx *= s;
                    if uniform {
                        sy *= s;
                    }
                }
            }
        }

        let bone = &mut self.bones[index];
        bone.arotation += rotation_ik * alpha;
        bone.ascale_x = sx;
        bone.ascale_y = sy;
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_ik_two(
        &mut self,
        parent_index: usize,
        child_index: usize,
        [target_x, target_y]: [f32; 2],
        bend_direction: i32,
        softness: f32,
        stretch: bool,
        uniform: bool,
        alpha: f32,
    ) {
        const EPSILON: f32 = 1.0e-4;
        const PI: f32 = std::f32::consts::PI;

        if !alpha.is_finite() || alpha <= 0.0 {
            return;
        }
        let (Some(parent), Some(child)) = (self.bones.get(parent_index), self.bones.get(child_index))
        else {
            return;
        };
        if parent.inherit != Inherit::Normal || child.inherit != Inherit::Normal {
            return;
        }
        let Some(pp_index) = parent.parent else {
            return;
        };

        let (px, py, parent_rotation) = (parent.ax, parent.ay, parent.arotation);
        let (mut sx, mut sy) = (parent.ascale_x, parent.ascale_y);
        let (mut psx, mut psy) = (sx, sy);
        let (mut os1, mut s2) = (0.0f32, 1.0f32);
        if psx < 0.0 {
            psx = -psx;
            os1 = 180.0;
            s2 = -1.0;
        }
        if psy < 0.0 {
            psy = -psy;
            s2 = -s2;
        }

        let (cx, child_ay, child_rotation, child_shear_x) =
            (child.ax, child.ay, child.arotation, child.ashear_x);
        let (mut csx, mut os2) = (child.ascale_x, 0.0f32);
        if csx < 0.0 {
            csx = -csx;
            os2 = 180.0;
        }

        let ParentTransform {
            a: pa,
            b: pb,
            c: pc,
            d: pd,
            world_x: pwx,
            world_y: pwy,
        } = ParentTransform::of(parent);
        let u = (psx - psy).abs() <= EPSILON;
        let (cy, cwx, cwy) = if !u || stretch {
            (0.0, pa * cx + pwx, pc * cx + pwy)
        } else {
            (
                child_ay,
                pa * cx + pb * child_ay + pwx,
                pc * cx + pd * child_ay + pwy,
            )
        };

        let pp = ParentTransform::of(&self.bones[pp_index]);
        let id = pp.a * pp.d - pp.b * pp.c;
        let id = if id.abs() <= EPSILON { 0.0 } else { 1.0 / id };
        let (x, y) = (cwx - pp.world_x, cwy - pp.world_y);
        let dx = (x * pp.d - y * pp.b) * id - px;
        let dy = (y * pp.a - x * pp.c) * id - py;
        let l1 = (dx * dx + dy * dy).sqrt();
        if l1 < EPSILON {
            self.apply_ik_one(
                parent_index,
                [target_x, target_y],
                false,
                stretch,
                false,
                alpha,
            );
            let child = &mut self.bones[child_index];
            child.ay = cy;
            child.arotation = 0.0;
            return;
        }

        let l2 = self.data.bones.get(child_index).map_or(0.0, |d| d.length) * csx;
        let (x, y) = (target_x - pp.world_x, target_y - pp.world_y);
        let mut tx = (x * pp.d - y * pp.b) * id - px;
        let mut ty = (y * pp.a - x * pp.c) * id - py;
        let mut dd = tx * tx + ty * ty;

        if softness != 0.0 {
            let softness = softness.max(0.0) * psx * (csx + 1.0) * 0.5;
            let td = dd.sqrt();
            let sd = td - l1 - l2 * psx + softness;
            if sd > 0.0 {
                let p = (sd / (softness * 2.0)).min(1.0) - 1.0;
                let p = (sd - softness * (1.0 - p * p)) / td.max(EPSILON);
                tx -= p * tx;
                ty -= p * ty;
                dd = tx * tx + ty * ty;
            }
        }

        let bend = if bend_direction >= 0 { 1.0 } else { -1.0 };
        let (mut a1, mut a2);
        if u {
            let l2 = l2 * psx;
            let mut cos = (dd - l1 * l1 - l2 * l2) / (2.0 * l1 * l2);
            if cos < -1.0 {
                cos = -1.0;
                a2 = PI * bend;
            } else if cos > 1.0 {
                cos = 1.0;
                a2 = 0.0;
                if stretch {
                    let s = (dd.sqrt() / (l1 + l2) - 1.0) * alpha + 1.0;
                    sx *= s;
                    if uniform {
                        sy *= s;
                    }
                }
            } else {
                a2 = cos.acos() * bend;
            }
            let a = l1 + l2 * cos;
            let b = l2 * a2.sin();
            a1 = (ty * a - tx * b).atan2(tx * a + ty * b);
        } else {
            let a = psx * l2;
            let b = psy * l2;
            let (aa, bb) = (a * a, b * b);
            let ta = ty.atan2(tx);
            let c = bb * l1 * l1 + aa * dd - aa * bb;
            let c1 = -2.0 * bb * l1;
            let c2 = bb - aa;
            let disc = c1 * c1 - 4.0 * c2 * c;
            (a1, a2) = (0.0, 0.0);
            if disc >= 0.0 {
                let mut q = disc.sqrt();
                if c1 < 0.0 {
                    q = -q;
                }
                q = -(c1 + q) * 0.5;
                let (r0, r1) = (q / c2, c / q);
                let r = if r0.abs() < r1.abs() { r0 } else { r1 };
                let r0 = dd - r * r;
                if r0 >= 0.0 {
                    let y = r0.sqrt() * bend;
                    a1 = ta - y.atan2(r);
                    a2 = (y / psy).atan2((r - l1) / psx);
                }
            } else {
                let (mut min_angle, mut min_x, mut min_y) = (PI, l1 - a, 0.0f32);
                let mut min_dist = min_x * min_x;
                let (mut max_angle, mut max_x, mut max_y) = (0.0f32, l1 + a, 0.0f32);
                let mut max_dist = max_x * max_x;
                let c = -a * l1 / (aa - bb);
                if (-1.0..=1.0).contains(&c) {
                    let c = c.acos();
                    let x = a * c.cos() + l1;
                    let y = b * c.sin();
                    let d = x * x + y * y;
                    if d < min_dist {
                        (min_angle, min_dist, min_x, min_y) = (c, d, x, y);
                    }
                    if d > max_dist {
                        (max_angle, max_dist, max_x, max_y) = (c, d, x, y);
                    }
                }
                if dd <= (min_dist + max_dist) * 0.5 {
                    a1 = ta - (min_y * bend).atan2(min_x);
                    a2 = min_angle * bend;
                } else {
                    a1 = ta - (max_y * bend).atan2(max_x);
                    a2 = max_angle * bend;
                }
            }
        }

        let os = cy.atan2(cx) * s2;
        let a1 = wrap_degrees((a1 - os).to_degrees() + os1 - parent_rotation);
        let a2 =
            wrap_degrees(((a2 + os).to_degrees() - child_shear_x) * s2 + os2 - child_rotation);

        let parent = &mut self.bones[parent_index];
        parent.arotation = parent_rotation + a1 * alpha;
        parent.ascale_x = sx;
        parent.ascale_y = sy;
        parent.ashear_x = 0.0;
        parent.ashear_y = 0.0;

        let child = &mut self.bones[child_index];
        child.ay = cy;
        child.arotation = child_rotation + a2 * alpha;
    }

    fn apply_transform_constraint(&mut self, index: usize) {
        let data = self.data.clone();
        let (Some(c), Some(c_data)) = (
            self.transform_constraints.get(index),
            data.transform_constraints.get(index),
        ) else {
            return;
        };
        let mixes = c.mixes();
        if mixes.iter().all(|&m| m == 0.0) {
            return;
        }
        let Some(target) = self.bones.get(c_data.target).cloned() else {
            return;
        };

        if c_data.local {
            for &index in &c_data.bones {
                if let Some(bone) = self.bones.get_mut(index) {
                    apply_transform_local(bone, &target, c_data, mixes);
                }
            }
        } else {
            for &index in &c_data.bones {
                if index < self.bones.len() {
                    apply_transform_world(&mut self.bones[index], &target, c_data, mixes);
                    self.update_applied_transform(index);
                }
            }
        }
    }

    /// Derives the applied local transform from a world matrix a constraint wrote directly.
    fn update_applied_transform(&mut self, index: usize) {
        let Some(parent) = self.bones[index].parent else {
            let (x, y) = (self.x, self.y);
            let bone = &mut self.bones[index];
            let (a, b, c, d) = (bone.a, bone.b, bone.c, bone.d);
            bone.ax = bone.world_x - x;
            bone.ay = bone.world_y - y;
            bone.arotation = c.atan2(a).to_degrees();
            bone.ascale_x = (a * a + c * c).sqrt();
            bone.ascale_y = (b * b + d * d).sqrt();
            bone.ashear_x = 0.0;
            bone.ashear_y = (a * b + c * d).atan2(a * d - b * c).to_degrees();
            return;
        };

        let ParentTransform {
            a: pa,
            b: mut pb,
            c: mut pc,
            d: mut pd,
            world_x: pwx,
            world_y: pwy,
        } = ParentTransform::of(&self.bones[parent]);
        let mut pa = pa;
        let det = pa * pd - pb * pc;
        let mut pid = 1.0 / det;
        let (mut ia, mut ib, mut ic, mut id) = (pd * pid, pb * pid, pc * pid, pa * pid);

        let (skeleton_x, skeleton_y) = (self.scale_x, self.scale_y);
        let bone = &mut self.bones[index];
        let dx = bone.world_x - pwx;
        let dy = bone.world_y - pwy;
        bone.ax = dx * ia - dy * ib;
        bone.ay = dy * id - dx * ic;

        let (ra, rb, rc, rd) = if bone.inherit == Inherit::OnlyTranslation {
            (bone.a, bone.b, bone.c, bone.d)
        } else {
            match bone.inherit {
                Inherit::NoRotationOrReflection => {
                    let s = (pa * pd - pb * pc).abs() / (pa * pa + pc * pc);
                    pb = -pc * skeleton_x * s / skeleton_y;
                    pd = pa * skeleton_y * s / skeleton_x;
                    pid = 1.0 / (pa * pd - pb * pc);
                    ia = pd * pid;
                    ib = pb * pid;
                }
                Inherit::NoScale | Inherit::NoScaleOrReflection => {
                    let (sin, cos) = bone.arotation.to_radians().sin_cos();
                    pa = (pa * cos + pb * sin) / skeleton_x;
                    pc = (pc * cos + pd * sin) / skeleton_y;
                    let mut s = (pa * pa + pc * pc).sqrt();
                    if s > 1.0e-5 {
                        s = 1.0 / s;
                    }
                    pa *= s;
                    pc *= s;
                    s = (pa * pa + pc * pc).sqrt();
                    if bone.inherit == Inherit::NoScale
                        && (det < 0.0) != ((skeleton_x < 0.0) != (skeleton_y < 0.0))
                    {
                        s = -s;
                    }
                    let r = std::f32::consts::FRAC_PI_2 + pc.atan2(pa);
                    pb = r.cos() * s;
                    pd = r.sin() * s;
                    pid = 1.0 / (pa * pd - pb * pc);
                    ia = pd * pid;
                    ib = pb * pid;
                    ic = pc * pid;
                    id = pa * pid;
                }
                _ => {}
            }
            (
                ia * bone.a - ib * bone.c,
                ia * bone.b - ib * bone.d,
                id * bone.c - ic * bone.a,
                id * bone.d - ic * bone.b,
            )
        };

        bone.ashear_x = 0.0;
        bone.ascale_x = (ra * ra + rc * rc).sqrt();
        if bone.ascale_x > 1.0e-4 {
            let det = ra * rd - rb * rc;
            bone.ascale_y = det / bone.ascale_x;
            bone.ashear_y = -(ra * rb + rc * rd).atan2(det).to_degrees();
            bone.arotation = rc.atan2(ra).to_degrees();
        } else {
            bone.ascale_x = 0.0;
            bone.ascale_y = (rb * rb + rd * rd).sqrt();
            bone.ashear_y = 0.0;
            bone.arotation = 90.0 - rd.atan2(rb).to_degrees();
        }
    }
}

fn apply_transform_local(
    bone: &mut Bone,
    target: &Bone,
    data: &crate::TransformConstraintData,
    [mix_rotate, mix_x, mix_y, mix_scale_x, mix_scale_y, mix_shear_y]: [f32; 6],
) {
    if data.relative {
        bone.arotation += (target.arotation + data.offset_rotation) * mix_rotate;
        bone.ax += (target.ax + data.offset_x) * mix_x;
        bone.ay += (target.ay + data.offset_y) * mix_y;
        bone.ascale_x *= (target.ascale_x - 1.0 + data.offset_scale_x) * mix_scale_x + 1.0;
        bone.ascale_y *= (target.ascale_y - 1.0 + data.offset_scale_y) * mix_scale_y + 1.0;
        bone.ashear_y += (target.ashear_y + data.offset_shear_y) * mix_shear_y;
        return;
    }

    bone.arotation += (target.arotation - bone.arotation + data.offset_rotation) * mix_rotate;
    bone.ax += (target.ax - bone.ax + data.offset_x) * mix_x;
    bone.ay += (target.ay - bone.ay + data.offset_y) * mix_y;
    if mix_scale_x != 0.0 && bone.ascale_x.abs() > 1.0e-12 {
        bone.ascale_x = (bone.ascale_x
            + (target.ascale_x - bone.ascale_x + data.offset_scale_x) * mix_scale_x)
            / bone.ascale_x;
    }
    if mix_scale_y != 0.0 && bone.ascale_y.abs() > 1.0e-12 {
        bone.ascale_y = (bone.ascale_y
            + (target.ascale_y - bone.ascale_y + data.offset_scale_y) * mix_scale_y)
            / bone.ascale_y;
    }
    bone.ashear_y += (target.ashear_y - bone.ashear_y + data.offset_shear_y) * mix_shear_y;
}

fn apply_transform_world(
    bone: &mut Bone,
    target: &Bone,
    data: &crate::TransformConstraintData,
    [mix_rotate, mix_x, mix_y, mix_scale_x, mix_scale_y, mix_shear_y]: [f32; 6],
) {
    let (ta, tb, tc, td) = (target.a, target.b, target.c, target.d);
    let reflect = if ta * td - tb * tc > 0.0 { 1.0 } else { -1.0 };
    let offset_rotation = data.offset_rotation.to_radians() * reflect;
    let offset_shear_y = data.offset_shear_y.to_radians() * reflect;
    let relative = data.relative;

    if mix_rotate != 0.0 {
        let r = if relative {
            tc.atan2(ta) + offset_rotation
        } else {
            tc.atan2(ta) - bone.c.atan2(bone.a) + offset_rotation
        };
        let (sin, cos) = (wrap_pi(r) * mix_rotate).sin_cos();
        let (a, b, c, d) = (bone.a, bone.b, bone.c, bone.d);
        bone.a = cos * a - sin * c;
        bone.b = cos * b - sin * d;
        bone.c = sin * a + cos * c;
        bone.d = sin * b + cos * d;
    }

    if mix_x != 0.0 || mix_y != 0.0 {
        let tx = data.offset_x * ta + data.offset_y * tb + target.world_x;
        let ty = data.offset_x * tc + data.offset_y * td + target.world_y;
        if relative {
            bone.world_x += tx * mix_x;
            bone.world_y += ty * mix_y;
        } else {
            bone.world_x += (tx - bone.world_x) * mix_x;
            bone.world_y += (ty - bone.world_y) * mix_y;
        }
    }

    if mix_scale_x != 0.0 {
        let ts = (ta * ta + tc * tc).sqrt();
        let s = if relative {
            (ts - 1.0 + data.offset_scale_x) * mix_scale_x + 1.0
        } else {
            let s = (bone.a * bone.a + bone.c * bone.c).sqrt();
            if s <= 1.0e-6 {
                1.0
            } else {
                (s + (ts - s + data.offset_scale_x) * mix_scale_x) / s
            }
        };
        bone.a *= s;
        bone.c *= s;
    }

    if mix_scale_y != 0.0 {
        let ts = (tb * tb + td * td).sqrt();
        let s = if relative {
            (ts - 1.0 + data.offset_scale_y) * mix_scale_y + 1.0
        } else {
            let s = (bone.b * bone.b + bone.d * bone.d).sqrt();
            if s <= 1.0e-6 {
                1.0
            } else {
                (s + (ts - s + data.offset_scale_y) * mix_scale_y) / s
            }
        };
        bone.b *= s;
        bone.d *= s;
    }

    if mix_shear_y != 0.0 {
        let by = bone.d.atan2(bone.b);
        let r = if relative {
            by + (wrap_pi(td.atan2(tb) - tc.atan2(ta)) - std::f32::consts::FRAC_PI_2
                + offset_shear_y)
                * mix_shear_y
        } else {
            let r = td.atan2(tb) - tc.atan2(ta) - (by - bone.c.atan2(bone.a));
            by + (wrap_pi(r) + offset_shear_y) * mix_shear_y
        };
        let s = (bone.b * bone.b + bone.d * bone.d).sqrt();
        bone.b = r.cos() * s;
        bone.d = r.sin() * s;
    }
}

#[derive(Copy, Clone, Debug)]
struct ParentTransform {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    world_x: f32,
    world_y: f32,
}

impl ParentTransform {
    fn of(bone: &Bone) -> Self {
        Self {
            a: bone.a,
            b: bone.b,
            c: bone.c,
            d: bone.d,
            world_x: bone.world_x,
            world_y: bone.world_y,
        }
    }
}

/// Local 2x2 matrix from the applied rotation, shear and scale (degrees).
fn local_matrix(rotation: f32, bone: &Bone) -> [f32; 4] {
    let rotation_x = (rotation + bone.ashear_x).to_radians();
    let rotation_y = (rotation + 90.0 + bone.ashear_y).to_radians();
    [
        rotation_x.cos() * bone.ascale_x,
        rotation_y.cos() * bone.ascale_y,
        rotation_x.sin() * bone.ascale_x,
        rotation_y.sin() * bone.ascale_y,
    ]
}

fn update_world_transform_root(bone: &mut Bone, x: f32, y: f32, scale_x: f32, scale_y: f32) {
    let [la, lb, lc, ld] = local_matrix(bone.arotation, bone);
    bone.a = la * scale_x;
    bone.b = lb * scale_x;
    bone.c = lc * scale_y;
    bone.d = ld * scale_y;
    bone.world_x = bone.ax * scale_x + x;
    bone.world_y = bone.ay * scale_y + y;
}

fn update_world_transform_child(
    bone: &mut Bone,
    skeleton_scale_x: f32,
    skeleton_scale_y: f32,
    parent: &ParentTransform,
) {
    let (mut pa, mut pb, mut pc, mut pd) = (parent.a, parent.b, parent.c, parent.d);

    bone.world_x = pa * bone.ax + pb * bone.ay + parent.world_x;
    bone.world_y = pc * bone.ax + pd * bone.ay + parent.world_y;

    let (a, b, c, d) = match bone.inherit {
        Inherit::Normal => {
            let [la, lb, lc, ld] = local_matrix(bone.arotation, bone);
            (
                pa * la + pb * lc,
                pa * lb + pb * ld,
                pc * la + pd * lc,
                pc * lb + pd * ld,
            )
        }
        Inherit::OnlyTranslation => {
            let [la, lb, lc, ld] = local_matrix(bone.arotation, bone);
            (
                la * skeleton_scale_x,
                lb * skeleton_scale_x,
                lc * skeleton_scale_y,
                ld * skeleton_scale_y,
            )
        }
        Inherit::NoRotationOrReflection => {
            let sx = recip_or_zero(skeleton_scale_x);
            let sy = recip_or_zero(skeleton_scale_y);
            pa *= sx;
            pc *= sy;

            let mut s = pa * pa + pc * pc;
            let prx;
            if s > 1.0e-4 {
                s = (pa * pd * sy - pb * sx * pc).abs() / s;
                pb = pc * s;
                pd = pa * s;
                prx = pc.atan2(pa).to_degrees();
            } else {
                pa = 0.0;
                pc = 0.0;
                prx = 90.0 - pd.atan2(pb).to_degrees();
            }

            let [la, lb, lc, ld] = local_matrix(bone.arotation - prx, bone);
            (
                (pa * la - pb * lc) * skeleton_scale_x,
                (pa * lb - pb * ld) * skeleton_scale_x,
                (pc * la + pd * lc) * skeleton_scale_y,
                (pc * lb + pd * ld) * skeleton_scale_y,
            )
        }
        Inherit::NoScale | Inherit::NoScaleOrReflection => {
            let (sin, cos) = bone.arotation.to_radians().sin_cos();

            let mut za = (pa * cos + pb * sin) * recip_or_zero(skeleton_scale_x);
            let mut zc = (pc * cos + pd * sin) * recip_or_zero(skeleton_scale_y);
            let mut s = (za * za + zc * zc).sqrt();
            if s > 1.0e-5 {
                s = 1.0 / s;
            }
            za *= s;
            zc *= s;

            let mut s = (za * za + zc * zc).sqrt();
            if bone.inherit == Inherit::NoScale {
                let det = pa * pd - pb * pc;
                if (det < 0.0) != ((skeleton_scale_x < 0.0) != (skeleton_scale_y < 0.0)) {
                    s = -s;
                }
            }

            let rotation = std::f32::consts::FRAC_PI_2 + zc.atan2(za);
            let zb = rotation.cos() * s;
            let zd = rotation.sin() * s;

            let [la, lb, lc, ld] = local_matrix(0.0, bone);
            (
                (za * la + zb * lc) * skeleton_scale_x,
                (za * lb + zb * ld) * skeleton_scale_x,
                (zc * la + zd * lc) * skeleton_scale_y,
                (zc * lb + zd * ld) * skeleton_scale_y,
            )
        }
    };
    bone.a = a;
    bone.b = b;
    bone.c = c;
    bone.d = d;
}

fn recip_or_zero(v: f32) -> f32 {
    if v.abs() > 1.0e-12 { 1.0 / v } else { 0.0 }
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

fn shortest_rotation(degrees: f32) -> f32 {
    let degrees = degrees.rem_euclid(360.0);
    if degrees > 180.0 { degrees - 360.0 } else { degrees }
}

fn wrap_degrees(degrees: f32) -> f32 {
    if degrees > 180.0 {
        degrees - 360.0
    } else if degrees < -180.0 {
        degrees + 360.0
    } else {
        degrees
    }
}

fn wrap_pi(radians: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    if radians > PI {
        radians - TAU
    } else if radians < -PI {
        radians + TAU
    } else {
        radians
    }
}
