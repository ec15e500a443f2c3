use super::animation::{
    ATTACHMENT_STATE_SETUP, AttachmentKeying, apply_attachment, apply_rotate_mixed,
};
use crate::{
    Animation, EMPTY_ANIMATION_NAME, Error, Event, ListenerError, MixBlend, MixConfig,
    MixDirection, Skeleton, SkeletonData, Timeline,
};
use log::{debug, trace, warn};
use slotmap::SlotMap;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Crossfade durations between pairs of animations, shared by every [`AnimationState`] built
/// from it.
#[derive(Clone, Debug)]
pub struct AnimationStateData {
    skeleton_data: Arc<SkeletonData>,
    pub default_mix: f32,
    mixes: HashMap<String, HashMap<String, f32>>,
}

impl AnimationStateData {
    pub fn new(skeleton_data: Arc<SkeletonData>) -> Self {
        Self {
            skeleton_data,
            default_mix: 0.0,
            mixes: HashMap::new(),
        }
    }

    pub fn from_config(skeleton_data: Arc<SkeletonData>, config: &MixConfig) -> Result<Self, Error> {
        check_duration(config.default_mix, "default mix")?;
        let mut data = Self::new(skeleton_data);
        data.default_mix = config.default_mix;
        for pair in &config.mixes {
            data.set_mix(&pair.from, &pair.to, pair.duration)?;
        }
        Ok(data)
    }

    pub fn skeleton_data(&self) -> &Arc<SkeletonData> {
        &self.skeleton_data
    }

    /// Sets the crossfade used when `to` replaces `from` on a track. Either name may be the empty
    /// animation.
    pub fn set_mix(&mut self, from: &str, to: &str, duration: f32) -> Result<(), Error> {
        check_duration(duration, "mix duration")?;
        for name in [from, to] {
            if name != EMPTY_ANIMATION_NAME && self.skeleton_data.animation(name).is_none() {
                return Err(Error::UnknownAnimation {
                    name: name.to_string(),
                });
            }
        }
        self.mixes
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), duration);
        Ok(())
    }

    pub fn mix(&self, from: &str, to: &str) -> f32 {
        self.mixes
            .get(from)
            .and_then(|m| m.get(to))
            .copied()
            .unwrap_or(self.default_mix)
    }
}

fn check_duration(value: f32, what: &str) -> Result<(), Error> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidValue {
            message: format!("{what} must be finite and >= 0, got {value}"),
        });
    }
    Ok(())
}

slotmap::new_key_type! {
    /// Stable reference to a [`TrackEntry`]. Stale once the entry's `Dispose` event has been
    /// dispatched; lookups and setters then do nothing.
    pub struct TrackEntryHandle;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TimelineMode {
    Subsequent,
    First,
    HoldSubsequent,
    HoldFirst,
    HoldMix(TrackEntryHandle),
}

/// One scheduled playback of an [`Animation`] on a track.
pub struct TrackEntry {
    animation: Arc<Animation>,
    pub track_index: usize,
    pub looped: bool,
    pub reverse: bool,
    pub shortest_rotation: bool,
    pub hold_previous: bool,

    pub delay: f32,
    pub track_time: f32,
    pub track_end: f32,
    pub time_scale: f32,
    pub alpha: f32,
    pub mix_time: f32,
    pub mix_duration: f32,
    pub mix_blend: MixBlend,

    pub animation_start: f32,
    pub animation_end: f32,
    animation_last: f32,
    next_animation_last: f32,
    track_last: f32,
    next_track_last: f32,

    pub event_threshold: f32,
    pub attachment_threshold: f32,
    pub draw_order_threshold: f32,

    interrupt_alpha: f32,
    total_alpha: f32,

    next: Option<TrackEntryHandle>,
    previous: Option<TrackEntryHandle>,
    mixing_from: Option<TrackEntryHandle>,
    mixing_to: Option<TrackEntryHandle>,

    listener: Option<Box<dyn AnimationStateListener>>,

    timeline_mode: Vec<TimelineMode>,
    timelines_rotation: Vec<f32>,
}

impl std::fmt::Debug for TrackEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackEntry")
            .field("animation", &self.animation.name())
            .field("track_index", &self.track_index)
            .field("looped", &self.looped)
            .field("delay", &self.delay)
            .field("track_time", &self.track_time)
            .field("track_end", &self.track_end)
            .field("time_scale", &self.time_scale)
            .field("alpha", &self.alpha)
            .field("mix_time", &self.mix_time)
            .field("mix_duration", &self.mix_duration)
            .field("mixing_from", &self.mixing_from)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl TrackEntry {
    pub fn animation(&self) -> &Arc<Animation> {
        &self.animation
    }

    pub fn animation_last(&self) -> f32 {
        self.animation_last
    }

    pub fn track_last(&self) -> f32 {
        self.track_last
    }

    pub fn next(&self) -> Option<TrackEntryHandle> {
        self.next
    }

    pub fn previous(&self) -> Option<TrackEntryHandle> {
        self.previous
    }

    pub fn mixing_from(&self) -> Option<TrackEntryHandle> {
        self.mixing_from
    }

    pub fn mixing_to(&self) -> Option<TrackEntryHandle> {
        self.mixing_to
    }

    pub fn animation_time(&self) -> f32 {
        if self.looped {
            let duration = self.animation_end - self.animation_start;
            if duration == 0.0 {
                return self.animation_start;
            }
            return self.track_time % duration + self.animation_start;
        }
        (self.track_time + self.animation_start).min(self.animation_end)
    }

    pub fn is_complete(&self) -> bool {
        !self.looped && self.track_time >= self.animation_end - self.animation_start
    }

    pub fn mix_progress(&self) -> f32 {
        if self.mix_duration <= 0.0 {
            return 1.0;
        }
        (self.mix_time / self.mix_duration).clamp(0.0, 1.0)
    }

    pub fn track_complete(&self) -> f32 {
        let duration = self.animation_end - self.animation_start;
        if duration != 0.0 {
            if self.looped {
                return duration * (1.0 + (self.track_time / duration).floor());
            }
            if self.track_time < duration {
                return duration;
            }
        }
        self.track_time
    }

    pub fn loop_count(&self) -> u32 {
        let duration = self.animation_end - self.animation_start;
        if duration <= 0.0 {
            return 0;
        }
        (self.track_time / duration).floor().max(0.0) as u32
    }
}

impl TrackEntryHandle {
    fn with_entry_mut(self, state: &mut AnimationState, f: impl FnOnce(&mut TrackEntry)) {
        if let Some(entry) = state.entries.get_mut(self) {
            f(entry);
        }
    }

    pub fn set_listener<L: AnimationStateListener + 'static>(
        self,
        state: &mut AnimationState,
        listener: L,
    ) {
        self.with_entry_mut(state, |entry| {
            entry.listener = Some(Box::new(listener));
        });
    }

    pub fn set_time_scale(self, state: &mut AnimationState, time_scale: f32) {
        self.with_entry_mut(state, |entry| {
            entry.time_scale = time_scale;
        });
    }

    pub fn set_alpha(self, state: &mut AnimationState, alpha: f32) {
        self.with_entry_mut(state, |entry| {
            entry.alpha = alpha;
        });
    }

    pub fn set_track_end(self, state: &mut AnimationState, track_end: f32) {
        self.with_entry_mut(state, |entry| {
            entry.track_end = track_end;
        });
    }

    pub fn set_delay(self, state: &mut AnimationState, delay: f32) {
        self.with_entry_mut(state, |entry| {
            entry.delay = delay;
        });
    }

    /// Changing the mix duration of a queued entry does not move its start; adjust the delay too.
    pub fn set_mix_duration(self, state: &mut AnimationState, mix_duration: f32) {
        self.with_entry_mut(state, |entry| {
            entry.mix_duration = mix_duration;
        });
    }

    pub fn set_mix_blend(self, state: &mut AnimationState, mix_blend: MixBlend) {
        self.with_entry_mut(state, |entry| {
            entry.mix_blend = mix_blend;
        });
    }

    pub fn set_hold_previous(self, state: &mut AnimationState, hold_previous: bool) {
        self.with_entry_mut(state, |entry| {
            entry.hold_previous = hold_previous;
        });
        state.animations_changed = true;
    }

    pub fn set_reverse(self, state: &mut AnimationState, reverse: bool) {
        self.with_entry_mut(state, |entry| {
            entry.reverse = reverse;
        });
    }

    pub fn set_shortest_rotation(self, state: &mut AnimationState, shortest_rotation: bool) {
        self.with_entry_mut(state, |entry| {
            entry.shortest_rotation = shortest_rotation;
        });
    }

    pub fn reset_rotation_directions(self, state: &mut AnimationState) {
        self.with_entry_mut(state, |entry| {
            entry.timelines_rotation.clear();
        });
    }

    pub fn set_event_threshold(self, state: &mut AnimationState, threshold: f32) {
        self.with_entry_mut(state, |entry| {
            entry.event_threshold = threshold;
        });
    }

    pub fn set_attachment_threshold(self, state: &mut AnimationState, threshold: f32) {
        self.with_entry_mut(state, |entry| {
            entry.attachment_threshold = threshold;
        });
    }

    pub fn set_draw_order_threshold(self, state: &mut AnimationState, threshold: f32) {
        self.with_entry_mut(state, |entry| {
            entry.draw_order_threshold = threshold;
        });
    }

    pub fn set_animation_start(self, state: &mut AnimationState, animation_start: f32) {
        self.with_entry_mut(state, |entry| {
            entry.animation_start = animation_start;
        });
    }

    pub fn set_animation_end(self, state: &mut AnimationState, animation_end: f32) {
        self.with_entry_mut(state, |entry| {
            entry.animation_end = animation_end;
        });
    }

    pub fn set_animation_last(self, state: &mut AnimationState, animation_last: f32) {
        self.with_entry_mut(state, |entry| {
            entry.animation_last = animation_last;
            entry.next_animation_last = animation_last;
        });
    }
}

/// What a listener sees of the entry an event belongs to, captured when it is dispatched.
#[derive(Clone, Debug)]
pub struct TrackEntrySnapshot {
    pub handle: TrackEntryHandle,
    pub track_index: usize,
    pub animation: Arc<Animation>,
    pub track_time: f32,
    pub looped: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnimationStateEvent {
    Start,
    Interrupt,
    End,
    Dispose,
    Complete { loop_count: u32 },
    Event(Event),
}

impl AnimationStateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AnimationStateEvent::Start => "start",
            AnimationStateEvent::Interrupt => "interrupt",
            AnimationStateEvent::End => "end",
            AnimationStateEvent::Dispose => "dispose",
            AnimationStateEvent::Complete { .. } => "complete",
            AnimationStateEvent::Event(_) => "event",
        }
    }
}

/// Receives lifecycle and keyed events. Listeners may call back into the state; events those
/// calls queue are delivered after the current one.
pub trait AnimationStateListener {
    fn on_event(
        &mut self,
        state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    ) -> Result<(), ListenerError>;
}

impl<F> AnimationStateListener for F
where
    F: FnMut(
        &mut AnimationState,
        &TrackEntrySnapshot,
        &AnimationStateEvent,
    ) -> Result<(), ListenerError>,
{
    fn on_event(
        &mut self,
        state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    ) -> Result<(), ListenerError> {
        self(state, entry, event)
    }
}

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(u64);

struct ListenerSlot {
    id: ListenerId,
    listener: Option<Box<dyn AnimationStateListener>>,
}

#[derive(Clone, Debug)]
struct QueuedEvent {
    entry: TrackEntryHandle,
    event: AnimationStateEvent,
}

/// Plays, queues and crossfades animations on tracks and poses a [`Skeleton`] with them.
pub struct AnimationState {
    data: AnimationStateData,
    empty_animation: Arc<Animation>,
    entries: SlotMap<TrackEntryHandle, TrackEntry>,
    tracks: BTreeMap<usize, TrackEntryHandle>,
    queue: VecDeque<QueuedEvent>,
    drain_disabled: bool,
    listeners: Vec<ListenerSlot>,
    next_listener_id: u64,
    listener_errors: Vec<Error>,
    fired_events: Vec<Event>,
    property_ids: HashSet<u64>,
    animations_changed: bool,
    unkeyed_state: i32,
    time_scale: f32,
}

impl AnimationState {
    pub fn new(data: AnimationStateData) -> Self {
        Self {
            data,
            empty_animation: Arc::new(Animation::empty()),
            entries: SlotMap::with_key(),
            tracks: BTreeMap::new(),
            queue: VecDeque::new(),
            drain_disabled: false,
            listeners: Vec::new(),
            next_listener_id: 0,
            listener_errors: Vec::new(),
            fired_events: Vec::new(),
            property_ids: HashSet::new(),
            animations_changed: false,
            unkeyed_state: 0,
            time_scale: 1.0,
        }
    }

    pub fn data(&self) -> &AnimationStateData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut AnimationStateData {
        &mut self.data
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.time_scale = time_scale;
    }

    pub fn current(&self, track_index: usize) -> Option<TrackEntryHandle> {
        self.tracks.get(&track_index).copied()
    }

    pub fn entry(&self, handle: TrackEntryHandle) -> Option<&TrackEntry> {
        self.entries.get(handle)
    }

    pub fn tracks(&self) -> impl Iterator<Item = (usize, TrackEntryHandle)> + '_ {
        self.tracks.iter().map(|(&index, &handle)| (index, handle))
    }

    pub fn add_listener<L: AnimationStateListener + 'static>(&mut self, listener: L) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push(ListenerSlot {
            id,
            listener: Some(Box::new(listener)),
        });
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let len = self.listeners.len();
        self.listeners.retain(|slot| slot.id != id);
        self.listeners.len() != len
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn clear_listener_notifications(&mut self) {
        for queued in std::mem::take(&mut self.queue) {
            if queued.event == AnimationStateEvent::Dispose {
                self.entries.remove(queued.entry);
            }
        }
    }

    pub fn take_listener_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.listener_errors)
    }

    pub fn set_animation(
        &mut self,
        track_index: usize,
        animation_name: &str,
        looped: bool,
    ) -> Result<TrackEntryHandle, Error> {
        let animation = self.find_animation(animation_name)?;
        self.set_animation_with(track_index, Some(animation), looped)
    }

    /// Replaces the track's chain, mixing from the current entry. `None` plays the empty
    /// animation. An entry that was never applied is replaced rather than mixed from.
    pub fn set_animation_with(
        &mut self,
        track_index: usize,
        animation: Option<Arc<Animation>>,
        looped: bool,
    ) -> Result<TrackEntryHandle, Error> {
        let animation = match animation {
            Some(animation) => {
                animation.validate_against(&self.data.skeleton_data)?;
                animation
            }
            None => self.empty_animation.clone(),
        };

        let mut interrupt = true;
        let mut current = self.current(track_index);
        if let Some(handle) = current {
            let (never_applied, mixing_from) = match self.entries.get(handle) {
                Some(entry) => (entry.next_track_last == -1.0, entry.mixing_from),
                None => (false, None),
            };
            if never_applied {
                match mixing_from {
                    Some(from) => self.tracks.insert(track_index, from),
                    None => self.tracks.remove(&track_index),
                };
                self.queue_event(handle, AnimationStateEvent::Interrupt);
                self.queue_end(handle);
                self.clear_next(handle);
                current = mixing_from;
                interrupt = false;
            } else {
                self.clear_next(handle);
            }
        }

        let entry = self.new_entry(track_index, animation, looped, current);
        let handle = self.entries.insert(entry);
        self.set_current(track_index, handle, interrupt);
        self.drain();
        Ok(handle)
    }

    pub fn add_animation(
        &mut self,
        track_index: usize,
        animation_name: &str,
        looped: bool,
        delay: f32,
    ) -> Result<TrackEntryHandle, Error> {
        let animation = self.find_animation(animation_name)?;
        self.add_animation_with(track_index, animation, looped, delay)
    }

    /// Queues an animation after the last entry of the track, or plays it now on an empty track.
    pub fn add_animation_with(
        &mut self,
        track_index: usize,
        animation: Arc<Animation>,
        looped: bool,
        delay: f32,
    ) -> Result<TrackEntryHandle, Error> {
        animation.validate_against(&self.data.skeleton_data)?;
        check_finite(delay, "delay")?;
        Ok(self.add_entry(track_index, animation, looped, delay))
    }

    /// Fades the track out to the setup pose (or lower tracks) over `mix_duration`.
    pub fn set_empty_animation(
        &mut self,
        track_index: usize,
        mix_duration: f32,
    ) -> Result<TrackEntryHandle, Error> {
        check_duration(mix_duration, "mix duration")?;
        let handle = self.set_animation_with(track_index, None, false)?;
        if let Some(entry) = self.entries.get_mut(handle) {
            entry.mix_duration = mix_duration;
            entry.track_end = mix_duration;
        }
        Ok(handle)
    }

    pub fn add_empty_animation(
        &mut self,
        track_index: usize,
        mix_duration: f32,
        delay: f32,
    ) -> Result<TrackEntryHandle, Error> {
        check_duration(mix_duration, "mix duration")?;
        check_finite(delay, "delay")?;
        let empty = self.empty_animation.clone();
        let handle = self.add_entry(track_index, empty, false, delay);
        if let Some(entry) = self.entries.get_mut(handle) {
            if delay <= 0.0 {
                entry.delay = (entry.delay + entry.mix_duration - mix_duration).max(0.0);
            }
            entry.mix_duration = mix_duration;
            entry.track_end = mix_duration;
        }
        Ok(handle)
    }

    pub fn set_empty_animations(&mut self, mix_duration: f32) -> Result<(), Error> {
        check_duration(mix_duration, "mix duration")?;
        let old_drain_disabled = self.drain_disabled;
        self.drain_disabled = true;
        let track_indices = self.tracks.keys().copied().collect::<Vec<_>>();
        let mut result = Ok(());
        for track_index in track_indices {
            if let Err(err) = self.set_empty_animation(track_index, mix_duration) {
                result = Err(err);
                break;
            }
        }
        self.drain_disabled = old_drain_disabled;
        self.drain();
        result
    }

    /// Stops the track at once, leaving the skeleton in its current pose.
    pub fn clear_track(&mut self, track_index: usize) {
        let Some(current) = self.current(track_index) else {
            return;
        };
        debug!("clearing track {track_index}");

        self.queue_end(current);
        self.clear_next(current);

        let mut entry = current;
        while let Some(from) = self.entries.get(entry).and_then(|e| e.mixing_from) {
            self.queue_end(from);
            if let Some(e) = self.entries.get_mut(entry) {
                e.mixing_from = None;
                e.mixing_to = None;
            }
            entry = from;
        }

        self.tracks.remove(&track_index);
        self.drain();
    }

    pub fn clear_tracks(&mut self) {
        let old_drain_disabled = self.drain_disabled;
        self.drain_disabled = true;
        let track_indices = self.tracks.keys().copied().collect::<Vec<_>>();
        for track_index in track_indices {
            self.clear_track(track_index);
        }
        self.tracks.clear();
        self.drain_disabled = old_drain_disabled;
        self.drain();
    }

    pub fn update(&mut self, delta: f32) {
        let delta = delta * self.time_scale;
        let tracks = self.tracks().collect::<Vec<_>>();
        for (track_index, handle) in tracks {
            let Some(current) = self.entries.get_mut(handle) else {
                continue;
            };

            current.animation_last = current.next_animation_last;
            current.track_last = current.next_track_last;

            let mut current_delta = delta * current.time_scale;
            if current.delay > 0.0 {
                current.delay -= current_delta;
                if current.delay > 0.0 {
                    continue;
                }
                current_delta = -current.delay;
                current.delay = 0.0;
            }

            let track_last = current.track_last;
            let track_end = current.track_end;
            let time_scale = current.time_scale;
            let mixing_from = current.mixing_from;

            if let Some(next) = current.next {
                let Some(next_entry) = self.entries.get_mut(next) else {
                    continue;
                };
                // Start the next entry once its delay has passed, keeping the leftover time.
                let next_time = track_last - next_entry.delay;
                if next_time >= 0.0 {
                    next_entry.delay = 0.0;
                    next_entry.track_time += if time_scale == 0.0 {
                        0.0
                    } else {
                        (next_time / time_scale + delta) * next_entry.time_scale
                    };
                    if let Some(current) = self.entries.get_mut(handle) {
                        current.track_time += current_delta;
                        current.next = None;
                    }
                    self.set_current(track_index, next, true);

                    let mut entry = next;
                    while let Some(e) = self.entries.get_mut(entry) {
                        let Some(from) = e.mixing_from else {
                            break;
                        };
                        e.mix_time += delta;
                        entry = from;
                    }
                    continue;
                }
            } else if track_last >= track_end && mixing_from.is_none() {
                debug!("track {track_index} reached its end");
                self.tracks.remove(&track_index);
                self.queue_end(handle);
                self.clear_next(handle);
                continue;
            }

            if mixing_from.is_some() && self.update_mixing_from(handle, delta) {
                // Every entry in the chain has finished mixing out.
                let mut from = self.entries.get_mut(handle).and_then(|e| e.mixing_from.take());
                if let Some(first) = from.and_then(|f| self.entries.get_mut(f)) {
                    first.mixing_to = None;
                }
                while let Some(entry) = from {
                    trace!("track {track_index} finished mixing out");
                    self.queue_end(entry);
                    from = self.entries.get(entry).and_then(|e| e.mixing_from);
                }
            }

            if let Some(current) = self.entries.get_mut(handle) {
                current.track_time += current_delta;
            }
        }

        self.drain();
    }

    fn update_mixing_from(&mut self, to: TrackEntryHandle, delta: f32) -> bool {
        let Some(from) = self.entries.get(to).and_then(|e| e.mixing_from) else {
            return true;
        };

        let finished = self.update_mixing_from(from, delta);

        let Some(from_entry) = self.entries.get_mut(from) else {
            return finished;
        };
        from_entry.animation_last = from_entry.next_animation_last;
        from_entry.track_last = from_entry.next_track_last;
        let from_total_alpha = from_entry.total_alpha;
        let from_interrupt_alpha = from_entry.interrupt_alpha;
        let from_mixing_from = from_entry.mixing_from;
        let from_time_scale = from_entry.time_scale;

        let Some(to_entry) = self.entries.get_mut(to) else {
            return finished;
        };

        // `to` has been applied at least once and its mix is done.
        if to_entry.next_track_last != -1.0 && to_entry.mix_time >= to_entry.mix_duration {
            // Keep a from entry that still contributed last frame, unless the cut was instant.
            if from_total_alpha == 0.0 || to_entry.mix_duration <= 0.0 {
                to_entry.mixing_from = from_mixing_from;
                to_entry.interrupt_alpha = from_interrupt_alpha;
                if let Some(older) = from_mixing_from.and_then(|h| self.entries.get_mut(h)) {
                    older.mixing_to = Some(to);
                }
                trace!("mix out complete");
                self.queue_end(from);
            }
            return finished;
        }

        to_entry.mix_time += delta;
        if let Some(from_entry) = self.entries.get_mut(from) {
            from_entry.track_time += delta * from_time_scale;
        }
        false
    }

    /// Poses `skeleton` with every track, lowest index first. Returns whether any entry was
    /// applied.
    pub fn apply(&mut self, skeleton: &mut Skeleton) -> Result<bool, Error> {
        self.check_targets(skeleton)?;
        if self.animations_changed {
            self.animations_changed();
        }

        let mut applied = false;
        let tracks = self.tracks().collect::<Vec<_>>();
        for (track_index, handle) in tracks {
            let Some(current) = self.entries.get(handle) else {
                continue;
            };
            if current.delay > 0.0 {
                continue;
            }
            applied = true;

            let blend = if track_index == 0 {
                MixBlend::First
            } else {
                current.mix_blend
            };

            let mut alpha = current.alpha;
            if current.mixing_from.is_some() {
                alpha *= self.apply_mixing_from(handle, skeleton, blend);
            } else if current.track_time >= current.track_end
                && current.next.is_none()
                && (current.looped
                    || current.track_end < current.animation_end - current.animation_start)
            {
                alpha = 0.0;
            }

            self.apply_current(handle, track_index, skeleton, blend, alpha);
        }

        // Slots whose attachment only a mixing-out entry touched go back to setup.
        let setup_state = self.unkeyed_state + ATTACHMENT_STATE_SETUP;
        let data = skeleton.data.clone();
        for (index, slot_data) in data.slots.iter().enumerate() {
            if skeleton.slots.get(index).is_some_and(|s| s.attachment_state == setup_state) {
                skeleton.attach(index, slot_data.attachment.as_deref());
            }
        }
        self.unkeyed_state = self.unkeyed_state.wrapping_add(2);

        self.drain();
        Ok(applied)
    }

    fn check_targets(&self, skeleton: &Skeleton) -> Result<(), Error> {
        let counts = skeleton.target_counts();
        for &handle in self.tracks.values() {
            let mut cursor = Some(handle);
            while let Some(entry) = cursor.and_then(|h| self.entries.get(h)) {
                if let Err(err) = entry.animation.check_counts(counts) {
                    warn!("cannot apply track {}: {err}", entry.track_index);
                    return Err(err);
                }
                cursor = entry.mixing_from;
            }
        }
        Ok(())
    }

    fn apply_current(
        &mut self,
        handle: TrackEntryHandle,
        track_index: usize,
        skeleton: &mut Skeleton,
        blend: MixBlend,
        alpha: f32,
    ) {
        let mut fired = std::mem::take(&mut self.fired_events);
        fired.clear();
        let unkeyed_state = self.unkeyed_state;
        let Some(current) = self.entries.get_mut(handle) else {
            self.fired_events = fired;
            return;
        };

        let animation = current.animation.clone();
        let animation_last = current.animation_last;
        let animation_time = current.animation_time();
        let reverse = current.reverse;
        let apply_time = if reverse {
            animation.duration() - animation_time
        } else {
            animation_time
        };
        let keying = Some(AttachmentKeying {
            attachments: true,
            unkeyed_state,
        });
        let timelines = animation.timelines();

        if (track_index == 0 && alpha == 1.0) || blend == MixBlend::Add {
            for timeline in timelines {
                if let Timeline::Attachment(t) = timeline {
                    apply_attachment(t, skeleton, apply_time, blend, keying);
                } else {
                    let events = if reverse { None } else { Some(&mut fired) };
                    timeline.apply(
                        skeleton,
                        animation_last,
                        apply_time,
                        events,
                        alpha,
                        blend,
                        MixDirection::In,
                    );
                }
            }
        } else {
            let shortest_rotation = current.shortest_rotation;
            let first_frame =
                !shortest_rotation && current.timelines_rotation.len() != timelines.len() * 2;
            if first_frame {
                current.timelines_rotation.clear();
                current.timelines_rotation.resize(timelines.len() * 2, 0.0);
            }

            for (i, timeline) in timelines.iter().enumerate() {
                let timeline_blend = match current.timeline_mode.get(i) {
                    Some(TimelineMode::Subsequent) => blend,
                    _ => MixBlend::Setup,
                };
                match timeline {
                    Timeline::Rotate(t) if !shortest_rotation => apply_rotate_mixed(
                        t,
                        skeleton,
                        apply_time,
                        alpha,
                        timeline_blend,
                        &mut current.timelines_rotation[i * 2..i * 2 + 2],
                        first_frame,
                    ),
                    Timeline::Attachment(t) => {
                        apply_attachment(t, skeleton, apply_time, blend, keying)
                    }
                    _ => {
                        let events = if reverse { None } else { Some(&mut fired) };
                        timeline.apply(
                            skeleton,
                            animation_last,
                            apply_time,
                            events,
                            alpha,
                            timeline_blend,
                            MixDirection::In,
                        );
                    }
                }
            }
        }

        self.queue_events(handle, animation_time, &fired);
        if let Some(current) = self.entries.get_mut(handle) {
            current.next_animation_last = animation_time;
            current.next_track_last = current.track_time;
        }
        fired.clear();
        self.fired_events = fired;
    }

    fn apply_mixing_from(
        &mut self,
        to: TrackEntryHandle,
        skeleton: &mut Skeleton,
        blend: MixBlend,
    ) -> f32 {
        let Some(to_entry) = self.entries.get(to) else {
            return 1.0;
        };
        let Some(from) = to_entry.mixing_from else {
            return 1.0;
        };
        let (to_mix_time, to_mix_duration, to_interrupt_alpha) = (
            to_entry.mix_time,
            to_entry.mix_duration,
            to_entry.interrupt_alpha,
        );

        if self.entries.get(from).is_some_and(|e| e.mixing_from.is_some()) {
            self.apply_mixing_from(from, skeleton, blend);
        }

        let Some(from_entry) = self.entries.get_mut(from) else {
            return 1.0;
        };

        let mut blend = blend;
        let mix = if to_mix_duration <= 0.0 {
            // Single frame mix to undo the from entry's changes.
            if blend == MixBlend::First {
                blend = MixBlend::Setup;
            }
            1.0
        } else {
            if blend != MixBlend::First {
                blend = from_entry.mix_blend;
            }
            (to_mix_time / to_mix_duration).min(1.0)
        };

        let attachments = mix < from_entry.attachment_threshold;
        let draw_order = mix < from_entry.draw_order_threshold;
        let alpha_hold = from_entry.alpha * to_interrupt_alpha;
        let alpha_mix = alpha_hold * (1.0 - mix);
        let animation = from_entry.animation.clone();
        let animation_last = from_entry.animation_last;
        let animation_time = from_entry.animation_time();
        let reverse = from_entry.reverse;
        let apply_time = if reverse {
            animation.duration() - animation_time
        } else {
            animation_time
        };
        let collect_events = !reverse && mix < from_entry.event_threshold;
        let shortest_rotation = from_entry.shortest_rotation;
        let timelines = animation.timelines();

        let mut rotation = std::mem::take(&mut from_entry.timelines_rotation);
        let timeline_mode = std::mem::take(&mut from_entry.timeline_mode);
        let mut fired = std::mem::take(&mut self.fired_events);
        fired.clear();
        let mut total_alpha = 0.0;

        if blend == MixBlend::Add {
            for timeline in timelines {
                let events = if collect_events { Some(&mut fired) } else { None };
                timeline.apply(
                    skeleton,
                    animation_last,
                    apply_time,
                    events,
                    alpha_mix,
                    blend,
                    MixDirection::Out,
                );
            }
        } else {
            let first_frame = !shortest_rotation && rotation.len() != timelines.len() * 2;
            if first_frame {
                rotation.clear();
                rotation.resize(timelines.len() * 2, 0.0);
            }

            for (i, timeline) in timelines.iter().enumerate() {
                let mode = timeline_mode.get(i).copied().unwrap_or(TimelineMode::First);
                let (timeline_blend, alpha) = match mode {
                    TimelineMode::Subsequent => {
                        if !draw_order && matches!(timeline, Timeline::DrawOrder(_)) {
                            continue;
                        }
                        (blend, alpha_mix)
                    }
                    TimelineMode::First => (MixBlend::Setup, alpha_mix),
                    TimelineMode::HoldSubsequent => (blend, alpha_hold),
                    TimelineMode::HoldFirst => (MixBlend::Setup, alpha_hold),
                    TimelineMode::HoldMix(hold) => {
                        let fade = self
                            .entries
                            .get(hold)
                            .map(|h| (1.0 - h.mix_time / h.mix_duration).max(0.0))
                            .unwrap_or(1.0);
                        (MixBlend::Setup, alpha_hold * fade)
                    }
                };
                total_alpha += alpha;

                match timeline {
                    Timeline::Rotate(t) if !shortest_rotation => apply_rotate_mixed(
                        t,
                        skeleton,
                        apply_time,
                        alpha,
                        timeline_blend,
                        &mut rotation[i * 2..i * 2 + 2],
                        first_frame,
                    ),
                    Timeline::Attachment(t) => apply_attachment(
                        t,
                        skeleton,
                        apply_time,
                        timeline_blend,
                        Some(AttachmentKeying {
                            attachments,
                            unkeyed_state: self.unkeyed_state,
                        }),
                    ),
                    _ => {
                        let direction = if draw_order
                            && matches!(timeline, Timeline::DrawOrder(_))
                            && timeline_blend == MixBlend::Setup
                        {
                            MixDirection::In
                        } else {
                            MixDirection::Out
                        };
                        let events = if collect_events { Some(&mut fired) } else { None };
                        timeline.apply(
                            skeleton,
                            animation_last,
                            apply_time,
                            events,
                            alpha,
                            timeline_blend,
                            direction,
                        );
                    }
                }
            }
        }

        if let Some(from_entry) = self.entries.get_mut(from) {
            from_entry.timelines_rotation = rotation;
            from_entry.timeline_mode = timeline_mode;
            if blend != MixBlend::Add {
                from_entry.total_alpha = total_alpha;
            }
        }
        if to_mix_duration > 0.0 {
            self.queue_events(from, animation_time, &fired);
        }
        fired.clear();
        self.fired_events = fired;
        if let Some(from_entry) = self.entries.get_mut(from) {
            from_entry.next_animation_last = animation_time;
            from_entry.next_track_last = from_entry.track_time;
        }

        mix
    }

    fn queue_events(&mut self, handle: TrackEntryHandle, animation_time: f32, fired: &[Event]) {
        let Some(entry) = self.entries.get(handle) else {
            return;
        };
        let animation_start = entry.animation_start;
        let animation_end = entry.animation_end;
        let duration = animation_end - animation_start;
        let track_last_wrapped = entry.track_last % duration;

        let complete = if entry.looped {
            if duration == 0.0 {
                true
            } else {
                let cycles = (entry.track_time / duration).floor();
                cycles > 0.0 && cycles > (entry.track_last / duration).floor()
            }
        } else {
            animation_time >= animation_end && entry.animation_last < animation_end
        };
        let loop_count = entry.loop_count().max(1);

        // Events keyed before the loop point fire before `Complete`.
        let split = fired
            .iter()
            .position(|e| e.time < track_last_wrapped)
            .unwrap_or(fired.len());
        for event in &fired[..split] {
            if event.time <= animation_end {
                self.queue_event(handle, AnimationStateEvent::Event(event.clone()));
            }
        }
        if complete {
            self.queue_event(handle, AnimationStateEvent::Complete { loop_count });
        }
        for event in &fired[split..] {
            if event.time >= animation_start {
                self.queue_event(handle, AnimationStateEvent::Event(event.clone()));
            }
        }
    }

    fn animations_changed(&mut self) {
        self.animations_changed = false;
        self.property_ids.clear();

        let heads = self.tracks.values().copied().collect::<Vec<_>>();
        for head in heads {
            let mut entry = head;
            while let Some(from) = self.entries.get(entry).and_then(|e| e.mixing_from) {
                entry = from;
            }
            let mut cursor = Some(entry);
            while let Some(handle) = cursor {
                let Some(e) = self.entries.get(handle) else {
                    break;
                };
                let mixing_to = e.mixing_to;
                if mixing_to.is_none() || e.mix_blend != MixBlend::Add {
                    self.compute_hold(handle);
                }
                cursor = mixing_to;
            }
        }
    }

    fn compute_hold(&mut self, handle: TrackEntryHandle) {
        let Some(entry) = self.entries.get(handle) else {
            return;
        };
        let animation = entry.animation.clone();
        let to = entry.mixing_to.and_then(|to| self.entries.get(to).map(|e| (to, e)));
        let entry_mix_duration = entry.mix_duration;
        let timelines = animation.timelines();
        let mut modes = Vec::with_capacity(timelines.len());

        if to.is_some_and(|(_, to)| to.hold_previous) {
            for timeline in timelines {
                let added = add_property_ids(&mut self.property_ids, &timeline.property_ids());
                modes.push(if added {
                    TimelineMode::HoldFirst
                } else {
                    TimelineMode::HoldSubsequent
                });
            }
        } else {
            'timelines: for timeline in timelines {
                let ids = timeline.property_ids();
                if !add_property_ids(&mut self.property_ids, &ids) {
                    modes.push(TimelineMode::Subsequent);
                    continue;
                }
                let discrete = matches!(
                    timeline,
                    Timeline::Attachment(_) | Timeline::DrawOrder(_) | Timeline::Event(_)
                );
                let Some((_, to_entry)) =
                    to.filter(|(_, to)| !discrete && to.animation.has_timeline(&ids))
                else {
                    modes.push(TimelineMode::First);
                    continue;
                };

                let mut next = to_entry.mixing_to;
                while let Some(next_handle) = next {
                    let Some(next_entry) = self.entries.get(next_handle) else {
                        break;
                    };
                    if next_entry.animation.has_timeline(&ids) {
                        next = next_entry.mixing_to;
                        continue;
                    }
                    if entry_mix_duration > 0.0 {
                        modes.push(TimelineMode::HoldMix(next_handle));
                        continue 'timelines;
                    }
                    break;
                }
                modes.push(TimelineMode::HoldFirst);
            }
        }

        if let Some(entry) = self.entries.get_mut(handle) {
            entry.timeline_mode = modes;
        }
    }

    fn find_animation(&self, name: &str) -> Result<Arc<Animation>, Error> {
        self.data
            .skeleton_data
            .animation(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAnimation {
                name: name.to_string(),
            })
    }

    fn new_entry(
        &self,
        track_index: usize,
        animation: Arc<Animation>,
        looped: bool,
        last: Option<TrackEntryHandle>,
    ) -> TrackEntry {
        let mix_duration = last
            .and_then(|h| self.entries.get(h))
            .map(|last| self.data.mix(last.animation.name(), animation.name()))
            .unwrap_or(0.0);
        let duration = animation.duration();
        TrackEntry {
            track_index,
            looped,
            reverse: false,
            shortest_rotation: false,
            hold_previous: false,
            delay: 0.0,
            track_time: 0.0,
            track_end: if looped { f32::INFINITY } else { duration },
            time_scale: 1.0,
            alpha: 1.0,
            mix_time: 0.0,
            mix_duration,
            mix_blend: MixBlend::Replace,
            animation_start: 0.0,
            animation_end: duration,
            animation_last: -1.0,
            next_animation_last: -1.0,
            track_last: -1.0,
            next_track_last: -1.0,
            event_threshold: 0.0,
            attachment_threshold: 0.0,
            draw_order_threshold: 0.0,
            interrupt_alpha: 1.0,
            total_alpha: 0.0,
            next: None,
            previous: None,
            mixing_from: None,
            mixing_to: None,
            listener: None,
            timeline_mode: Vec::new(),
            timelines_rotation: Vec::new(),
            animation,
        }
    }

    fn add_entry(
        &mut self,
        track_index: usize,
        animation: Arc<Animation>,
        looped: bool,
        delay: f32,
    ) -> TrackEntryHandle {
        let mut last = self.current(track_index);
        while let Some(next) = last.and_then(|h| self.entries.get(h)).and_then(|e| e.next) {
            last = Some(next);
        }

        let entry = self.new_entry(track_index, animation, looped, last);
        let handle = self.entries.insert(entry);
        let mut delay = delay;

        match last {
            None => {
                self.set_current(track_index, handle, true);
                self.drain();
                delay = delay.max(0.0);
            }
            Some(last) => {
                let track_complete = match self.entries.get_mut(last) {
                    Some(last_entry) => {
                        last_entry.next = Some(handle);
                        last_entry.track_complete()
                    }
                    None => 0.0,
                };
                if let Some(entry) = self.entries.get_mut(handle) {
                    entry.previous = Some(last);
                    if delay <= 0.0 {
                        delay += track_complete - entry.mix_duration;
                    }
                }
                debug!(
                    "queued '{}' on track {track_index} after {delay}s",
                    self.entries
                        .get(handle)
                        .map(|e| e.animation.name())
                        .unwrap_or_default()
                );
            }
        }

        if let Some(entry) = self.entries.get_mut(handle) {
            entry.delay = delay;
        }
        handle
    }

    fn set_current(&mut self, track_index: usize, current: TrackEntryHandle, interrupt: bool) {
        let from = self.tracks.insert(track_index, current);
        let from_state = from.and_then(|h| self.entries.get_mut(h)).map(|from_entry| {
            from_entry.timelines_rotation.clear();
            (
                from_entry.mixing_from.is_some(),
                from_entry.mix_time,
                from_entry.mix_duration,
            )
        });

        if let Some(entry) = self.entries.get_mut(current) {
            entry.previous = None;
            debug!(
                "track {track_index} started '{}' (mix {}s)",
                entry.animation.name(),
                entry.mix_duration
            );
            if let (Some(from), Some((from_mixing, from_mix_time, from_mix_duration))) =
                (from, from_state)
            {
                entry.mixing_from = Some(from);
                entry.mix_time = 0.0;
                // Carry over how far an interrupted mix had got.
                if from_mixing && from_mix_duration > 0.0 {
                    entry.interrupt_alpha *= (from_mix_time / from_mix_duration).min(1.0);
                }
            }
        }

        if let Some(from) = from {
            if let Some(from_entry) = self.entries.get_mut(from) {
                from_entry.mixing_to = Some(current);
            }
            if interrupt {
                self.queue_event(from, AnimationStateEvent::Interrupt);
            }
        }

        self.queue_event(current, AnimationStateEvent::Start);
        self.animations_changed = true;
    }

    fn clear_next(&mut self, handle: TrackEntryHandle) {
        let mut next = self.entries.get_mut(handle).and_then(|e| e.next.take());
        while let Some(entry) = next {
            self.queue_event(entry, AnimationStateEvent::Dispose);
            next = self.entries.get(entry).and_then(|e| e.next);
        }
    }

    fn queue_event(&mut self, entry: TrackEntryHandle, event: AnimationStateEvent) {
        self.queue.push_back(QueuedEvent { entry, event });
    }

    fn queue_end(&mut self, entry: TrackEntryHandle) {
        self.queue_event(entry, AnimationStateEvent::End);
        self.queue_event(entry, AnimationStateEvent::Dispose);
        self.animations_changed = true;
    }

    fn drain(&mut self) {
        if self.drain_disabled {
            return;
        }
        self.drain_disabled = true;

        while let Some(QueuedEvent { entry, event }) = self.queue.pop_front() {
            let Some(snapshot) = self.snapshot(entry) else {
                continue;
            };

            let mut entry_listener = self.entries.get_mut(entry).and_then(|e| e.listener.take());
            if let Some(listener) = entry_listener.as_mut() {
                let result = listener.on_event(self, &snapshot, &event);
                self.record_listener_result(result, &snapshot, &event);
            }

            let ids = self.listeners.iter().map(|slot| slot.id).collect::<Vec<_>>();
            for id in ids {
                let Some(mut listener) = self
                    .listeners
                    .iter_mut()
                    .find(|slot| slot.id == id)
                    .and_then(|slot| slot.listener.take())
                else {
                    continue;
                };
                let result = listener.on_event(self, &snapshot, &event);
                if let Some(slot) = self.listeners.iter_mut().find(|slot| slot.id == id) {
                    slot.listener = Some(listener);
                }
                self.record_listener_result(result, &snapshot, &event);
            }

            if event == AnimationStateEvent::Dispose {
                self.entries.remove(entry);
            } else if let Some(listener) = entry_listener {
                if let Some(e) = self.entries.get_mut(entry) {
                    e.listener.get_or_insert(listener);
                }
            }
        }

        self.drain_disabled = false;
    }

    fn snapshot(&self, handle: TrackEntryHandle) -> Option<TrackEntrySnapshot> {
        let entry = self.entries.get(handle)?;
        Some(TrackEntrySnapshot {
            handle,
            track_index: entry.track_index,
            animation: entry.animation.clone(),
            track_time: entry.track_time,
            looped: entry.looped,
        })
    }

    fn record_listener_result(
        &mut self,
        result: Result<(), ListenerError>,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    ) {
        if let Err(source) = result {
            let err = Error::Listener {
                track_index: entry.track_index,
                animation: entry.animation.name().to_string(),
                event: event.name(),
                source,
            };
            warn!("{err}");
            self.listener_errors.push(err);
        }
    }
}

fn add_property_ids(set: &mut HashSet<u64>, ids: &[u64]) -> bool {
    let mut added = false;
    for &id in ids {
        added |= set.insert(id);
    }
    added
}

fn check_finite(value: f32, what: &str) -> Result<(), Error> {
    if !value.is_finite() {
        return Err(Error::InvalidValue {
            message: format!("{what} must be finite, got {value}"),
        });
    }
    Ok(())
}
