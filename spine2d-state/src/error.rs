use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown animation: {name}")]
    UnknownAnimation { name: String },

    #[error("unknown skin: {name}")]
    UnknownSkin { name: String },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[error("unknown parent bone {parent} for bone '{bone}' (parents must precede children)")]
    InvalidBoneParent { bone: String, parent: usize },

    #[error("unknown bone {bone} referenced by slot '{slot}'")]
    InvalidSlotBone { slot: String, bone: usize },

    #[error("timeline {timeline} of animation '{animation}' has no keyframes")]
    EmptyTimeline { animation: String, timeline: usize },

    #[error(
        "timeline {timeline} of animation '{animation}' has keyframe {frame} out of order (times must increase)"
    )]
    UnorderedKeyframes {
        animation: String,
        timeline: usize,
        frame: usize,
    },

    #[error("animation '{animation}' targets {kind} {index}, but the skeleton has {len}")]
    TimelineTargetOutOfRange {
        animation: String,
        kind: TargetKind,
        index: usize,
        len: usize,
    },

    #[error("listener failed on {event} for track {track_index} ('{animation}'): {source}")]
    Listener {
        track_index: usize,
        animation: String,
        event: &'static str,
        #[source]
        source: ListenerError,
    },

    #[cfg(feature = "json")]
    #[error("failed to parse mix configuration: {message}")]
    Config { message: String },
}

/// What a timeline writes to, used to report data mismatches.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TargetKind {
    Bone,
    Slot,
    IkConstraint,
    TransformConstraint,
    PathConstraint,
    DrawOrder,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetKind::Bone => "bone",
            TargetKind::Slot => "slot",
            TargetKind::IkConstraint => "IK constraint",
            TargetKind::TransformConstraint => "transform constraint",
            TargetKind::PathConstraint => "path constraint",
            TargetKind::DrawOrder => "draw order slot",
        };
        f.write_str(name)
    }
}

/// Failure reported by an [`crate::AnimationStateListener`]. Dispatch continues after it is logged.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
