//! Pure Rust animation state machine and pose evaluation for Spine-style skeletons (unofficial).
//!
//! The crate owns no assets: callers build [`SkeletonData`] and [`Animation`]s however they like
//! (importers, procedural code, tests), then drive an [`AnimationState`] once per tick:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use spine2d_state::*;
//! # fn run(data: Arc<SkeletonData>) -> Result<(), Error> {
//! let mut skeleton = Skeleton::new(data.clone());
//! let mut state = AnimationState::new(AnimationStateData::new(data));
//! state.set_animation(0, "walk", true)?;
//!
//! state.update(1.0 / 60.0);
//! state.apply(&mut skeleton)?;
//! skeleton.update_world_transform();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod config;
mod error;
mod model;
mod runtime;

pub use config::*;
pub use error::*;
pub use model::*;
pub use runtime::*;


#[cfg(test)]
mod config_tests;
