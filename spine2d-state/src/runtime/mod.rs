mod animation;
mod animation_state;
mod skeleton;

pub use animation::*;
pub use animation_state::*;
pub use skeleton::*;

#[cfg(test)]
mod skeleton_tests;


#[cfg(test)]
mod animation_state_tests;



#[cfg(test)]
mod constraint_tests;
