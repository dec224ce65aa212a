//! Core value types shared by agents, environments and the integrator.
//!
//! - [`PhysicalState`] is the ground truth an agent owns; consumers only ever
//!   see an [`Observation`] projected from it.
//! - [`Action`] is the binary force direction, validated against an
//!   [`ActionSpace`].
//! - [`FailureBounds`] hold the per-dimension limits checked after each step;
//!   crossing one yields a [`FailureDescriptor`].
//! - [`StepResult`] is what one agent returns from one step.

mod action;
mod bounds;
mod failure;
mod state;
mod step;

pub use action::{Action, ActionSpace};
pub use bounds::{Bounds, FailureBounds};
pub use failure::FailureDescriptor;
pub use state::{Observation, ObservationSpace, PhysicalState};
pub use step::{ExperimentState, StepInfo, StepResult};
