//! Agent-facing environment surface.
//!
//! [`PolyominoEnv`] is the async façade over the simulator; [`BlockingPolyominoEnv`]
//! drives it on its own runtime and implements the synchronous [`Environment`]
//! trait that training loops consume.

mod blocking;
mod facade;
mod spaces;

pub use blocking::BlockingPolyominoEnv;
pub use facade::{EnvSettings, PolyominoEnv};
pub use spaces::{ObservationMode, SpaceInfo, SpaceType};

use crate::{action::Action, codec::Transformations, error::EnvError};

/// Core trait for RL environments
pub trait Environment {
    type Observation;

    type Action;

    /// Reset the environment and return the initial observation
    fn reset(&mut self, seed: Option<u64>) -> Result<(Self::Observation, StepInfo), EnvError>;

    fn step(&mut self, action: Self::Action) -> Result<StepResult<Self::Observation>, EnvError>;

    fn observation_space(&self) -> SpaceInfo;

    fn action_space(&self) -> SpaceInfo;
}

/// Left and right viewport, each flattened row-major.
///
/// Pixel modes carry `side * side` values per viewport, latent mode carries
/// `latent_dims` encoder means.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl Observation {
    /// Both viewports concatenated, matching the leading `2` of the declared shape.
    pub fn to_vec(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.left.len() + self.right.len());
        flat.extend_from_slice(&self.left);
        flat.extend_from_slice(&self.right);
        flat
    }
}

#[derive(Debug, Clone)]
pub struct StepResult<O> {
    pub observation: O,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepInfo {
    pub seqno: u64,
    pub action: Action,
    pub ground_truth_same: bool,
    pub answered: bool,
    pub current_problem: u32,
    pub current_timestep: u64,
    /// Verdict published by the simulator for a selection, if one was observed.
    pub selection_result: Option<bool>,
    pub latent_cosine_similarity: Option<f32>,
    pub transformations: Option<Transformations>,
    pub discarded_stale: usize,
    /// Broadcasts dropped as undecodable while waiting for this state.
    pub discarded_malformed: usize,
}
