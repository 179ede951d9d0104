use serde::{Deserialize, Serialize};

use crate::action::Action;

/// How screenshots are presented to the agent. Fixed for the life of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationMode {
    /// `[2, side, side, 1]` grayscale pixels.
    #[default]
    Raw,
    /// `[2, side * side]` grayscale pixels.
    Flattened,
    /// `[2, latent_dims]` encoder means.
    Latent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpaceType {
    /// Discrete space with n options
    Discrete(usize),
    /// Continuous box
    Continuous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpaceInfo {
    pub shape: Vec<usize>,
    pub dtype: SpaceType,
    pub low: f32,
    pub high: f32,
}

impl SpaceInfo {
    pub fn discrete(n: usize) -> Self {
        Self {
            shape: vec![1],
            dtype: SpaceType::Discrete(n),
            low: 0.0,
            high: n.saturating_sub(1) as f32,
        }
    }

    pub fn continuous(shape: Vec<usize>, low: f32, high: f32) -> Self {
        Self {
            shape,
            dtype: SpaceType::Continuous,
            low,
            high,
        }
    }

    pub fn actions() -> Self {
        Self::discrete(Action::COUNT)
    }

    pub fn observation(mode: ObservationMode, image_side: usize, latent_dims: usize) -> Self {
        match mode {
            ObservationMode::Raw => {
                Self::continuous(vec![2, image_side, image_side, 1], 0.0, 255.0)
            }
            ObservationMode::Flattened => {
                Self::continuous(vec![2, image_side * image_side], 0.0, 255.0)
            }
            ObservationMode::Latent => {
                Self::continuous(vec![2, latent_dims], f32::NEG_INFINITY, f32::INFINITY)
            }
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}
