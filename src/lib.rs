pub mod action;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod encoder;
pub mod env;
pub mod error;
pub mod listener;
pub mod logging;
pub mod reconciler;
pub mod reward;
pub mod testing;
pub mod transport;

pub use action::Action;
pub use env::{BlockingPolyominoEnv, Environment, Observation, PolyominoEnv, StepInfo, StepResult};
pub use error::{EnvError, EnvErrorKind, EnvResult};
