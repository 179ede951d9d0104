use tokio::runtime::{Builder, Runtime};

use crate::{
    config::Config,
    encoder::LatentEncoder,
    env::{EnvSettings, Environment, Observation, PolyominoEnv, SpaceInfo, StepInfo, StepResult},
    error::EnvError,
    transport::{BroadcastPort, RequestPort},
};

/// Synchronous wrapper for training loops that are not async.
///
/// Owns a current-thread runtime; every call blocks until the underlying
/// façade call completes or fails.
pub struct BlockingPolyominoEnv {
    runtime: Runtime,
    inner: PolyominoEnv,
}

fn build_runtime() -> Result<Runtime, EnvError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| EnvError::transport(format!("failed to start runtime: {err}")))
}

impl BlockingPolyominoEnv {
    pub fn connect(
        config: &Config,
        encoder: Option<Box<dyn LatentEncoder>>,
    ) -> Result<Self, EnvError> {
        let runtime = build_runtime()?;
        let inner = runtime.block_on(PolyominoEnv::connect(config, encoder))?;
        Ok(Self { runtime, inner })
    }

    /// Builds the façade inside the wrapper's runtime so channel timers bind to it.
    pub fn with_channels<F>(
        build: F,
        encoder: Option<Box<dyn LatentEncoder>>,
        settings: EnvSettings,
    ) -> Result<Self, EnvError>
    where
        F: FnOnce() -> (Box<dyn RequestPort>, Box<dyn BroadcastPort>),
    {
        let runtime = build_runtime()?;
        let inner = {
            let _guard = runtime.enter();
            let (request, broadcast) = build();
            PolyominoEnv::new(request, broadcast, encoder, settings)?
        };
        Ok(Self { runtime, inner })
    }

    pub fn inner(&self) -> &PolyominoEnv {
        &self.inner
    }

    pub fn close(&mut self) -> Result<(), EnvError> {
        self.runtime.block_on(self.inner.close())
    }
}

impl Environment for BlockingPolyominoEnv {
    type Observation = Observation;

    type Action = usize;

    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, StepInfo), EnvError> {
        self.runtime.block_on(self.inner.reset(seed))
    }

    fn step(&mut self, action: usize) -> Result<StepResult<Observation>, EnvError> {
        self.runtime.block_on(self.inner.step_index(action))
    }

    fn observation_space(&self) -> SpaceInfo {
        self.inner.observation_space()
    }

    fn action_space(&self) -> SpaceInfo {
        self.inner.action_space()
    }
}
