use crate::{
    action::Action,
    codec::StatePayload,
    config::Config,
    encoder::{LatentEncoder, LatentEncoderAdapter, cosine_similarity, load_encoder},
    env::{Observation, ObservationMode, SpaceInfo, StepInfo, StepResult},
    error::EnvError,
    reconciler::{ReconciledState, ReconcilerSettings, SequenceReconciler},
    reward::{EpisodeLimits, EpisodeProgress, RewardPolicy},
    transport::{BroadcastPort, RequestPort, ZmqBroadcastChannel, ZmqRequestChannel},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvSettings {
    pub mode: ObservationMode,
    pub image_side: usize,
    pub reward: RewardPolicy,
    pub limits: EpisodeLimits,
    pub reconciler: ReconcilerSettings,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            mode: ObservationMode::default(),
            image_side: 128,
            reward: RewardPolicy::default(),
            limits: EpisodeLimits::default(),
            reconciler: ReconcilerSettings::default(),
        }
    }
}

impl EnvSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.observation.mode,
            image_side: config.observation.image_side,
            reward: config.reward,
            limits: config.episode,
            reconciler: config.connection.reconciler_settings(),
        }
    }
}

/// Environment façade over the remote polyomino simulator.
///
/// Progress and the cached state change only when a whole step succeeds; any
/// error leaves both as they were.
pub struct PolyominoEnv {
    reconciler: SequenceReconciler,
    encoder: Option<LatentEncoderAdapter>,
    settings: EnvSettings,
    progress: EpisodeProgress,
    latest_state: Option<StatePayload>,
    closed: bool,
}

impl PolyominoEnv {
    pub fn new(
        request: Box<dyn RequestPort>,
        broadcast: Box<dyn BroadcastPort>,
        encoder: Option<Box<dyn LatentEncoder>>,
        settings: EnvSettings,
    ) -> Result<Self, EnvError> {
        let encoder = match (settings.mode, encoder) {
            (ObservationMode::Latent, encoder) => Some(LatentEncoderAdapter::new(encoder)?),
            (_, Some(encoder)) => Some(LatentEncoderAdapter::new(Some(encoder))?),
            (_, None) => None,
        };
        if let Some(adapter) = &encoder
            && adapter.input_side() != settings.image_side
        {
            return Err(EnvError::EncoderUnavailable(format!(
                "encoder expects {side}x{side} images, simulator sends {image}x{image}",
                side = adapter.input_side(),
                image = settings.image_side
            )));
        }

        Ok(Self {
            reconciler: SequenceReconciler::new(request, broadcast, settings.reconciler),
            encoder,
            settings,
            progress: EpisodeProgress::default(),
            latest_state: None,
            closed: false,
        })
    }

    /// Connects both ZeroMQ channels described by `config`.
    ///
    /// Without an explicit `encoder`, the configured artifact directory is loaded.
    pub async fn connect(
        config: &Config,
        encoder: Option<Box<dyn LatentEncoder>>,
    ) -> Result<Self, EnvError> {
        let encoder = match (encoder, &config.observation.encoder_artifact) {
            (Some(encoder), _) => Some(encoder),
            (None, Some(artifact_dir)) => Some(load_encoder(artifact_dir)?),
            (None, None) => None,
        };

        let connection = &config.connection;
        let request =
            ZmqRequestChannel::connect(connection.action_endpoint(), connection.receive_timeout())
                .await?;
        let broadcast = ZmqBroadcastChannel::connect(
            connection.state_endpoint(),
            &connection.topic_filter,
            connection.receive_timeout(),
        )
        .await?;
        tracing::info!(
            target: "env",
            action_endpoint = %request.endpoint(),
            state_endpoint = %broadcast.endpoint(),
            mode = ?config.observation.mode,
            "env_connected"
        );

        Self::new(
            Box::new(request),
            Box::new(broadcast),
            encoder,
            EnvSettings::from_config(config),
        )
    }

    pub fn settings(&self) -> &EnvSettings {
        &self.settings
    }

    pub fn progress(&self) -> EpisodeProgress {
        self.progress
    }

    pub fn latest_state(&self) -> Option<&StatePayload> {
        self.latest_state.as_ref()
    }

    pub fn last_sent_seqno(&self) -> u64 {
        self.reconciler.last_sent_seqno()
    }

    pub fn observation_space(&self) -> SpaceInfo {
        let latent_dims = self
            .encoder
            .as_ref()
            .map(LatentEncoderAdapter::latent_dims)
            .unwrap_or_default();
        SpaceInfo::observation(self.settings.mode, self.settings.image_side, latent_dims)
    }

    pub fn action_space(&self) -> SpaceInfo {
        SpaceInfo::actions()
    }

    /// Moves the simulator to a fresh problem and zeroes episode progress.
    ///
    /// The simulator has no seeding; `seed` is only logged.
    #[tracing::instrument(name = "env_reset", target = "env", skip(self))]
    pub async fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, StepInfo), EnvError> {
        self.ensure_open()?;
        if let Some(seed) = seed {
            tracing::debug!(target: "env", seed = seed, "reset_seed_ignored");
        }

        let reconciled = self.reconciler.dispatch(Action::NextShape).await?;
        let (observation, similarity) = self.observe(&reconciled.state)?;
        let progress = EpisodeProgress::default();
        let info = step_info(&reconciled, &progress, similarity);

        self.progress = progress;
        self.latest_state = Some(reconciled.state);
        tracing::info!(target: "env", seqno = info.seqno, same = info.ground_truth_same, "env_reset_completed");
        Ok((observation, info))
    }

    #[tracing::instrument(name = "env_step", target = "env", skip(self), fields(action = %action))]
    pub async fn step(&mut self, action: Action) -> Result<StepResult<Observation>, EnvError> {
        self.ensure_open()?;

        let reconciled = self.reconciler.dispatch(action).await?;
        let (observation, similarity) = self.observe(&reconciled.state)?;
        let ground_truth_same = reconciled.state.same;
        let reward = self
            .settings
            .reward
            .calculate(&self.progress.reward_context(action, ground_truth_same));
        let progress = self.progress.advanced(action);
        let terminated = self.settings.limits.terminated(&progress);
        let truncated = self.settings.limits.truncated(&progress);
        let info = step_info(&reconciled, &progress, similarity);

        self.progress = progress;
        self.latest_state = Some(reconciled.state);
        tracing::debug!(
            target: "env",
            seqno = info.seqno,
            reward = reward,
            answered = progress.answered,
            current_problem = progress.current_problem,
            current_timestep = progress.current_timestep,
            terminated = terminated,
            truncated = truncated,
            "env_step_completed"
        );

        Ok(StepResult {
            observation,
            reward,
            terminated,
            truncated,
            info,
        })
    }

    pub async fn step_index(&mut self, index: usize) -> Result<StepResult<Observation>, EnvError> {
        let action = Action::from_index(index)?;
        self.step(action).await
    }

    /// Closes both channels. Later calls are no-ops.
    pub async fn close(&mut self) -> Result<(), EnvError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::info!(target: "env", last_seqno = self.reconciler.last_sent_seqno(), "env_closing");
        self.reconciler.close().await
    }

    fn ensure_open(&self) -> Result<(), EnvError> {
        if self.closed {
            return Err(EnvError::Closed);
        }
        Ok(())
    }

    fn observe(&self, state: &StatePayload) -> Result<(Observation, Option<f32>), EnvError> {
        let expected = self.settings.image_side * self.settings.image_side;
        let left = viewport_pixels("left", state.left_viewport.screenshot.as_deref(), expected)?;
        let right = viewport_pixels("right", state.right_viewport.screenshot.as_deref(), expected)?;

        let Some(adapter) = &self.encoder else {
            return Ok((
                Observation {
                    left: left.to_vec(),
                    right: right.to_vec(),
                },
                None,
            ));
        };

        let (left_mean, right_mean) = adapter.encode_pair(left, right)?;
        let similarity = cosine_similarity(&left_mean, &right_mean);
        let observation = match self.settings.mode {
            ObservationMode::Latent => Observation {
                left: left_mean,
                right: right_mean,
            },
            ObservationMode::Raw | ObservationMode::Flattened => Observation {
                left: left.to_vec(),
                right: right.to_vec(),
            },
        };
        Ok((observation, Some(similarity)))
    }
}

fn viewport_pixels<'a>(
    name: &str,
    screenshot: Option<&'a [f32]>,
    expected: usize,
) -> Result<&'a [f32], EnvError> {
    let Some(pixels) = screenshot else {
        return Err(EnvError::InvalidObservation(format!(
            "{name} viewport carries no screenshot"
        )));
    };
    if pixels.len() != expected {
        return Err(EnvError::InvalidObservation(format!(
            "{name} screenshot has {} pixels, expected {expected}",
            pixels.len()
        )));
    }
    Ok(pixels)
}

fn step_info(
    reconciled: &ReconciledState,
    progress: &EpisodeProgress,
    latent_cosine_similarity: Option<f32>,
) -> StepInfo {
    StepInfo {
        seqno: reconciled.seqno,
        action: reconciled.action,
        ground_truth_same: reconciled.state.same,
        answered: progress.answered,
        current_problem: progress.current_problem,
        current_timestep: progress.current_timestep,
        selection_result: reconciled.selection_result,
        latent_cosine_similarity,
        transformations: reconciled.state.transformations,
        discarded_stale: reconciled.discarded_stale,
        discarded_malformed: reconciled.discarded_malformed,
    }
}
