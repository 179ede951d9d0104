//! In-memory transport doubles, a scripted simulator, and a toy encoder.
//!
//! Everything here runs on the tokio clock, so tests using a paused clock see
//! timeouts elapse without real waiting.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::{
    action::Action,
    codec::{self, ActionReply, RequestEnvelope},
    encoder::{EncodedBatch, ImageBatch, LatentEncoder},
    error::EnvError,
    transport::{BroadcastPort, RequestPort},
};

pub const STATE_TOPIC: &str = "/polyomino-world/state";
pub const SELECTION_RESULT_TOPIC: &str = "/polyomino/selection-result/";
pub const ACTION_REQUESTED_TOPIC: &str = "/polyomino/action_requested";

/// Reply handler: `None` means the remote never answers.
pub type RequestHandler = Box<dyn FnMut(&str) -> Option<String> + Send>;

pub struct InMemoryRequestChannel {
    handler: RequestHandler,
    receive_timeout: Duration,
    closed: bool,
}

impl InMemoryRequestChannel {
    pub fn new(receive_timeout: Duration, handler: RequestHandler) -> Self {
        Self {
            handler,
            receive_timeout,
            closed: false,
        }
    }
}

#[async_trait]
impl RequestPort for InMemoryRequestChannel {
    async fn request(&mut self, seqno: u64, payload: &str) -> Result<String, EnvError> {
        if self.closed {
            return Err(EnvError::Closed);
        }
        match (self.handler)(payload) {
            Some(reply) => Ok(reply),
            None => {
                tokio::time::sleep(self.receive_timeout).await;
                Err(EnvError::RequestTimeout {
                    seqno,
                    timeout_ms: self.receive_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        self.closed = true;
        Ok(())
    }
}

pub struct InMemoryBroadcastChannel {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    receive_timeout: Duration,
    closed: bool,
}

impl InMemoryBroadcastChannel {
    /// Returns the publishing half together with the subscription.
    pub fn pair(receive_timeout: Duration) -> (mpsc::UnboundedSender<Vec<u8>>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            Self {
                receiver,
                receive_timeout,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl BroadcastPort for InMemoryBroadcastChannel {
    async fn poll(&mut self, max_wait: Duration) -> Result<Option<Vec<u8>>, EnvError> {
        if self.closed {
            return Err(EnvError::Closed);
        }
        match tokio::time::timeout(max_wait, self.receiver.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            // publisher gone: behave like a silent subscription
            Ok(None) => {
                tokio::time::sleep(max_wait).await;
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }

    fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        self.closed = true;
        self.receiver.close();
        Ok(())
    }
}

/// Builds a state broadcast the way the simulator publishes it.
pub fn state_message(
    last_action_seqno: u64,
    same: bool,
    left: Option<Vec<f32>>,
    right: Option<Vec<f32>>,
) -> String {
    let payload = json!({
        "header": {"seqno": last_action_seqno + 1000, "time": 0},
        "data": {
            "last_action_seqno": last_action_seqno,
            "left_viewport": {"screenshot": left, "shape": 5, "id": 17},
            "right_viewport": {"screenshot": right, "shape": 5, "id": 17},
            "same": same,
            "mode": true,
            "transformations": {"rotation_active": 0.0, "scale": 1.0, "translation": 0.0}
        }
    });
    codec::encode_topic_message(STATE_TOPIC, &payload).unwrap_or_default()
}

pub fn selection_result_message(result: bool) -> String {
    codec::encode_topic_message(SELECTION_RESULT_TOPIC, &json!({"data": {"result": result}}))
        .unwrap_or_default()
}

/// Faults the simulator can inject into its next responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorBehavior {
    /// Stale states (`last_action_seqno = seqno - 1`, inverted `same`) sent before the real one.
    pub stale_states_before_current: usize,
    /// Prefixes each batch with a message that has no JSON body.
    pub malformed_noise: bool,
    /// Acknowledges but never publishes the matching state.
    pub withhold_state: bool,
    /// Replies with this status instead of `SUCCESS`.
    pub reject_status: Option<String>,
    /// Never replies at all.
    pub withhold_reply: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorScript {
    /// Ground truth `same` per problem, cycled.
    pub problems: Vec<bool>,
    pub side: usize,
    pub include_screenshots: bool,
}

impl SimulatorScript {
    pub fn new(problems: Vec<bool>, side: usize) -> Self {
        Self {
            problems,
            side,
            include_screenshots: true,
        }
    }

    pub fn without_screenshots(mut self) -> Self {
        self.include_screenshots = false;
        self
    }
}

struct SimulatorState {
    script: SimulatorScript,
    behavior: SimulatorBehavior,
    started: bool,
    problem: usize,
    requests: Vec<RequestEnvelope>,
    outbox: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl SimulatorState {
    fn ground_truth(&self) -> bool {
        if self.script.problems.is_empty() {
            return true;
        }
        self.script.problems[self.problem % self.script.problems.len()]
    }

    fn screenshot(&self, offset: usize) -> Option<Vec<f32>> {
        if !self.script.include_screenshots {
            return None;
        }
        let pixels = self.script.side * self.script.side;
        Some(
            (0..pixels)
                .map(|i| ((i + self.problem * 7 + offset) % 256) as f32)
                .collect(),
        )
    }

    fn publish(&self, message: String) {
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(message.into_bytes());
        }
    }

    fn handle(&mut self, raw: &str) -> Option<String> {
        let Ok(envelope) = codec::decode_request(raw) else {
            return codec::encode_reply(&ActionReply::with_status("BAD_REQUEST")).ok();
        };
        let seqno = envelope.header.seqno;
        let action = envelope.action_value();
        self.requests.push(envelope);

        if self.behavior.withhold_reply {
            return None;
        }
        if let Some(status) = self.behavior.reject_status.clone() {
            return codec::encode_reply(&ActionReply::with_status(status)).ok();
        }

        if action == Action::NextShape {
            if self.started {
                self.problem += 1;
            }
            self.started = true;
        }
        let same = self.ground_truth();

        if self.behavior.malformed_noise {
            self.publish(format!("{STATE_TOPIC} not-json"));
        }
        self.publish(
            codec::encode_topic_message(
                ACTION_REQUESTED_TOPIC,
                &json!({"data": {"action": action.wire_name()}}),
            )
            .unwrap_or_default(),
        );
        if let Some(selected) = action.selected_same() {
            self.publish(selection_result_message(selected == same));
        }
        for _ in 0..self.behavior.stale_states_before_current {
            self.publish(state_message(
                seqno.saturating_sub(1),
                !same,
                self.screenshot(1),
                self.screenshot(2),
            ));
        }
        if !self.behavior.withhold_state {
            self.publish(state_message(
                seqno,
                same,
                self.screenshot(0),
                self.screenshot(3),
            ));
        }

        codec::encode_reply(&ActionReply::success()).ok()
    }
}

/// Scripted stand-in for the remote simulator.
#[derive(Clone)]
pub struct SimulatedRemote {
    state: Arc<Mutex<SimulatorState>>,
}

impl SimulatedRemote {
    pub fn new(script: SimulatorScript) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatorState {
                script,
                behavior: SimulatorBehavior::default(),
                started: false,
                problem: 0,
                requests: Vec::new(),
                outbox: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connects a fresh pair of channels; earlier broadcast subscriptions stop receiving.
    pub fn channels(
        &self,
        receive_timeout: Duration,
    ) -> (InMemoryRequestChannel, InMemoryBroadcastChannel) {
        let (sender, broadcast) = InMemoryBroadcastChannel::pair(receive_timeout);
        self.lock().outbox = Some(sender);

        let remote = self.clone();
        let request = InMemoryRequestChannel::new(
            receive_timeout,
            Box::new(move |raw| remote.lock().handle(raw)),
        );
        (request, broadcast)
    }

    pub fn set_behavior(&self, behavior: SimulatorBehavior) {
        self.lock().behavior = behavior;
    }

    pub fn requests(&self) -> Vec<RequestEnvelope> {
        self.lock().requests.clone()
    }

    pub fn sent_seqnos(&self) -> Vec<u64> {
        self.lock()
            .requests
            .iter()
            .map(|request| request.header.seqno)
            .collect()
    }

    pub fn current_problem(&self) -> usize {
        self.lock().problem
    }
}

/// Deterministic encoder: each latent dimension is the mean of one contiguous pixel band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeanPoolEncoder {
    side: usize,
    latent_dims: usize,
}

impl MeanPoolEncoder {
    pub fn new(side: usize, latent_dims: usize) -> Self {
        Self { side, latent_dims }
    }

    fn band(&self, dim: usize) -> (usize, usize) {
        let pixels = self.side * self.side;
        (
            dim * pixels / self.latent_dims,
            (dim + 1) * pixels / self.latent_dims,
        )
    }
}

impl LatentEncoder for MeanPoolEncoder {
    fn latent_dims(&self) -> usize {
        self.latent_dims
    }

    fn input_side(&self) -> usize {
        self.side
    }

    fn encode(&self, batch: &ImageBatch) -> Result<EncodedBatch, EnvError> {
        if batch.side != self.side {
            return Err(EnvError::InvalidObservation(format!(
                "image side {} does not match encoder input side {}",
                batch.side, self.side
            )));
        }

        let preprocessed: Vec<Vec<f32>> = batch
            .images
            .iter()
            .map(|image| image.iter().map(|v| v / 255.0).collect())
            .collect();
        let mean: Vec<Vec<f32>> = preprocessed
            .iter()
            .map(|image| {
                (0..self.latent_dims)
                    .map(|dim| {
                        let (start, end) = self.band(dim);
                        let band = &image[start.min(image.len())..end.min(image.len())];
                        if band.is_empty() {
                            0.0
                        } else {
                            band.iter().sum::<f32>() / band.len() as f32
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(EncodedBatch {
            logvar: vec![vec![0.0; self.latent_dims]; mean.len()],
            sigma: vec![vec![1.0; self.latent_dims]; mean.len()],
            mean,
            preprocessed: ImageBatch {
                side: self.side,
                images: preprocessed,
            },
        })
    }

    fn decode(&self, latents: &[Vec<f32>]) -> Result<ImageBatch, EnvError> {
        let pixels = self.side * self.side;
        let images = latents
            .iter()
            .map(|z| {
                if z.len() != self.latent_dims {
                    return Err(EnvError::EncoderInference(format!(
                        "latent vector has {} dims, expected {}",
                        z.len(),
                        self.latent_dims
                    )));
                }
                Ok((0..pixels)
                    .map(|p| z[p * self.latent_dims / pixels] * 255.0)
                    .collect())
            })
            .collect::<Result<Vec<Vec<f32>>, EnvError>>()?;
        Ok(ImageBatch {
            side: self.side,
            images,
        })
    }
}
