use std::time::Duration;

use tokio::time::Instant;

use crate::{
    action::Action,
    codec::{self, RequestEnvelope, StatePayload, TopicKind},
    error::EnvError,
    transport::{BroadcastPort, RequestPort},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerPhase {
    Idle,
    AwaitingReply,
    AwaitingState,
    Reconciled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Upper bound on a single broadcast poll.
    pub poll_interval: Duration,
    /// Deadline for a matching state broadcast once the reply is in.
    pub sync_timeout: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            sync_timeout: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledState {
    pub seqno: u64,
    pub action: Action,
    pub state: StatePayload,
    pub selection_result: Option<bool>,
    pub discarded_stale: usize,
    pub discarded_malformed: usize,
}

/// Pairs each issued action with the first state broadcast that reflects it.
pub struct SequenceReconciler {
    request: Box<dyn RequestPort>,
    broadcast: Box<dyn BroadcastPort>,
    settings: ReconcilerSettings,
    next_seqno: u64,
    phase: ReconcilerPhase,
}

impl SequenceReconciler {
    pub fn new(
        request: Box<dyn RequestPort>,
        broadcast: Box<dyn BroadcastPort>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            request,
            broadcast,
            settings,
            next_seqno: 1,
            phase: ReconcilerPhase::Idle,
        }
    }

    pub fn phase(&self) -> ReconcilerPhase {
        self.phase
    }

    pub fn settings(&self) -> ReconcilerSettings {
        self.settings
    }

    /// Seqno of the most recent send, 0 before the first one.
    pub fn last_sent_seqno(&self) -> u64 {
        self.next_seqno - 1
    }

    #[tracing::instrument(
        name = "reconciler_dispatch",
        target = "reconciler",
        skip(self),
        fields(action = %action, seqno = self.next_seqno)
    )]
    pub async fn dispatch(&mut self, action: Action) -> Result<ReconciledState, EnvError> {
        let result = self.dispatch_inner(action).await;
        self.phase = match &result {
            Ok(_) => ReconcilerPhase::Reconciled,
            Err(err) => {
                tracing::warn!(
                    target: "reconciler",
                    action = %action,
                    seqno = self.last_sent_seqno(),
                    error = %err,
                    "dispatch_failed"
                );
                ReconcilerPhase::Idle
            }
        };
        result
    }

    async fn dispatch_inner(&mut self, action: Action) -> Result<ReconciledState, EnvError> {
        let seqno = self.next_seqno;
        let envelope = RequestEnvelope::action(seqno, codec::epoch_millis(), action);
        let encoded = codec::encode(&envelope)?;

        self.next_seqno += 1;
        self.phase = ReconcilerPhase::AwaitingReply;
        let raw_reply = self.request.request(seqno, &encoded).await?;
        let reply = codec::decode_reply(&raw_reply)?;
        if !reply.is_success() {
            return Err(EnvError::ActionRejected {
                action: action.wire_name().to_string(),
                seqno,
                status: reply.data.status,
            });
        }

        self.phase = ReconcilerPhase::AwaitingState;
        self.await_state(seqno, action).await
    }

    async fn await_state(
        &mut self,
        seqno: u64,
        action: Action,
    ) -> Result<ReconciledState, EnvError> {
        let deadline = Instant::now() + self.settings.sync_timeout;
        let mut selection_result = None;
        let mut discarded_stale = 0;
        let mut discarded_malformed = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(EnvError::StateSyncTimeout {
                    seqno,
                    timeout_ms: self.settings.sync_timeout.as_millis() as u64,
                });
            }
            let wait = (deadline - now).min(self.settings.poll_interval);

            let Some(raw) = self.broadcast.poll(wait).await? else {
                continue;
            };

            let message = match codec::decode_frame(&raw) {
                Ok(message) => message,
                Err(err) => {
                    discarded_malformed += 1;
                    tracing::warn!(target: "reconciler", seqno = seqno, error = %err, "broadcast_dropped_malformed");
                    continue;
                }
            };

            match message.kind {
                TopicKind::State => {
                    let state = match message.state() {
                        Ok(state) => state,
                        Err(err) => {
                            discarded_malformed += 1;
                            tracing::warn!(
                                target: "reconciler",
                                seqno = seqno,
                                topic = %message.topic,
                                error = %err,
                                "state_dropped_malformed"
                            );
                            continue;
                        }
                    };

                    if state.last_action_seqno < seqno {
                        discarded_stale += 1;
                        tracing::debug!(
                            target: "reconciler",
                            seqno = seqno,
                            last_action_seqno = state.last_action_seqno,
                            "state_dropped_stale"
                        );
                        continue;
                    }

                    tracing::debug!(
                        target: "reconciler",
                        seqno = seqno,
                        last_action_seqno = state.last_action_seqno,
                        discarded_stale = discarded_stale,
                        "state_reconciled"
                    );
                    return Ok(ReconciledState {
                        seqno,
                        action,
                        state,
                        selection_result,
                        discarded_stale,
                        discarded_malformed,
                    });
                }
                TopicKind::SelectionResult => match message.selection_result() {
                    Ok(result) => selection_result = Some(result.result),
                    Err(err) => {
                        discarded_malformed += 1;
                        tracing::warn!(target: "reconciler", seqno = seqno, error = %err, "selection_result_dropped_malformed");
                    }
                },
                TopicKind::ActionRequested | TopicKind::Other => {
                    tracing::trace!(target: "reconciler", topic = %message.topic, "broadcast_ignored");
                }
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), EnvError> {
        let request_result = self.request.close().await;
        let broadcast_result = self.broadcast.close().await;
        self.phase = ReconcilerPhase::Idle;
        request_result.and(broadcast_result)
    }
}
