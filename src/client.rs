use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    action::Action,
    codec::{self, RequestEnvelope},
    error::EnvErrorKind,
    transport::RequestPort,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaySummary {
    pub sent: u64,
    pub rejected: u64,
    pub timed_out: u64,
}

pub fn prompt() -> String {
    let keys: Vec<String> = Action::ALL
        .iter()
        .map(|action| action.key().to_string())
        .collect();
    format!(
        "Select an action ({}) followed by [ENTER]; any other key quits",
        keys.join(", ")
    )
}

/// Interactive action client: each key read from `input` is sent as one
/// sequence-numbered request. The first unknown key ends the session.
#[tracing::instrument(name = "client_play", target = "client", skip(request, input, out))]
pub async fn play<R, W>(
    request: &mut dyn RequestPort,
    input: R,
    out: &mut W,
    verbose: bool,
) -> Result<PlaySummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut summary = PlaySummary::default();
    let mut seqno = 1;
    let mut lines = input.lines();

    out.write_all(format!("{}\n", prompt()).as_bytes()).await?;
    out.flush().await?;

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        for key in line.chars().filter(|key| !key.is_whitespace()) {
            let Some(action) = Action::from_key(key) else {
                tracing::info!(target: "client", key = %key, sent = summary.sent, "client_quit_on_unknown_key");
                return Ok(summary);
            };

            let envelope = RequestEnvelope::action(seqno, codec::epoch_millis(), action);
            let payload = codec::encode(&envelope)?;
            seqno += 1;
            summary.sent += 1;

            match request.request(envelope.header.seqno, &payload).await {
                Ok(raw_reply) => {
                    let reply = codec::decode_reply(&raw_reply)?;
                    if !reply.is_success() {
                        summary.rejected += 1;
                        tracing::warn!(
                            target: "client",
                            seqno = envelope.header.seqno,
                            action = %action,
                            status = %reply.data.status,
                            "client_action_rejected"
                        );
                    }
                    if verbose {
                        let line = format!("\tREQUEST: {payload}\n\tREPLY: {raw_reply}\n");
                        out.write_all(line.as_bytes()).await?;
                    }
                }
                Err(err) if err.kind() == EnvErrorKind::RequestTimeout => {
                    summary.timed_out += 1;
                    tracing::warn!(target: "client", seqno = envelope.header.seqno, error = %err, "client_request_timed_out");
                }
                Err(err) => return Err(err.into()),
            }
        }
        out.write_all(format!("{}\n", prompt()).as_bytes()).await?;
        out.flush().await?;
    }

    Ok(summary)
}
