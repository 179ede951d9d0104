use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    time::Instant,
};

use crate::{codec, transport::BroadcastPort};

/// Upper bound on one receive attempt; the silence check runs between attempts.
pub const RECEIVE_WAIT: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenSummary {
    pub received: usize,
    pub malformed: usize,
}

/// Prints every broadcast as `topic: <topic>; payload: <json>` until nothing
/// arrives for `silence_timeout`.
#[tracing::instrument(name = "listener_run", target = "listener", skip(broadcast, out))]
pub async fn listen<W>(
    broadcast: &mut dyn BroadcastPort,
    silence_timeout: Duration,
    verbose: bool,
    out: &mut W,
) -> Result<ListenSummary>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut summary = ListenSummary::default();
    let mut last_message = Instant::now();

    loop {
        let remaining = silence_timeout.saturating_sub(last_message.elapsed());
        if remaining.is_zero() {
            tracing::info!(
                target: "listener",
                received = summary.received,
                malformed = summary.malformed,
                silence_ms = silence_timeout.as_millis() as u64,
                "listener_silence_shutdown"
            );
            return Ok(summary);
        }

        let Some(raw) = broadcast.poll(RECEIVE_WAIT.min(remaining)).await? else {
            if verbose {
                out.write_all(b"waiting for messages...\n").await?;
            }
            continue;
        };
        last_message = Instant::now();

        match codec::decode_frame(&raw) {
            Ok(message) => {
                summary.received += 1;
                let line = format!("topic: {}; payload: {}\n", message.topic, message.payload);
                out.write_all(line.as_bytes())
                    .await
                    .context("failed to write broadcast")?;
            }
            Err(err) => {
                summary.malformed += 1;
                tracing::warn!(target: "listener", error = %err, "listener_dropped_malformed");
            }
        }
        out.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::listen;
    use crate::testing::{InMemoryBroadcastChannel, selection_result_message, state_message};

    #[tokio::test(start_paused = true)]
    async fn prints_messages_then_stops_on_silence() {
        let (sender, mut broadcast) = InMemoryBroadcastChannel::pair(Duration::from_millis(500));
        sender
            .send(state_message(1, true, None, None).into_bytes())
            .expect("queued");
        sender.send(b"garbage".to_vec()).expect("queued");
        sender
            .send(selection_result_message(false).into_bytes())
            .expect("queued");

        let mut out = Vec::new();
        let summary = listen(&mut broadcast, Duration::from_millis(25_000), false, &mut out)
            .await
            .expect("listener stops cleanly");

        assert_eq!(summary.received, 2);
        assert_eq!(summary.malformed, 1);
        let printed = String::from_utf8(out).expect("utf8 output");
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("topic: /polyomino-world/state; payload: {"));
        assert!(lines[1].starts_with("topic: /polyomino/selection-result/;"));
        drop(sender);
    }

    #[tokio::test(start_paused = true)]
    async fn non_utf8_frame_is_counted_and_listening_continues() {
        let (sender, mut broadcast) = InMemoryBroadcastChannel::pair(Duration::from_millis(500));
        sender.send(vec![0xff, 0xfe, b' ', b'{']).expect("queued");
        sender
            .send(state_message(5, false, None, None).into_bytes())
            .expect("queued");

        let mut out = Vec::new();
        let summary = listen(&mut broadcast, Duration::from_millis(5_000), false, &mut out)
            .await
            .expect("listener stops cleanly");

        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.received, 1);
        let printed = String::from_utf8(out).expect("utf8 output");
        assert!(printed.starts_with("topic: /polyomino-world/state;"));
        drop(sender);
    }

    #[tokio::test(start_paused = true)]
    async fn verbose_reports_idle_polls() {
        let (_sender, mut broadcast) = InMemoryBroadcastChannel::pair(Duration::from_millis(500));

        let mut out = Vec::new();
        let summary = listen(&mut broadcast, Duration::from_millis(3_000), true, &mut out)
            .await
            .expect("listener stops cleanly");

        assert_eq!(summary.received, 0);
        let printed = String::from_utf8(out).expect("utf8 output");
        assert_eq!(printed.lines().count(), 3);
    }
}
