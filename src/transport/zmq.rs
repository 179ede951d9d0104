use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::{
    error::EnvError,
    transport::ports::{BroadcastPort, RequestPort},
};

pub fn tcp_endpoint(host: &str, port: u16) -> String {
    format!("tcp://{host}:{port}")
}

fn message_text(message: ZmqMessage) -> Result<String, EnvError> {
    String::try_from(message).map_err(|err| EnvError::malformed(err.to_string()))
}

/// Multipart frames are joined with the topic separator.
fn message_bytes(message: ZmqMessage) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (index, frame) in message.into_vec().into_iter().enumerate() {
        if index > 0 {
            bytes.push(b' ');
        }
        bytes.extend_from_slice(&frame);
    }
    bytes
}

/// ZeroMQ REQ socket bound to the simulator's action listener.
pub struct ZmqRequestChannel {
    endpoint: String,
    receive_timeout: Duration,
    socket: Option<ReqSocket>,
    awaiting_reply: bool,
}

impl ZmqRequestChannel {
    pub async fn connect(endpoint: String, receive_timeout: Duration) -> Result<Self, EnvError> {
        let mut channel = Self {
            endpoint,
            receive_timeout,
            socket: None,
            awaiting_reply: false,
        };
        channel.reconnect().await?;
        Ok(channel)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn reconnect(&mut self) -> Result<(), EnvError> {
        if let Some(stale) = self.socket.take() {
            close_bounded(stale, self.receive_timeout, &self.endpoint).await;
        }

        let mut socket = ReqSocket::new();
        match timeout(self.receive_timeout, socket.connect(&self.endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EnvError::transport(format!(
                    "connect to {} timed out",
                    self.endpoint
                )));
            }
        }
        tracing::debug!(target: "transport", endpoint = %self.endpoint, "request_channel_connected");

        self.socket = Some(socket);
        self.awaiting_reply = false;
        Ok(())
    }
}

#[async_trait]
impl RequestPort for ZmqRequestChannel {
    async fn request(&mut self, seqno: u64, payload: &str) -> Result<String, EnvError> {
        // A REQ socket that lost its reply cannot send again.
        if self.awaiting_reply || self.socket.is_none() {
            tracing::warn!(
                target: "transport",
                endpoint = %self.endpoint,
                seqno = seqno,
                "request_channel_rebuilt_after_missed_reply"
            );
            self.reconnect().await?;
        }
        let window = self.receive_timeout;
        let socket = self.socket.as_mut().ok_or(EnvError::Closed)?;

        socket.send(ZmqMessage::from(payload.to_string())).await?;
        self.awaiting_reply = true;

        let reply = match timeout(window, socket.recv()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EnvError::RequestTimeout {
                    seqno,
                    timeout_ms: window.as_millis() as u64,
                });
            }
        };
        self.awaiting_reply = false;
        message_text(reply)
    }

    fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        if let Some(socket) = self.socket.take() {
            close_bounded(socket, self.receive_timeout, &self.endpoint).await;
        }
        Ok(())
    }
}

/// ZeroMQ SUB socket bound to the simulator's state publisher.
pub struct ZmqBroadcastChannel {
    endpoint: String,
    receive_timeout: Duration,
    socket: Option<SubSocket>,
}

impl ZmqBroadcastChannel {
    pub async fn connect(
        endpoint: String,
        topic_filter: &str,
        receive_timeout: Duration,
    ) -> Result<Self, EnvError> {
        let mut socket = SubSocket::new();
        socket.subscribe(topic_filter).await?;
        match timeout(receive_timeout, socket.connect(&endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EnvError::transport(format!(
                    "connect to {endpoint} timed out"
                )));
            }
        }
        tracing::debug!(
            target: "transport",
            endpoint = %endpoint,
            topic_filter = %topic_filter,
            "broadcast_channel_connected"
        );

        Ok(Self {
            endpoint,
            receive_timeout,
            socket: Some(socket),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BroadcastPort for ZmqBroadcastChannel {
    async fn poll(&mut self, max_wait: Duration) -> Result<Option<Vec<u8>>, EnvError> {
        let socket = self.socket.as_mut().ok_or(EnvError::Closed)?;
        match timeout(max_wait, socket.recv()).await {
            Ok(result) => Ok(Some(message_bytes(result?))),
            Err(_) => Ok(None),
        }
    }

    fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        if let Some(socket) = self.socket.take() {
            close_bounded(socket, self.receive_timeout, &self.endpoint).await;
        }
        Ok(())
    }
}

async fn close_bounded<S: Socket>(socket: S, window: Duration, endpoint: &str) {
    match timeout(window, socket.close()).await {
        Ok(errors) if errors.is_empty() => {}
        Ok(errors) => tracing::warn!(
            target: "transport",
            endpoint = %endpoint,
            errors = errors.len(),
            "socket_close_reported_errors"
        ),
        Err(_) => tracing::warn!(target: "transport", endpoint = %endpoint, "socket_close_timed_out"),
    }
}

#[cfg(test)]
mod tests {
    use zeromq::ZmqMessage;

    use super::{message_bytes, tcp_endpoint};

    #[test]
    fn formats_tcp_endpoint() {
        assert_eq!(tcp_endpoint("localhost", 10002), "tcp://localhost:10002");
    }

    #[test]
    fn keeps_non_utf8_frames_undecoded() {
        let frame = vec![0xff, 0xfe, b' ', b'{'];
        assert_eq!(message_bytes(ZmqMessage::from(frame.clone())), frame);
    }

    #[test]
    fn joins_multipart_frames_with_separator() {
        let mut message = ZmqMessage::from("/polyomino-world/state".to_string());
        message.push_back(r#"{"data":{}}"#.into());
        assert_eq!(
            message_bytes(message),
            br#"/polyomino-world/state {"data":{}}"#.to_vec()
        );
    }
}
