use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{action::Action, error::EnvError};

pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Dispatch tag for broadcast topics, resolved once when a message is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    State,
    SelectionResult,
    ActionRequested,
    Other,
}

impl TopicKind {
    pub fn resolve(topic: &str) -> Self {
        if topic.contains("/state") {
            TopicKind::State
        } else if topic.contains("selection-result") {
            TopicKind::SelectionResult
        } else if topic.contains("action_requested") {
            TopicKind::ActionRequested
        } else {
            TopicKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub seqno: u64,
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestEvent {
    Action { value: Action },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    pub event: RequestEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub header: RequestHeader,
    pub data: RequestData,
}

impl RequestEnvelope {
    pub fn action(seqno: u64, time: u64, action: Action) -> Self {
        Self {
            header: RequestHeader { seqno, time },
            data: RequestData {
                event: RequestEvent::Action { value: action },
            },
        }
    }

    pub fn action_value(&self) -> Action {
        match self.data.event {
            RequestEvent::Action { value } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplyData {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionReply {
    pub data: ReplyData,
}

impl ActionReply {
    pub fn success() -> Self {
        Self::with_status(STATUS_SUCCESS)
    }

    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            data: ReplyData {
                status: status.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.status == STATUS_SUCCESS
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ViewportState {
    #[serde(default)]
    pub screenshot: Option<Vec<f32>>,
    pub shape: i64,
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Transformations {
    pub rotation_active: f64,
    pub scale: f64,
    pub translation: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StatePayload {
    pub last_action_seqno: u64,
    pub left_viewport: ViewportState,
    pub right_viewport: ViewportState,
    pub same: bool,
    #[serde(default)]
    pub mode: Option<Value>,
    #[serde(default)]
    pub transformations: Option<Transformations>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SelectionResult {
    pub result: bool,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub topic: String,
    pub kind: TopicKind,
    pub payload: Value,
}

impl BroadcastMessage {
    pub fn state(&self) -> Result<StatePayload, EnvError> {
        payload_data(&self.payload)
    }

    pub fn selection_result(&self) -> Result<SelectionResult, EnvError> {
        payload_data(&self.payload)
    }
}

/// Request header timestamp.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

pub fn encode(envelope: &RequestEnvelope) -> Result<String, EnvError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode_request(raw: &str) -> Result<RequestEnvelope, EnvError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn encode_reply(reply: &ActionReply) -> Result<String, EnvError> {
    Ok(serde_json::to_string(reply)?)
}

pub fn decode_reply(raw: &str) -> Result<ActionReply, EnvError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn encode_topic_message(topic: &str, payload: &Value) -> Result<String, EnvError> {
    let encoded = serde_json::to_string(payload)?;
    Ok(format!("{topic} {encoded}"))
}

/// Splits `"<topic> <json-object>"` at the first `{`.
///
/// Topics carry `/` and other non-JSON characters, so the first brace is the
/// only reliable boundary.
pub fn decode(raw: &str) -> Result<(String, Value), EnvError> {
    let Some(ndx) = raw.find('{') else {
        return Err(EnvError::malformed(format!(
            "no JSON object in message: {}",
            preview(raw)
        )));
    };

    let prefix = &raw[..ndx];
    let topic = prefix.strip_suffix(' ').unwrap_or(prefix).to_string();
    let payload: Value = serde_json::from_str(&raw[ndx..])?;
    Ok((topic, payload))
}

/// Decodes one broadcast frame as received from the wire.
pub fn decode_frame(frame: &[u8]) -> Result<BroadcastMessage, EnvError> {
    let raw = std::str::from_utf8(frame)
        .map_err(|err| EnvError::malformed(format!("broadcast is not UTF-8: {err}")))?;
    decode_broadcast(raw)
}

pub fn decode_broadcast(raw: &str) -> Result<BroadcastMessage, EnvError> {
    let (topic, payload) = decode(raw)?;
    Ok(BroadcastMessage {
        kind: TopicKind::resolve(&topic),
        topic,
        payload,
    })
}

fn payload_data<T: DeserializeOwned>(payload: &Value) -> Result<T, EnvError> {
    let envelope: DataEnvelope<T> = serde_json::from_value(payload.clone())?;
    Ok(envelope.data)
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 64;
    match raw.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &raw[..cut]),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        ActionReply, RequestEnvelope, TopicKind, decode, decode_broadcast, decode_frame,
        decode_reply, encode, encode_topic_message,
    };
    use crate::{action::Action, error::EnvErrorKind};

    #[test]
    fn encodes_action_request_shape() {
        let envelope = RequestEnvelope::action(3, 1_751_298_299_749, Action::SelectSame);
        let encoded = encode(&envelope).expect("request should encode");
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("valid json");
        assert_eq!(
            value,
            json!({
                "header": {"seqno": 3, "time": 1_751_298_299_749u64},
                "data": {"event": {"type": "action", "value": "select_same_shape"}}
            })
        );
    }

    #[test]
    fn splits_topic_on_first_brace() {
        let (topic, payload) =
            decode(r#"/polyomino-world/state {"data":{"nested":{"a":1}}}"#).expect("decodes");
        assert_eq!(topic, "/polyomino-world/state");
        assert_eq!(payload, json!({"data": {"nested": {"a": 1}}}));
    }

    #[test]
    fn accepts_message_without_topic() {
        let (topic, payload) = decode(r#"{"a":1}"#).expect("decodes");
        assert_eq!(topic, "");
        assert_eq!(payload, json!({"a": 1}));
    }

    #[test]
    fn rejects_message_without_brace() {
        let err = decode("/polyomino-world/state no-json-here").expect_err("must fail");
        assert_eq!(err.kind(), EnvErrorKind::MalformedMessage);
    }

    #[test]
    fn strips_only_one_separator_from_topic() {
        let (topic, _) = decode("/padded/topic  {\"a\":1}").expect("decodes");
        assert_eq!(topic, "/padded/topic ");

        let raw = encode_topic_message("/padded/topic ", &json!({"a": 1})).expect("encodes");
        let (topic, _) = decode(&raw).expect("decodes");
        assert_eq!(topic, "/padded/topic ");
    }

    #[test]
    fn non_utf8_frame_is_malformed() {
        let err = decode_frame(&[0xff, 0xfe, b' ', b'{']).expect_err("must fail");
        assert_eq!(err.kind(), EnvErrorKind::MalformedMessage);

        let message = decode_frame(br#"/polyomino/selection-result/ {"data":{"result":true}}"#)
            .expect("utf8 frame decodes");
        assert_eq!(message.kind, TopicKind::SelectionResult);
    }

    #[test]
    fn rejects_invalid_json_after_brace() {
        let err = decode("/topic {not json").expect_err("must fail");
        assert_eq!(err.kind(), EnvErrorKind::MalformedMessage);
    }

    #[test]
    fn resolves_topic_kinds() {
        assert_eq!(TopicKind::resolve("/polyomino-world/state"), TopicKind::State);
        assert_eq!(
            TopicKind::resolve("/polyomino/selection-result/"),
            TopicKind::SelectionResult
        );
        assert_eq!(
            TopicKind::resolve("/polyomino/action_requested"),
            TopicKind::ActionRequested
        );
        assert_eq!(TopicKind::resolve("/other"), TopicKind::Other);
    }

    #[test]
    fn decodes_state_broadcast_from_sample_traffic() {
        let raw = r#"/polyomino-world/state {"data": {"last_action_seqno": 1, "left_viewport": {"id": 17, "screenshot": null, "shape": 5}, "mode": true, "right_viewport": {"id": 17, "screenshot": null, "shape": 5}, "same": true, "transformations": {"rotation_active": 321.97, "scale": 0.83, "translation": 10.27}}, "header": {"seqno": 8, "time": 1751298299783}}"#;
        let message = decode_broadcast(raw).expect("decodes");
        assert_eq!(message.kind, TopicKind::State);

        let state = message.state().expect("state payload");
        assert_eq!(state.last_action_seqno, 1);
        assert!(state.same);
        assert!(state.left_viewport.screenshot.is_none());
        assert_eq!(state.right_viewport.shape, 5);
        let transformations = state.transformations.expect("transformations present");
        assert_eq!(transformations.scale, 0.83);
    }

    #[test]
    fn decodes_selection_result() {
        let raw = r#"/polyomino/selection-result/ {"data": {"result": true}, "header": {"seqno": 7, "time": 1}}"#;
        let message = decode_broadcast(raw).expect("decodes");
        assert_eq!(message.kind, TopicKind::SelectionResult);
        assert!(message.selection_result().expect("result payload").result);
    }

    #[test]
    fn state_without_seqno_is_malformed() {
        let message = decode_broadcast(r#"/polyomino-world/state {"data": {"same": true}}"#)
            .expect("envelope decodes");
        let err = message.state().expect_err("state must fail");
        assert_eq!(err.kind(), EnvErrorKind::MalformedMessage);
    }

    #[test]
    fn reply_status_is_checked() {
        assert!(decode_reply(r#"{"data":{"status":"SUCCESS"}}"#).unwrap().is_success());
        assert!(!decode_reply(r#"{"data":{"status":"ERROR"}}"#).unwrap().is_success());
        assert!(decode_reply(r#"{"data":{}}"#).is_err());
        assert!(ActionReply::success().is_success());
    }

    #[test]
    fn topic_message_round_trips() {
        let payload = json!({"data": {"result": false}});
        let raw = encode_topic_message("/polyomino/selection-result/", &payload).expect("encodes");
        let (topic, decoded) = decode(&raw).expect("decodes");
        assert_eq!(topic, "/polyomino/selection-result/");
        assert_eq!(decoded, payload);
    }
}
