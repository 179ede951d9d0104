use polyomino_env::{
    codec::{self, TopicKind},
    error::EnvErrorKind,
};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

fn payload_strategy() -> impl Strategy<Value = Value> {
    proptest::collection::btree_map("[a-z_]{1,8}", any::<i32>(), 0..5).prop_map(|fields| {
        let data: Map<String, Value> = fields
            .into_iter()
            .map(|(key, value)| (key, json!({ "value": value, "nested": { "braces": "{}" } })))
            .collect();
        json!({ "data": data })
    })
}

proptest! {
    #[test]
    fn topic_messages_survive_the_first_brace_split(
        topic in "(/[a-z_-]{1,12}){0,4}/?",
        payload in payload_strategy(),
    ) {
        let raw = codec::encode_topic_message(&topic, &payload).expect("encodes");
        let (decoded_topic, decoded_payload) = codec::decode(&raw).expect("decodes");
        prop_assert_eq!(&decoded_topic, &topic);
        prop_assert_eq!(decoded_payload, payload);

        let message = codec::decode_frame(raw.as_bytes()).expect("decodes");
        prop_assert_eq!(message.kind, TopicKind::resolve(&topic));
    }

    #[test]
    fn text_without_a_brace_is_malformed(raw in "[^{]{0,64}") {
        let err = codec::decode(&raw).expect_err("no json object");
        prop_assert_eq!(err.kind(), EnvErrorKind::MalformedMessage);
    }
}
