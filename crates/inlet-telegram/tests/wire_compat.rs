// Verify real Bot API payloads normalize the way the pipeline expects.
// Bodies are trimmed copies of what Telegram actually posts to webhooks.

use inlet_core::types::{ConversationId, SenderId, UpdateId};
use inlet_ingest::{CombinedMessage, EnvelopeKind, IngestError, TransportEnvelope};
use inlet_telegram::{normalize_body, Normalized, TelegramError};

fn envelope(body: &str) -> TransportEnvelope {
    match normalize_body(body.as_bytes()).unwrap() {
        Normalized::Envelope(env) => env,
        Normalized::Ignored { reason, .. } => panic!("unexpectedly ignored: {reason}"),
    }
}

#[test]
fn group_text_with_unknown_fields() {
    let json = r#"{
        "update_id": 873611234,
        "message": {
            "message_id": 1502,
            "from": {"id": 4455, "is_bot": false, "first_name": "Lee", "language_code": "en"},
            "chat": {"id": -1001234567890, "title": "Rustaceans", "type": "supergroup"},
            "date": 1718000000,
            "message_thread_id": 12,
            "entities": [{"offset": 0, "length": 4, "type": "bold"}],
            "text": "anyone around?"
        }
    }"#;
    let env = envelope(json);
    assert_eq!(env.update_id, UpdateId(873611234));
    assert_eq!(env.sender_id, SenderId(4455));
    assert_eq!(env.conversation_id, ConversationId(-1001234567890));
    assert_eq!(env.message_id, 1502);
    assert_eq!(env.kind, EnvelopeKind::Text);
}

#[test]
fn edited_message_is_normalized_like_a_message() {
    let json = r#"{"update_id": 5, "edited_message": {
        "message_id": 9, "date": 1718000000, "edit_date": 1718000100,
        "from": {"id": 1, "is_bot": false, "first_name": "A"},
        "chat": {"id": 1, "type": "private"}, "text": "fixed typo"}}"#;
    assert_eq!(envelope(json).payload.text.as_deref(), Some("fixed typo"));
}

#[test]
fn voice_audio_and_video_note_map_to_media_kinds() {
    let voice = envelope(
        r#"{"update_id":1,"message":{"message_id":1,"chat":{"id":1},"from":{"id":1,"first_name":"A"},
            "voice":{"file_id":"v1","file_unique_id":"u","duration":3,"mime_type":"audio/ogg"}}}"#,
    );
    assert_eq!(voice.kind, EnvelopeKind::Voice);
    assert_eq!(voice.payload.file.unwrap().mime_type.as_deref(), Some("audio/ogg"));

    let note = envelope(
        r#"{"update_id":2,"message":{"message_id":2,"chat":{"id":1},"from":{"id":1,"first_name":"A"},
            "video_note":{"file_id":"n1","file_unique_id":"u","length":240,"duration":5}}}"#,
    );
    assert_eq!(note.kind, EnvelopeKind::Video);

    let doc = envelope(
        r#"{"update_id":3,"message":{"message_id":3,"chat":{"id":1},"from":{"id":1,"first_name":"A"},
            "document":{"file_id":"d1","file_unique_id":"u","file_name":"notes.pdf","mime_type":"application/pdf"},
            "caption":"read this"}}"#,
    );
    assert_eq!(doc.kind, EnvelopeKind::Document);
    assert_eq!(doc.payload.file.as_ref().unwrap().file_name.as_deref(), Some("notes.pdf"));
    assert_eq!(doc.text_content(), Some("read this"));
}

#[test]
fn contact_and_poll_payloads() {
    let contact = envelope(
        r#"{"update_id":4,"message":{"message_id":4,"chat":{"id":1},"from":{"id":1,"first_name":"A"},
            "contact":{"phone_number":"+15550100","first_name":"Sam","user_id":321}}}"#,
    );
    assert_eq!(contact.kind, EnvelopeKind::Contact);
    assert_eq!(contact.payload.contact.unwrap().user_id, Some(321));

    let poll = envelope(
        r#"{"update_id":5,"message":{"message_id":5,"chat":{"id":1},"from":{"id":1,"first_name":"A"},
            "poll":{"id":"p","question":"Tabs or spaces?","options":[
                {"text":"Tabs","voter_count":0},{"text":"Spaces","voter_count":0}],
                "total_voter_count":0,"is_closed":false,"is_anonymous":true,"type":"regular",
                "allows_multiple_answers":false}}}"#,
    );
    let data = poll.payload.poll.unwrap();
    assert_eq!(data.question, "Tabs or spaces?");
    assert_eq!(data.options, vec!["Tabs".to_string(), "Spaces".to_string()]);
}

#[test]
fn legacy_forward_fields_are_understood() {
    let env = envelope(
        r#"{"update_id":6,"message":{"message_id":6,"chat":{"id":1},"from":{"id":1,"first_name":"A"},
            "forward_sender_name":"Hidden Person","forward_date":1717000000,"text":"fwd"}}"#,
    );
    let forward = env.payload.forward.unwrap();
    assert_eq!(forward.origin.as_deref(), Some("Hidden Person"));
}

#[test]
fn album_photos_share_a_media_group() {
    let bodies = [1, 2].map(|i| {
        format!(
            r#"{{"update_id":{i},"message":{{"message_id":{i},"chat":{{"id":1}},
                "from":{{"id":1,"first_name":"A"}},"media_group_id":"13579",
                "photo":[{{"file_id":"p{i}","width":800,"height":600}}]}}}}"#
        )
    });
    for body in &bodies {
        let env = envelope(body);
        assert_eq!(env.kind, EnvelopeKind::Photo);
        assert_eq!(env.payload.media_group_id.as_deref(), Some("13579"));
    }
}

#[test]
fn envelope_serializes_with_lowercase_kind() {
    let env = envelope(
        r#"{"update_id":7,"message":{"message_id":7,"chat":{"id":1},"from":{"id":1,"first_name":"A"},
            "text":"/ask what now"}}"#,
    );
    let json = serde_json::to_string(&env).unwrap();
    assert!(json.contains(r#""kind":"command""#));
    assert!(json.contains(r#""update_id":7"#));
    // absent optional payload fields are omitted
    assert!(!json.contains(r#""caption""#));
}

#[test]
fn combined_message_round_trips_as_json() {
    let json = r#"{"id":"0190d7c2-8a4e-7cc0-9a1b-3f1c2d4e5f60","conversation_id":1,"sender_id":1,
        "update_ids":[1],"text":"hi","command":null,"envelopes":[],"images":[],"voice":[],
        "videos":[],"documents":[],"contacts":[],"polls":[],"media_group_ids":[],
        "link_pair":null,"reply":null,"overflow_count":2}"#;
    let unit: CombinedMessage = serde_json::from_str(json).unwrap();
    assert_eq!(unit.overflow_count, 2);
    assert_eq!(unit.update_ids, vec![UpdateId(1)]);
}

#[test]
fn malformed_body_converts_to_ingest_error() {
    let err: IngestError = normalize_body(br#"{"message":{}}"#).unwrap_err().into();
    assert_eq!(err.code(), "MALFORMED_ENVELOPE");

    let err = normalize_body(b"").unwrap_err();
    assert!(matches!(err, TelegramError::Malformed(_)));
}
