#![allow(clippy::unwrap_used, clippy::expect_used)]

use chatwire_core::*;

// ---------------------------------------------------------------------------
// 1. Turn serialization roundtrip keeps parts and their order
// ---------------------------------------------------------------------------

#[test]
fn turn_serialization_roundtrip() {
    let mut turn = ConversationTurn::assistant_placeholder();
    turn.state = StreamingState::Complete;
    turn.parts = vec![
        MessagePart::Reasoning {
            content: "the user wants a price".to_string(),
        },
        MessagePart::text("It costs $12."),
        MessagePart::ToolInvocation(ToolInvocation {
            key: "call_9".to_string(),
            name: "price_lookup".to_string(),
            input: Some(serde_json::json!({"sku": "A-1"})),
            output: Some(serde_json::json!({"price": 12})),
            error_text: None,
            state: ToolState::OutputAvailable,
        }),
        MessagePart::SourceDocuments {
            documents: vec![serde_json::json!({"pageContent": "catalog"})],
        },
    ];

    let json = serde_json::to_string(&turn).unwrap();
    let back: ConversationTurn = serde_json::from_str(&json).unwrap();

    assert_eq!(back, turn);
    assert_eq!(back.text(), "It costs $12.");
    assert_eq!(back.reasoning(), "the user wants a price");
    assert_eq!(
        back.tool_invocation("call_9").unwrap().state,
        ToolState::OutputAvailable
    );
    assert_eq!(back.source_documents().unwrap().len(), 1);
    assert!(back.used_tools().is_none());
}

// ---------------------------------------------------------------------------
// 2. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    assert_eq!(
        ChatError::Http("connection refused".to_string()).to_string(),
        "HTTP error: connection refused"
    );
    assert_eq!(ChatError::Unauthenticated.to_string(), "unauthenticated");
    assert_eq!(
        ChatError::Config("missing chatflow_id".to_string()).to_string(),
        "Config error: missing chatflow_id"
    );
    assert_eq!(
        ChatError::Protocol("empty body".to_string()).to_string(),
        "Protocol error: empty body"
    );

    let serde_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
    let err: ChatError = serde_err.into();
    assert!(err.to_string().starts_with("JSON error:"));

    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let err: ChatError = io_err.into();
    assert!(err.to_string().starts_with("IO error:"));
}

// ---------------------------------------------------------------------------
// 3. LastError serialization for presentation layers
// ---------------------------------------------------------------------------

#[test]
fn last_error_serialization() {
    let json = serde_json::to_value(LastError::Unauthenticated).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "unauthenticated"}));

    let json = serde_json::to_value(LastError::Message("rate limited".to_string())).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"kind": "message", "message": "rate limited"})
    );
}

// ---------------------------------------------------------------------------
// 4. Role and state serialization
// ---------------------------------------------------------------------------

#[test]
fn role_and_state_serialization() {
    assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    assert_eq!(
        serde_json::to_string(&Role::Assistant).unwrap(),
        "\"assistant\""
    );
    assert_eq!(
        serde_json::to_string(&StreamingState::Streaming).unwrap(),
        "\"streaming\""
    );
    let state: ToolState = serde_json::from_str("\"errored\"").unwrap();
    assert_eq!(state, ToolState::Errored);
}

// ---------------------------------------------------------------------------
// 5. Each turn gets a unique id
// ---------------------------------------------------------------------------

#[test]
fn turn_ids_are_unique() {
    let a = ConversationTurn::user("a", vec![]);
    let b = ConversationTurn::user("b", vec![]);
    assert_ne!(a.id, b.id);

    let empty = ConversationTurn::user("", vec![]);
    assert!(empty.is_empty());
}
