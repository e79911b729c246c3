use super::*;
use chrono::Duration;
use serde_json::json;

fn sample(kind: MessageType, priority: MessagePriority) -> Message {
    Message::new(
        "msg_1_1700000000".to_string(),
        kind,
        "monitor",
        "optimizer",
        json!({"total_watts": 1250}),
        priority,
        None,
    )
}

#[test]
fn wire_shape_uses_camel_case_and_snake_case_types() {
    let msg = sample(MessageType::ConsumptionUpdate, MessagePriority::High);
    let wire = serde_json::to_value(&msg).unwrap();

    assert_eq!(wire["id"], "msg_1_1700000000");
    assert_eq!(wire["type"], "consumption_update");
    assert_eq!(wire["fromAgent"], "monitor");
    assert_eq!(wire["toAgent"], "optimizer");
    assert_eq!(wire["priority"], 2);
    assert_eq!(wire["retryCount"], 0);
    assert_eq!(wire["maxRetries"], 3);
    // Optional fields are omitted when absent
    assert!(wire.get("correlationId").is_none());
    assert!(wire.get("expiresAt").is_none());
    // Timestamp serializes as an ISO-8601 string
    assert!(wire["timestamp"].as_str().unwrap().contains('T'));
}

#[test]
fn wire_round_trip_preserves_fields() {
    let mut msg = sample(MessageType::DeviceControl, MessagePriority::Critical);
    msg.correlation_id = Some("req-42".to_string());
    msg.expires_at = Some(Utc::now() + Duration::minutes(5));

    let wire = serde_json::to_string(&msg).unwrap();
    let back: Message = serde_json::from_str(&wire).unwrap();

    assert_eq!(back.id, msg.id);
    assert_eq!(back.kind, MessageType::DeviceControl);
    assert_eq!(back.priority, MessagePriority::Critical);
    assert_eq!(back.correlation_id.as_deref(), Some("req-42"));
    assert_eq!(back.expires_at, msg.expires_at);
    assert_eq!(back.content, msg.content);
}

#[test]
fn priority_ordinals_match_wire_values() {
    assert_eq!(u8::from(MessagePriority::Critical), 1);
    assert_eq!(u8::from(MessagePriority::High), 2);
    assert_eq!(u8::from(MessagePriority::Medium), 3);
    assert_eq!(u8::from(MessagePriority::Low), 4);

    assert_eq!(MessagePriority::try_from(4).unwrap(), MessagePriority::Low);
    assert!(MessagePriority::try_from(0).is_err());
    assert!(MessagePriority::try_from(5).is_err());
}

#[test]
fn retry_fields_default_when_missing_from_wire() {
    let wire = json!({
        "id": "msg_9_1700000000",
        "type": "weather_update",
        "fromAgent": "weather",
        "toAgent": "broadcast",
        "timestamp": "2024-01-01T12:00:00Z",
        "priority": 3,
        "content": {"temp_c": 31.5}
    });

    let msg: Message = serde_json::from_value(wire).unwrap();
    assert_eq!(msg.retry_count, 0);
    assert_eq!(msg.max_retries, DEFAULT_MAX_RETRIES);
    assert!(msg.is_broadcast());
}

#[test]
fn expiry_check() {
    let now = Utc::now();
    let live = sample(MessageType::SystemStatus, MessagePriority::Low);
    assert!(!live.is_expired(now));

    let expired = sample(MessageType::SystemStatus, MessagePriority::Low)
        .with_expiry(now - Duration::seconds(1));
    assert!(expired.is_expired(now));

    let future = sample(MessageType::SystemStatus, MessagePriority::Low)
        .with_expiry(now + Duration::seconds(60));
    assert!(!future.is_expired(now));
}

#[test]
fn priority_sort_is_stable_within_equal_priority() {
    let mut batch = vec![
        sample(MessageType::ScheduleUpdate, MessagePriority::Low),
        sample(MessageType::DeviceControl, MessagePriority::Critical),
        sample(MessageType::CostAnalysis, MessagePriority::Medium),
        sample(MessageType::ManualOverride, MessagePriority::Critical),
    ];
    batch[0].id = "a".into();
    batch[1].id = "b".into();
    batch[2].id = "c".into();
    batch[3].id = "d".into();

    sort_by_priority(&mut batch);

    let order: Vec<&str> = batch.iter().map(|m| m.id.as_str()).collect();
    // Critical first, FIFO preserved among the two criticals
    assert_eq!(order, vec!["b", "d", "c", "a"]);
}
