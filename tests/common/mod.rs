#![allow(dead_code)]

use std::time::Duration;

use twinq::{Message, QueueService, QueueStats};

pub const TIMEOUT: Duration = Duration::from_millis(50_000);

/// Push three messages, then pull and delete each in turn.
pub fn fifo_push_pull_delete(service: &dyn QueueService, name: &str) {
    let queue = service.create_queue(name, TIMEOUT).expect("create");
    for body in ["a", "b", "c"] {
        service.push(&queue, body.as_bytes()).expect("push");
    }
    for body in ["a", "b", "c"] {
        let message = service.pull(&queue).expect("pull").expect("message");
        assert_eq!(message.body_str(), Some(body));
        assert!(service.delete(&queue, &message).expect("delete"));
    }
    assert!(service.pull(&queue).expect("pull").is_none());
}

pub fn pulled_message_stays_hidden_until_deleted(service: &dyn QueueService, name: &str) {
    let queue = service.create_queue(name, TIMEOUT).expect("create");
    service.push(&queue, b"message\nmessage").expect("push");

    let message = service.pull(&queue).expect("pull").expect("message");
    assert_eq!(message.body(), b"message\nmessage");
    assert!(message.receipt().is_some());
    assert!(service.pull(&queue).expect("pull").is_none());

    assert!(service.delete(&queue, &message).expect("delete"));
    assert!(!service.delete(&queue, &message).expect("second delete"));
    assert!(service.pull(&queue).expect("pull").is_none());
}

pub fn never_pulled_messages_cannot_be_deleted(service: &dyn QueueService, name: &str) {
    let queue = service.create_queue(name, TIMEOUT).expect("create");
    assert!(!service.delete(&queue, &Message::new("stray")).expect("delete"));

    service.push(&queue, b"pending").expect("push");
    assert!(!service.delete(&queue, &Message::new("pending")).expect("delete"));
    let stats = service.stats(&queue).expect("stats");
    assert_eq!((stats.unclaimed, stats.claimed), (1, 0));
}

pub fn zero_timeout_is_immediately_redelivered(service: &dyn QueueService, name: &str) {
    let queue = service.create_queue(name, Duration::ZERO).expect("create");
    service.push(&queue, b"x").expect("push");

    let first = service.pull(&queue).expect("pull").expect("message");
    let second = service.pull(&queue).expect("pull").expect("redelivery");
    assert_eq!(second.body(), b"x");
    assert_eq!(first.receipt(), second.receipt());

    assert!(service.delete(&queue, &second).expect("delete"));
    assert!(service.pull(&queue).expect("pull").is_none());
}

pub fn empty_queue_pulls_nothing(service: &dyn QueueService, name: &str) {
    let queue = service.create_queue(name, TIMEOUT).expect("create");
    assert!(service.pull(&queue).expect("pull").is_none());
    assert_eq!(service.stats(&queue).expect("stats"), QueueStats::default());
}
