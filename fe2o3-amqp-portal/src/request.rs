//! Request message assembly.

use std::time::Duration;

use fe2o3_amqp_types::{
    messaging::{AmqpValue, ApplicationProperties, Body, Message, MessageId, Properties},
    primitives::Value,
};

use crate::{constants, operation::Operation};

fn body_section(body: Option<Value>) -> Body<Value> {
    match body {
        Some(value) => Body::Value(AmqpValue(value)),
        None => Body::Empty,
    }
}

fn properties(id: &MessageId, reply_to: &str) -> Properties {
    Properties::builder()
        .message_id(id.clone())
        .correlation_id(id.clone())
        .reply_to(reply_to)
        .build()
}

/// Builds a `GET`/`PUT`/`POST`/`DELETE` request.
pub(crate) fn fetch(
    op: Operation,
    path: &str,
    body: Option<Value>,
    id: &MessageId,
    reply_to: &str,
) -> Message<Body<Value>> {
    let application_properties = ApplicationProperties::builder()
        .insert(constants::OP, op.as_str())
        .insert(constants::PATH, path)
        .build();

    Message::builder()
        .properties(properties(id, reply_to))
        .application_properties(application_properties)
        .body(body_section(body))
        .build()
}

/// Builds an `acquire` request.
pub(crate) fn acquire(
    path: &str,
    mutex_name: &str,
    wait_time: Option<Duration>,
    label: Option<&str>,
    body: Option<Value>,
    id: &MessageId,
    reply_to: &str,
) -> Message<Body<Value>> {
    let mut builder = ApplicationProperties::builder()
        .insert(constants::OP, constants::ACQUIRE)
        .insert(constants::PATH, path)
        .insert(constants::MUTEX_NAME, mutex_name);
    if let Some(wait_time) = wait_time {
        builder = builder.insert(constants::WAIT_TIME, wait_time.as_millis() as u64);
    }
    if let Some(label) = label {
        builder = builder.insert(constants::LABEL, label);
    }

    Message::builder()
        .properties(properties(id, reply_to))
        .application_properties(builder.build())
        .body(body_section(body))
        .build()
}
