//! Extension trait reading the portal's application properties off AMQP
//! messages.

use fe2o3_amqp_types::{
    messaging::{Message, MessageId},
    primitives::SimpleValue,
};

use crate::{
    constants,
    status::{as_millis, StatusCode},
};

/// Typed accessors for the application properties and message properties
/// this protocol routes on.
pub trait AmqpMessagePortalExt {
    /// Get the raw `op` property.
    fn operation(&self) -> Option<&str>;

    /// Get the request path.
    fn path(&self) -> Option<&str>;

    /// Get the mutex name of an acquire request.
    fn mutex_name(&self) -> Option<&str>;

    /// Get the wait time of an acquire request in milliseconds.
    fn wait_time_millis(&self) -> Option<u64>;

    /// Get the diagnostic label of an acquire request.
    fn label(&self) -> Option<&str>;

    /// Get the status code of a response.
    fn status_code(&self) -> Option<StatusCode>;

    /// Get the status description of a response.
    fn status_description(&self) -> Option<&str>;

    /// Get the acquisition id of a successful acquire response.
    fn acquisition_id(&self) -> Option<&str>;

    /// Get the correlation id.
    fn correlation_id(&self) -> Option<&MessageId>;

    /// Get the reply address.
    fn reply_to(&self) -> Option<&str>;
}

fn as_str(value: &SimpleValue) -> Option<&str> {
    match value {
        SimpleValue::String(s) => Some(s.as_str()),
        _ => None,
    }
}

impl<T> AmqpMessagePortalExt for Message<T> {
    fn operation(&self) -> Option<&str> {
        self.application_properties
            .as_ref()
            .and_then(|ap| ap.get(constants::OP))
            .and_then(as_str)
    }

    fn path(&self) -> Option<&str> {
        self.application_properties
            .as_ref()
            .and_then(|ap| ap.get(constants::PATH))
            .and_then(as_str)
    }

    fn mutex_name(&self) -> Option<&str> {
        self.application_properties
            .as_ref()
            .and_then(|ap| ap.get(constants::MUTEX_NAME))
            .and_then(as_str)
    }

    fn wait_time_millis(&self) -> Option<u64> {
        self.application_properties
            .as_ref()
            .and_then(|ap| ap.get(constants::WAIT_TIME))
            .and_then(as_millis)
    }

    fn label(&self) -> Option<&str> {
        self.application_properties
            .as_ref()
            .and_then(|ap| ap.get(constants::LABEL))
            .and_then(as_str)
    }

    fn status_code(&self) -> Option<StatusCode> {
        self.application_properties
            .as_ref()
            .and_then(|ap| ap.get(constants::STATUS))
            .and_then(|value| StatusCode::try_from(value).ok())
    }

    fn status_description(&self) -> Option<&str> {
        self.application_properties
            .as_ref()
            .and_then(|ap| ap.get(constants::STATUS_DESCRIPTION))
            .and_then(as_str)
    }

    fn acquisition_id(&self) -> Option<&str> {
        self.application_properties
            .as_ref()
            .and_then(|ap| ap.get(constants::ACQUISITION_ID))
            .and_then(as_str)
    }

    fn correlation_id(&self) -> Option<&MessageId> {
        self.properties
            .as_ref()
            .and_then(|p| p.correlation_id.as_ref())
    }

    fn reply_to(&self) -> Option<&str> {
        self.properties.as_ref().and_then(|p| p.reply_to.as_deref())
    }
}
