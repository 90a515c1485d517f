//! One-shot response builder and reply message assembly.

use std::sync::Arc;

use fe2o3_amqp_types::{
    messaging::{AmqpValue, ApplicationProperties, Body, Message, MessageId, Properties},
    primitives::Value,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::mutex::MutexEvent;
use crate::{constants, error::ResponseError};

/// A reply on its way to the connection's anonymous sender.
pub(crate) struct OutboundReply {
    pub(crate) message: Message<Body<Value>>,
    /// Present on mutex grants: the reply is sent unsettled and the
    /// event fires once the delivery settles (the holder released) or
    /// the send fails outright.
    pub(crate) settlement: Option<SettlementWatch>,
}

/// Turns the settlement of an unsettled reply delivery into a mutex
/// event.
pub(crate) struct SettlementWatch {
    pub(crate) tx: mpsc::UnboundedSender<MutexEvent>,
    pub(crate) event: MutexEvent,
}

/// Assembles a response message addressed back to a request's reply
/// address.
pub(crate) fn reply_message(
    to: &str,
    correlation_id: Option<MessageId>,
    status: u16,
    description: &str,
    acquisition_id: Option<&str>,
    body: Body<Value>,
) -> Message<Body<Value>> {
    let mut properties = Properties::default();
    properties.to = Some(to.to_string());
    properties.correlation_id = correlation_id;

    let mut builder = ApplicationProperties::builder()
        .insert(constants::STATUS, status)
        .insert(constants::STATUS_DESCRIPTION, description);
    if let Some(acquisition_id) = acquisition_id {
        builder = builder.insert(constants::ACQUISITION_ID, acquisition_id);
    }

    Message::builder()
        .properties(properties)
        .application_properties(builder.build())
        .body(body)
        .build()
}

#[derive(Debug)]
struct ResponseState {
    slot: Option<ReplySlot>,
    status: Option<u16>,
    description: Option<String>,
}

/// Where a response is sent once finished.
#[derive(Debug)]
pub(crate) struct ReplySlot {
    pub(crate) to: Option<String>,
    pub(crate) correlation_id: Option<MessageId>,
    pub(crate) reply_tx: mpsc::UnboundedSender<OutboundReply>,
}

/// A one-shot response to a routed request.
///
/// A handler finishes the response with [`send`](Response::send) or
/// [`end`](Response::end) exactly once; any later use fails with
/// [`ResponseError::AlreadySent`]. When several handlers are registered
/// on one route they share the same response, and the first to finish it
/// wins.
#[derive(Debug, Clone)]
pub struct Response {
    state: Arc<Mutex<ResponseState>>,
}

impl Response {
    pub(crate) fn new(slot: ReplySlot) -> Self {
        Self {
            state: Arc::new(Mutex::new(ResponseState {
                slot: Some(slot),
                status: None,
                description: None,
            })),
        }
    }

    /// Sets the status code. Defaults to 200 when never called.
    ///
    /// Fails if the response has been sent or the status has already
    /// been set.
    pub fn status(&self, code: u16) -> Result<&Self, ResponseError> {
        let mut state = self.state.lock();
        if state.slot.is_none() {
            return Err(ResponseError::AlreadySent);
        }
        if state.status.is_some() {
            return Err(ResponseError::StatusAlreadySet);
        }
        state.status = Some(code);
        Ok(self)
    }

    /// Overrides the status description. Defaults to the canonical
    /// description of the status code.
    pub fn status_description(&self, description: impl Into<String>) -> Result<&Self, ResponseError> {
        let mut state = self.state.lock();
        if state.slot.is_none() {
            return Err(ResponseError::AlreadySent);
        }
        state.description = Some(description.into());
        Ok(self)
    }

    /// Emits the reply with a body.
    pub fn send(&self, body: impl Into<Value>) -> Result<(), ResponseError> {
        self.finish(Body::Value(AmqpValue(body.into())))
    }

    /// Emits the reply without a body.
    pub fn end(&self) -> Result<(), ResponseError> {
        self.finish(Body::Empty)
    }

    fn finish(&self, body: Body<Value>) -> Result<(), ResponseError> {
        let mut state = self.state.lock();
        let slot = state.slot.take().ok_or(ResponseError::AlreadySent)?;
        let to = slot.to.ok_or(ResponseError::NoReplyAddress)?;

        let status = state.status.unwrap_or(constants::STATUS_OK);
        let description = state
            .description
            .take()
            .unwrap_or_else(|| constants::default_description(status).to_string());

        let message = reply_message(&to, slot.correlation_id, status, &description, None, body);
        slot.reply_tx
            .send(OutboundReply {
                message,
                settlement: None,
            })
            .map_err(|_| ResponseError::EndpointClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::AmqpMessagePortalExt;

    fn response() -> (Response, mpsc::UnboundedReceiver<OutboundReply>) {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let slot = ReplySlot {
            to: Some("/replies/abc".to_string()),
            correlation_id: Some(MessageId::from(3u64)),
            reply_tx,
        };
        (Response::new(slot), reply_rx)
    }

    #[test]
    fn send_emits_one_reply() {
        let (res, mut rx) = response();
        res.status(200).unwrap().send(Value::from("hello")).unwrap();

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.message.status_code().map(|c| c.value()), Some(200));
        assert_eq!(reply.message.status_description(), Some("OK"));
        assert_eq!(
            reply.message.properties.as_ref().and_then(|p| p.to.as_deref()),
            Some("/replies/abc")
        );
        assert_eq!(
            reply.message.correlation_id(),
            Some(&MessageId::from(3u64))
        );
        assert!(reply.settlement.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn second_use_fails() {
        let (res, mut rx) = response();
        res.end().unwrap();

        assert!(matches!(res.end(), Err(ResponseError::AlreadySent)));
        assert!(matches!(
            res.send(Value::from(1)),
            Err(ResponseError::AlreadySent)
        ));
        assert!(matches!(res.status(500), Err(ResponseError::AlreadySent)));
        let _ = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn status_can_only_be_set_once() {
        let (res, _rx) = response();
        res.status(404).unwrap();
        assert!(matches!(
            res.status(200),
            Err(ResponseError::StatusAlreadySet)
        ));
    }

    #[test]
    fn clones_share_the_single_shot() {
        let (res, mut rx) = response();
        let sibling = res.clone();
        res.end().unwrap();

        assert!(matches!(sibling.end(), Err(ResponseError::AlreadySent)));
        let _ = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn default_description_follows_status() {
        let (res, mut rx) = response();
        res.status(404).unwrap().send(Value::from("No resource found at path")).unwrap();

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.message.status_code().map(|c| c.value()), Some(404));
        assert_eq!(
            reply.message.status_description(),
            Some("No resource found at path")
        );
    }

    #[test]
    fn missing_reply_address_is_an_error() {
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let res = Response::new(ReplySlot {
            to: None,
            correlation_id: None,
            reply_tx,
        });
        assert!(matches!(res.end(), Err(ResponseError::NoReplyAddress)));
    }
}
