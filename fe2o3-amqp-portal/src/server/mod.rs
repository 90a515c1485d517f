//! Server side of the portal: routing incoming requests to handlers and
//! running the mutex queues.
//!
//! A [`ServerEndpoint`] listens on two receivers, one per [`LinkClass`],
//! derived from its logical address. Incoming deliveries are received
//! with manual disposition; routed requests are accepted once they have
//! been dispatched, unroutable deliveries are rejected. Handlers run in
//! their own task so a slow handler never delays the next delivery — the
//! receiver's credit window is the back-pressure mechanism.
//!
//! [`LinkClass`]: crate::LinkClass

pub(crate) mod mutex;
pub(crate) mod response;
pub(crate) mod router;

use std::{future::Future, sync::Arc, time::Duration};

use fe2o3_amqp::{Delivery, Receiver};
use fe2o3_amqp_types::{
    messaging::{AmqpValue, Body, Message, MessageId},
    primitives::Value,
};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::{
    constants,
    ext::AmqpMessagePortalExt,
    operation::Operation,
};

use mutex::{AcquireRequest, MutexCtx, MutexEvent};
use response::{reply_message, OutboundReply, ReplySlot};
use router::{RouteHandler, Router};

pub use response::Response;

/// A routed request as seen by a handler.
#[derive(Debug, Clone)]
pub struct Request {
    message: Message<Body<Value>>,
    op: Operation,
    path: String,
}

impl Request {
    /// The request's operation.
    pub fn operation(&self) -> Operation {
        self.op
    }

    /// The request's path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The whole request message.
    pub fn message(&self) -> &Message<Body<Value>> {
        &self.message
    }

    /// The request body section.
    pub fn body(&self) -> &Body<Value> {
        &self.message.body
    }

    /// The request body if it is a single AMQP value.
    pub fn value(&self) -> Option<&Value> {
        match &self.message.body {
            Body::Value(AmqpValue(value)) => Some(value),
            _ => None,
        }
    }

    /// Consumes the request into its message.
    pub fn into_message(self) -> Message<Body<Value>> {
        self.message
    }
}

struct ServerEndpointInner {
    address: String,
    router: Arc<RwLock<Router>>,
    events_tx: mpsc::UnboundedSender<MutexEvent>,
}

/// Server side of one logical endpoint address.
///
/// Routes may be registered at any time, including while the endpoint is
/// serving. Registering the same path again never replaces anything:
/// handlers are appended to the path's per-verb list and run in
/// registration order.
#[derive(Clone)]
pub struct ServerEndpoint {
    inner: Arc<ServerEndpointInner>,
}

impl std::fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerEndpoint")
            .field("address", &self.inner.address)
            .finish()
    }
}

impl ServerEndpoint {
    pub(crate) fn spawn(
        address: String,
        fetch_receiver: Receiver,
        mutex_receiver: Receiver,
        reply_tx: mpsc::UnboundedSender<OutboundReply>,
    ) -> Self {
        let router = Arc::new(RwLock::new(Router::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_fetch_receiver(
            fetch_receiver,
            router.clone(),
            reply_tx.clone(),
            events_tx.clone(),
        ));
        tokio::spawn(run_mutex_receiver(
            mutex_receiver,
            events_rx,
            router.clone(),
            reply_tx,
            events_tx.clone(),
        ));

        Self {
            inner: Arc::new(ServerEndpointInner {
                address,
                router,
                events_tx,
            }),
        }
    }

    /// The normalised endpoint address.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Registers a handler for `op` at `path`.
    ///
    /// Every handler registered for the same path and operation is
    /// invoked in registration order with the same one-shot [`Response`];
    /// the first to finish it wins.
    pub fn route<F, Fut>(&self, op: Operation, path: &str, handler: F) -> &Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: RouteHandler = Arc::new(move |request, response| -> router::HandlerFuture {
            Box::pin(handler(request, response))
        });
        self.inner.router.write().at(path).add_handler(op, handler);
        self
    }

    /// Registers a GET handler at `path`.
    pub fn get<F, Fut>(&self, path: &str, handler: F) -> &Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.route(Operation::Get, path, handler)
    }

    /// Registers a PUT handler at `path`.
    pub fn put<F, Fut>(&self, path: &str, handler: F) -> &Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.route(Operation::Put, path, handler)
    }

    /// Registers a POST handler at `path`.
    pub fn post<F, Fut>(&self, path: &str, handler: F) -> &Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.route(Operation::Post, path, handler)
    }

    /// Registers a DELETE handler at `path`.
    pub fn delete<F, Fut>(&self, path: &str, handler: F) -> &Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.route(Operation::Delete, path, handler)
    }

    /// Registers `path` as a mutex route.
    ///
    /// Acquire requests only succeed against registered paths; the named
    /// mutex instances underneath are created lazily on first acquire.
    pub fn mutex_route(&self, path: &str) -> &Self {
        self.inner.router.write().at(path);
        self
    }

    /// Drops the current holder of a mutex and grants the next waiter.
    ///
    /// The dropped holder is notified with a 410 reply. This is a
    /// supervision facility; it is never issued by the protocol itself.
    pub fn drop_mutex_holder(&self, path: &str, name: &str) {
        let _ = self.inner.events_tx.send(MutexEvent::DropHead {
            path: path.to_string(),
            name: name.to_string(),
        });
    }
}

/// What the synchronous routing phase decided to do with a delivery.
enum Routed {
    /// Dispatched; accept the delivery.
    Done,
    /// No usable routing metadata and no reply address.
    Unroutable,
}

fn send_error_reply(
    reply_tx: &mpsc::UnboundedSender<OutboundReply>,
    reply_to: Option<&str>,
    correlation_id: Option<MessageId>,
    status: u16,
    description: &str,
) {
    if let Some(to) = reply_to {
        let message = reply_message(
            to,
            correlation_id,
            status,
            description,
            None,
            Body::Value(AmqpValue(Value::from(description))),
        );
        let _ = reply_tx.send(OutboundReply {
            message,
            settlement: None,
        });
    }
}

/// Routes one delivery. Synchronous: every lock taken here is released
/// before the caller settles the delivery.
fn route_delivery(
    delivery: &Delivery<Body<Value>>,
    router: &RwLock<Router>,
    reply_tx: &mpsc::UnboundedSender<OutboundReply>,
    events_tx: &mpsc::UnboundedSender<MutexEvent>,
) -> Routed {
    let message = delivery.message();
    let reply_to = message.reply_to().map(str::to_string);
    let correlation_id = message.correlation_id().cloned();

    let (op_raw, path) = match (message.operation(), message.path()) {
        (Some(op), Some(path)) => (op, path.to_string()),
        _ => {
            if reply_to.is_none() {
                return Routed::Unroutable;
            }
            send_error_reply(
                reply_tx,
                reply_to.as_deref(),
                correlation_id,
                constants::STATUS_NOT_PERMITTED,
                constants::DESCRIPTION_NOT_PERMITTED,
            );
            return Routed::Done;
        }
    };

    let Some(op) = Operation::parse(op_raw) else {
        send_error_reply(
            reply_tx,
            reply_to.as_deref(),
            correlation_id,
            constants::STATUS_NOT_PERMITTED,
            constants::DESCRIPTION_NOT_PERMITTED,
        );
        return Routed::Done;
    };

    let router = router.read();
    let Some(node) = router.lookup(&path) else {
        send_error_reply(
            reply_tx,
            reply_to.as_deref(),
            correlation_id,
            constants::STATUS_NOT_FOUND,
            constants::DESCRIPTION_NOT_FOUND,
        );
        return Routed::Done;
    };

    if op == Operation::Acquire {
        let Some(name) = message.mutex_name() else {
            send_error_reply(
                reply_tx,
                reply_to.as_deref(),
                correlation_id,
                constants::STATUS_NOT_PERMITTED,
                constants::DESCRIPTION_NOT_PERMITTED,
            );
            return Routed::Done;
        };
        let Some(reply_to) = reply_to else {
            // a grant could never reach the acquirer
            return Routed::Unroutable;
        };

        let request = AcquireRequest {
            correlation_id,
            reply_to,
            wait_time: message.wait_time_millis().map(Duration::from_millis),
            label: message.label().map(str::to_string),
        };
        let ctx = MutexCtx {
            path: &path,
            name,
            reply_tx,
            events_tx,
        };
        node.mutexes.lock().acquire(request, &ctx);
        return Routed::Done;
    }

    let handlers = node.handlers_for(op);
    if handlers.is_empty() {
        send_error_reply(
            reply_tx,
            reply_to.as_deref(),
            correlation_id,
            constants::STATUS_NOT_PERMITTED,
            constants::DESCRIPTION_NOT_PERMITTED,
        );
        return Routed::Done;
    }

    let request = Request {
        message: message.clone(),
        op,
        path,
    };
    let response = Response::new(ReplySlot {
        to: reply_to,
        correlation_id,
        reply_tx: reply_tx.clone(),
    });
    tokio::spawn(async move {
        for handler in handlers {
            handler(request.clone(), response.clone()).await;
        }
    });
    Routed::Done
}

async fn handle_delivery(
    receiver: &Receiver,
    delivery: &Delivery<Body<Value>>,
    router: &RwLock<Router>,
    reply_tx: &mpsc::UnboundedSender<OutboundReply>,
    events_tx: &mpsc::UnboundedSender<MutexEvent>,
) {
    match route_delivery(delivery, router, reply_tx, events_tx) {
        Routed::Done => {
            if let Err(_err) = receiver.accept(delivery).await {
                #[cfg(feature = "tracing")]
                tracing::error!("failed to accept delivery: {}", _err);
                #[cfg(feature = "log")]
                log::error!("failed to accept delivery: {}", _err);
            }
        }
        Routed::Unroutable => {
            #[cfg(feature = "tracing")]
            tracing::warn!("rejecting delivery without routing metadata");
            #[cfg(feature = "log")]
            log::warn!("rejecting delivery without routing metadata");
            if let Err(_err) = receiver.reject(delivery, None).await {
                #[cfg(feature = "tracing")]
                tracing::error!("failed to reject delivery: {}", _err);
                #[cfg(feature = "log")]
                log::error!("failed to reject delivery: {}", _err);
            }
        }
    }
}

async fn run_fetch_receiver(
    mut receiver: Receiver,
    router: Arc<RwLock<Router>>,
    reply_tx: mpsc::UnboundedSender<OutboundReply>,
    events_tx: mpsc::UnboundedSender<MutexEvent>,
) {
    loop {
        match receiver.recv::<Body<Value>>().await {
            Ok(delivery) => {
                handle_delivery(&receiver, &delivery, &router, &reply_tx, &events_tx).await;
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("fetch receiver stopped: {}", _err);
                #[cfg(feature = "log")]
                log::debug!("fetch receiver stopped: {}", _err);
                break;
            }
        }
    }
}

async fn run_mutex_receiver(
    mut receiver: Receiver,
    mut events_rx: mpsc::UnboundedReceiver<MutexEvent>,
    router: Arc<RwLock<Router>>,
    reply_tx: mpsc::UnboundedSender<OutboundReply>,
    events_tx: mpsc::UnboundedSender<MutexEvent>,
) {
    loop {
        tokio::select! {
            delivery = receiver.recv::<Body<Value>>() => match delivery {
                Ok(delivery) => {
                    handle_delivery(&receiver, &delivery, &router, &reply_tx, &events_tx).await;
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("mutex receiver stopped: {}", _err);
                    #[cfg(feature = "log")]
                    log::debug!("mutex receiver stopped: {}", _err);
                    break;
                }
            },
            event = events_rx.recv() => match event {
                Some(event) => apply_mutex_event(&router, &reply_tx, &events_tx, event),
                None => break,
            },
        }
    }
}

fn apply_mutex_event(
    router: &RwLock<Router>,
    reply_tx: &mpsc::UnboundedSender<OutboundReply>,
    events_tx: &mpsc::UnboundedSender<MutexEvent>,
    event: MutexEvent,
) {
    match event {
        MutexEvent::Released { path, name, seq } => {
            if let Some(node) = router.read().lookup(&path) {
                let ctx = MutexCtx {
                    path: &path,
                    name: &name,
                    reply_tx,
                    events_tx,
                };
                node.mutexes.lock().released(seq, &ctx);
            }
        }
        MutexEvent::WaitExpired { path, name, seq } => {
            if let Some(node) = router.read().lookup(&path) {
                let ctx = MutexCtx {
                    path: &path,
                    name: &name,
                    reply_tx,
                    events_tx,
                };
                node.mutexes.lock().wait_expired(seq, &ctx);
            }
        }
        MutexEvent::DropHead { path, name } => {
            if let Some(node) = router.read().lookup(&path) {
                let ctx = MutexCtx {
                    path: &path,
                    name: &name,
                    reply_tx,
                    events_tx,
                };
                node.mutexes.lock().drop_head(&ctx);
            }
        }
    }
}
