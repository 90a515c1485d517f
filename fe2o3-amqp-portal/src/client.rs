//! Client side of the portal: fetch calls and distributed critical
//! sections.

use std::{future::Future, sync::Arc, time::Duration};

use fe2o3_amqp::Sender;
use fe2o3_amqp_types::{
    messaging::{AmqpValue, Body, Message, MessageId},
    primitives::Value,
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    connection::{ConnectionCore, ReplyControl},
    correlation::Reply,
    error::Error,
    ext::AmqpMessagePortalExt,
    operation::{LinkClass, Operation},
    request,
    status::StatusCode,
    DEFAULT_REQUEST_TIMEOUT,
};

/// Options for [`ClientEndpoint::fetch`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// The operation to perform. Defaults to [`Operation::Get`].
    pub op: Operation,

    /// How long to wait for the reply. Defaults to
    /// [`DEFAULT_REQUEST_TIMEOUT`]; [`Duration::ZERO`] waits forever.
    pub timeout: Duration,

    /// Optional request body.
    pub body: Option<Value>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            op: Operation::Get,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            body: None,
        }
    }
}

/// Options for [`ClientEndpoint::critical_section`].
#[derive(Debug, Clone, Default)]
pub struct CriticalSectionOptions {
    /// Time limit for the whole operation, acquisition plus critical
    /// section. `None` defaults to [`DEFAULT_REQUEST_TIMEOUT`];
    /// [`Duration::ZERO`] waits forever.
    pub timeout: Option<Duration>,

    /// How long the server may keep the acquire queued behind another
    /// holder before failing it with a timeout reply.
    pub wait_time: Option<Duration>,

    /// Diagnostic label attached to the acquire request.
    pub label: Option<String>,

    /// Optional acquire request body.
    pub body: Option<Value>,
}

/// A completed fetch.
#[derive(Debug)]
pub struct FetchResult {
    status: StatusCode,
    message: Message<Body<Value>>,
}

impl FetchResult {
    fn from_message(message: Message<Body<Value>>) -> Result<Self, Error> {
        let status = message.status_code().ok_or(Error::StatusCodeNotFound)?;
        Ok(Self { status, message })
    }

    /// The reply's status code.
    pub fn status(&self) -> u16 {
        self.status.value()
    }

    /// The reply's status description, if any.
    pub fn status_description(&self) -> Option<&str> {
        self.message.status_description()
    }

    /// The reply body if it is a single AMQP value.
    pub fn data(&self) -> Option<&Value> {
        match &self.message.body {
            Body::Value(AmqpValue(value)) => Some(value),
            _ => None,
        }
    }

    /// Consumes the result into the reply body value.
    pub fn into_data(self) -> Option<Value> {
        match self.message.body {
            Body::Value(AmqpValue(value)) => Some(value),
            _ => None,
        }
    }

    /// The whole reply message.
    pub fn message(&self) -> &Message<Body<Value>> {
        &self.message
    }

    /// Consumes the result into the reply message.
    pub fn into_message(self) -> Message<Body<Value>> {
        self.message
    }
}

pub(crate) struct OutgoingRequest {
    pub(crate) id: MessageId,
    pub(crate) message: Message<Body<Value>>,
}

#[derive(Debug)]
struct ClientEndpointInner {
    address: String,
    core: Arc<ConnectionCore>,
    fetch_tx: mpsc::UnboundedSender<OutgoingRequest>,
    mutex_tx: mpsc::UnboundedSender<OutgoingRequest>,
}

/// Client side of one logical endpoint address.
///
/// Cheap to clone; all methods take `&self` and calls may run
/// concurrently. Fetch traffic and mutex traffic travel on separate
/// links with independent credit, so a credit-starved burst of fetches
/// cannot delay an acquire or a release.
#[derive(Debug, Clone)]
pub struct ClientEndpoint {
    inner: Arc<ClientEndpointInner>,
}

impl ClientEndpoint {
    pub(crate) fn spawn(
        address: String,
        core: Arc<ConnectionCore>,
        fetch_sender: Sender,
        mutex_sender: Sender,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (mutex_tx, mutex_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_request_sender(fetch_sender, fetch_rx, core.clone()));
        tokio::spawn(run_request_sender(mutex_sender, mutex_rx, core.clone()));

        Self {
            inner: Arc::new(ClientEndpointInner {
                address,
                core,
                fetch_tx,
                mutex_tx,
            }),
        }
    }

    /// The normalised endpoint address.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Issues a request against `path` and resolves with the reply.
    ///
    /// The result resolves for every reply the server sends, whatever
    /// its status code; [`Error::RequestTimeout`] is returned when no
    /// reply arrives in time, and a reply arriving after that is
    /// silently dropped.
    pub async fn fetch(&self, path: &str, options: FetchOptions) -> Result<FetchResult, Error> {
        let FetchOptions { op, timeout, body } = options;
        let core = &self.inner.core;

        let (id, rx) = core.correlator.register(LinkClass::Fetch);
        let message = request::fetch(op, path, body, &id, core.reply_address());
        if self
            .inner
            .fetch_tx
            .send(OutgoingRequest {
                id: id.clone(),
                message,
            })
            .is_err()
        {
            core.correlator.cancel(&id);
            return Err(Error::ConnectionLost);
        }

        match await_reply(rx, timeout).await {
            Ok(reply) => match reply? {
                Reply::Message(message) | Reply::Grant { message, .. } => {
                    FetchResult::from_message(*message)
                }
            },
            Err(Elapsed) => {
                core.correlator.cancel(&id);
                Err(Error::RequestTimeout)
            }
        }
    }

    /// Acquires the named mutex at `path`, runs `inner` while holding
    /// it, releases, and resolves with `inner`'s result.
    ///
    /// `inner` receives the server-generated acquisition id. If the
    /// server or the network releases the acquisition while `inner` is
    /// still running, `inner` is aborted, `on_cancel` runs, and the call
    /// fails with [`Error::MutexDropped`]. The timeout in `options`
    /// covers the whole operation; the lock is released on every exit
    /// path.
    pub async fn critical_section<F, Fut, R>(
        &self,
        path: &str,
        mutex_name: &str,
        inner: F,
        on_cancel: impl FnOnce() + Send,
        options: CriticalSectionOptions,
    ) -> Result<R, Error>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = R> + Send,
    {
        let CriticalSectionOptions {
            timeout,
            wait_time,
            label,
            body,
        } = options;
        let timeout = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let core = &self.inner.core;

        let (id, rx) = core.correlator.register(LinkClass::Mutex);
        let message = request::acquire(
            path,
            mutex_name,
            wait_time,
            label.as_deref(),
            body,
            &id,
            core.reply_address(),
        );
        if self
            .inner
            .mutex_tx
            .send(OutgoingRequest {
                id: id.clone(),
                message,
            })
            .is_err()
        {
            core.correlator.cancel(&id);
            return Err(Error::ConnectionLost);
        }

        let started = tokio::time::Instant::now();
        let reply = match await_reply(rx, timeout).await {
            Ok(reply) => reply?,
            Err(Elapsed) => {
                core.correlator.cancel(&id);
                return Err(Error::MutexTimeout);
            }
        };

        let (message, mut dropped) = match reply {
            Reply::Grant { message, dropped } => (message, dropped),
            Reply::Message(message) => {
                let status = message
                    .status_code()
                    .ok_or(Error::StatusCodeNotFound)?
                    .value();
                let description = message.status_description().unwrap_or("").to_string();
                return Err(Error::Mutex {
                    status,
                    description,
                });
            }
        };

        // settles the parked grant delivery on every exit path below
        let release = ReleaseGuard {
            ctrl: core.reply_ctrl(),
            id,
        };

        let acquisition_id = message.acquisition_id().unwrap_or_default().to_string();
        let remaining = (!timeout.is_zero()).then(|| timeout.saturating_sub(started.elapsed()));

        let inner_fut = inner(acquisition_id);
        tokio::pin!(inner_fut);
        let expiry = async move {
            match remaining {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        tokio::select! {
            result = &mut inner_fut => {
                drop(release);
                Ok(result)
            }
            _ = &mut dropped => {
                drop(release);
                on_cancel();
                Err(Error::MutexDropped)
            }
            _ = &mut expiry => {
                drop(release);
                Err(Error::MutexTimeout)
            }
        }
    }
}

/// Marker for an elapsed caller timeout.
struct Elapsed;

async fn await_reply(
    rx: oneshot::Receiver<Result<Reply, Error>>,
    timeout: Duration,
) -> Result<Result<Reply, Error>, Elapsed> {
    let received = if timeout.is_zero() {
        Ok(rx.await)
    } else {
        tokio::time::timeout(timeout, rx).await
    };
    match received {
        Ok(Ok(reply)) => Ok(reply),
        // the completion was dropped without a value; the connection's
        // reply machinery is gone
        Ok(Err(_)) => Ok(Err(Error::ConnectionLost)),
        Err(_) => Err(Elapsed),
    }
}

struct ReleaseGuard {
    ctrl: mpsc::UnboundedSender<ReplyControl>,
    id: MessageId,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let _ = self.ctrl.send(ReplyControl::Release(self.id.clone()));
    }
}

async fn run_request_sender(
    mut sender: Sender,
    mut rx: mpsc::UnboundedReceiver<OutgoingRequest>,
    core: Arc<ConnectionCore>,
) {
    while let Some(request) = rx.recv().await {
        // send_batchable suspends until link credit allows the transfer,
        // so enqueue order is wire order for this class
        match sender.send_batchable(request.message).await {
            Ok(_delivery_fut) => {}
            Err(err) => {
                core.correlator.fail(&request.id, Error::Send(err));
            }
        }
    }
    let _ = sender.close().await;
}
