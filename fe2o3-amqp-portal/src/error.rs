//! Error types for the portal.

use fe2o3_amqp::link::{
    DetachError, DispositionError, ReceiverAttachError, RecvError, SendError, SenderAttachError,
};

/// An error that can occur when attaching an endpoint's links.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// An error occurred when attaching a sender link.
    #[error(transparent)]
    Sender(#[from] SenderAttachError),

    /// An error occurred when attaching a receiver link.
    #[error(transparent)]
    Receiver(#[from] ReceiverAttachError),
}

/// An error that can occur when opening an [`ApiConnection`].
///
/// [`ApiConnection`]: crate::ApiConnection
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// Opening the underlying AMQP connection failed.
    #[error(transparent)]
    Connection(#[from] fe2o3_amqp::connection::OpenError),

    /// Beginning the session failed.
    #[error(transparent)]
    Begin(#[from] fe2o3_amqp::session::BeginError),

    /// Attaching the anonymous sender or the reply receiver failed.
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// The transport accepted the dynamic reply receiver but did not
    /// assign it an address.
    #[error("Transport did not assign a dynamic reply address")]
    ReplyAddressNotAssigned,
}

/// An error that can occur when closing an [`ApiConnection`].
///
/// [`ApiConnection`]: crate::ApiConnection
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    /// Ending the session failed.
    #[error(transparent)]
    End(#[from] fe2o3_amqp::session::Error),

    /// Closing the connection failed.
    #[error(transparent)]
    Close(#[from] fe2o3_amqp::connection::Error),
}

/// Error type for portal operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The reply to a fetch did not arrive within the caller's timeout.
    /// The in-flight entry has been removed; a late reply is dropped.
    #[error("Request timed out")]
    RequestTimeout,

    /// The mutex operation did not complete within the caller's timeout.
    #[error("Timed out waiting for the mutex. Critical section did not run.")]
    MutexTimeout,

    /// The server refused the acquire request.
    #[error("Mutex error: ({status}) {description}")]
    Mutex {
        /// Status code from the server's reply.
        status: u16,
        /// Status description from the server's reply.
        description: String,
    },

    /// The server or the network released the acquisition while the
    /// critical section was outstanding.
    #[error("Mutex was dropped prematurely")]
    MutexDropped,

    /// A reply arrived without a usable `status` application property.
    #[error("Status code is not found")]
    StatusCodeNotFound,

    /// The connection was lost while the operation was in flight.
    #[error("Connection lost")]
    ConnectionLost,

    /// An endpoint of this kind already exists on the address.
    #[error("An endpoint already exists on address {address:?}")]
    DuplicateEndpoint {
        /// The normalised endpoint address.
        address: String,
    },

    /// Attaching the endpoint's links failed.
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// Error with sending the request.
    #[error(transparent)]
    Send(#[from] SendError),

    /// Error with receiving from the reply link.
    #[error(transparent)]
    Recv(#[from] RecvError),

    /// Error with settling a delivery.
    #[error(transparent)]
    Disposition(#[from] DispositionError),

    /// Error with detaching a link.
    #[error(transparent)]
    Detach(#[from] DetachError),
}

/// An error that can occur when building or sending a [`Response`].
///
/// [`Response`]: crate::Response
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// The response has already been sent; a `Response` is one-shot.
    #[error("Response has already been sent")]
    AlreadySent,

    /// The status has already been set on this response.
    #[error("Status has already been set")]
    StatusAlreadySet,

    /// The request did not carry a `reply_to` address.
    #[error("Request has no reply address")]
    NoReplyAddress,

    /// The connection's reply channel is gone.
    #[error("Endpoint is closed")]
    EndpointClosed,
}
