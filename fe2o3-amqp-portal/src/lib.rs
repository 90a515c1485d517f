#![deny(missing_docs, missing_debug_implementations)]

//! A REST-like request/response portal and a distributed mutex protocol
//! layered on the `fe2o3-amqp` AMQP 1.0 client.
//!
//! The crate talks to an AMQP 1.0 intermediary through two abstractions
//! that share one connection:
//!
//! - [`ClientEndpoint`] issues `GET`/`PUT`/`POST`/`DELETE` style requests
//!   ([`ClientEndpoint::fetch`]) and runs distributed critical sections
//!   ([`ClientEndpoint::critical_section`]) against a logical server
//!   address. Replies are correlated back to the awaiting caller through a
//!   connection-wide correlation table and a dynamic reply address.
//! - [`ServerEndpoint`] receives requests on the same logical address,
//!   routes them by slash-separated path to registered handlers, and sends
//!   responses through an anonymous sender.
//!
//! Each endpoint address is carried on two independent links (one per
//! [`LinkClass`]), so a burst of fetch traffic cannot starve mutex
//! acquisition and release of link credit.
//!
//! # Mutex protocol
//!
//! Holding a named lock is represented by the unsettled state of a single
//! delivery: the server grants a lock by sending the `200` acquire reply
//! unsettled, and the client releases the lock by settling that delivery.
//! Link or connection loss settles outstanding deliveries and therefore
//! releases whatever the lost peer held. This requires an intermediary
//! that propagates dispositions end to end (an AMQP router such as
//! skupper-router); a store-and-forward broker settles per hop and cannot
//! carry lock tenure.
//!
//! # Quick start
//!
//! ```rust,ignore
//! let mut connection = ApiConnection::open("portal-1", "amqp://localhost:5672").await?;
//!
//! let server = connection.server_endpoint("/api").await?;
//! server.get("/names", |_req, res| async move {
//!     let _ = res.send(Value::from("first"));
//! });
//! server.mutex_route("/locks");
//!
//! let client = connection.client_endpoint("/api").await?;
//! let result = client.fetch("/names", FetchOptions::default()).await?;
//! assert_eq!(result.status(), 200);
//!
//! let value = client
//!     .critical_section("/locks", "counter", |acquisition_id| async move {
//!         // exclusive while this future runs
//!         acquisition_id
//!     }, || {}, CriticalSectionOptions::default())
//!     .await?;
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod operation;
pub mod server;
pub mod status;

pub mod constants;
pub mod ext;

pub(crate) mod correlation;
pub(crate) mod request;

use std::time::Duration;

/// Default timeout applied to [`ClientEndpoint::fetch`] and
/// [`ClientEndpoint::critical_section`] when the caller does not override
/// it.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

pub use client::{ClientEndpoint, CriticalSectionOptions, FetchOptions, FetchResult};
pub use connection::{ApiConnection, ApiStats};
pub use error::Error;
pub use operation::{LinkClass, Operation};
pub use server::{Request, Response, ServerEndpoint};
