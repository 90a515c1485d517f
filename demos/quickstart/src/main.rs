//! Serves a few routes and a mutex on one connection, then exercises
//! them from another.
//!
//! Needs an AMQP router (not a store-and-forward broker) listening on
//! localhost:5672, e.g.:
//!
//! ```sh
//! docker run --rm -p 5672:5672 quay.io/skupper/skupper-router
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fe2o3_amqp_portal::{
    ApiConnection, CriticalSectionOptions, FetchOptions, Operation,
};
use fe2o3_amqp_types::primitives::Value;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::var("PORTAL_URL").unwrap_or_else(|_| "amqp://localhost:5672".to_string());

    let mut server_connection = ApiConnection::open("quickstart-server", &url).await?;
    let server = server_connection.server_endpoint("/api").await?;

    let counter = Arc::new(Mutex::new(0i32));
    {
        let counter = counter.clone();
        server.get("/counter", move |_req, res| {
            let counter = counter.clone();
            async move {
                let value = *counter.lock().unwrap();
                let _ = res.send(Value::from(value));
            }
        });
    }
    {
        let counter = counter.clone();
        server.put("/counter", move |req, res| {
            let counter = counter.clone();
            async move {
                if let Some(Value::Int(value)) = req.value() {
                    *counter.lock().unwrap() = *value;
                }
                let _ = res.send(req.value().cloned().unwrap_or(Value::Null));
            }
        });
    }
    server.mutex_route("/locks");

    let mut client_connection = ApiConnection::open("quickstart-client", &url).await?;
    let client = client_connection.client_endpoint("/api").await?;

    let current = client.fetch("/counter", FetchOptions::default()).await?;
    println!("counter: {:?} (status {})", current.data(), current.status());

    let written = client
        .fetch(
            "/counter",
            FetchOptions {
                op: Operation::Put,
                body: Some(Value::from(41)),
                ..Default::default()
            },
        )
        .await?;
    println!("put -> {:?}", written.data());

    let next = client
        .critical_section(
            "/locks",
            "counter",
            |acquisition_id| {
                let client = client.clone();
                async move {
                    println!("holding acquisition {}", acquisition_id);
                    let current = client.fetch("/counter", FetchOptions::default()).await?;
                    let value = match current.data() {
                        Some(Value::Int(value)) => *value,
                        _ => 0,
                    };
                    client
                        .fetch(
                            "/counter",
                            FetchOptions {
                                op: Operation::Put,
                                body: Some(Value::from(value + 1)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    Ok::<_, fe2o3_amqp_portal::Error>(value + 1)
                }
            },
            || println!("lost the lock"),
            CriticalSectionOptions {
                timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        )
        .await??;
    println!("safe increment -> {}", next);

    println!("stats: {:?}", client_connection.stats());

    client_connection.close().await?;
    server_connection.close().await?;
    Ok(())
}
