//! End-to-end scenarios against a containerised AMQP router.
//!
//! These tests need docker and the `quay.io/skupper/skupper-router`
//! image, so they are ignored by default:
//!
//! ```sh
//! cargo test --test portal -- --ignored
//! ```

mod common;

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use fe2o3_amqp_portal::{
    ApiConnection, CriticalSectionOptions, Error, FetchOptions, Operation,
};
use fe2o3_amqp_types::primitives::{OrderedMap, Value};

fn names_body() -> Value {
    let mut map = OrderedMap::new();
    map.insert(Value::from("item1"), Value::from("first"));
    map.insert(Value::from("item2"), Value::from("second"));
    Value::Map(map)
}

async fn open_pair(url: &str) -> (ApiConnection, ApiConnection) {
    let server = ApiConnection::open("portal-test-server", url).await.unwrap();
    let client = ApiConnection::open("portal-test-client", url).await.unwrap();
    (server, client)
}

#[tokio::test]
#[ignore = "requires docker and the skupper-router image"]
async fn get_round_trip() {
    let (_node, port) = common::setup_router().await;
    let url = format!("amqp://localhost:{}", port);
    let (mut server_connection, mut client_connection) = open_pair(&url).await;

    let server = server_connection.server_endpoint("/api").await.unwrap();
    server
        .get("/names", |_req, res| async move {
            let _ = res.send(names_body());
        })
        .get("/names/sub1/sub2", |_req, res| async move {
            let _ = res.send(Value::from("Sub2"));
        });

    let client = client_connection.client_endpoint("/api").await.unwrap();

    let result = client
        .fetch(
            "/names",
            FetchOptions {
                timeout: Duration::from_millis(1000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.status(), 200);
    assert_eq!(result.data(), Some(&names_body()));

    let nested = client.fetch("/names/sub1/sub2", FetchOptions::default()).await.unwrap();
    assert_eq!(nested.status(), 200);
    assert_eq!(nested.data(), Some(&Value::from("Sub2")));

    client_connection.close().await.unwrap();
    server_connection.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker and the skupper-router image"]
async fn unknown_path_is_a_404() {
    let (_node, port) = common::setup_router().await;
    let url = format!("amqp://localhost:{}", port);
    let (mut server_connection, mut client_connection) = open_pair(&url).await;

    let server = server_connection.server_endpoint("/api").await.unwrap();
    server.get("/names", |_req, res| async move {
        let _ = res.send(names_body());
    });

    let client = client_connection.client_endpoint("/api").await.unwrap();
    let result = client
        .fetch(
            "/names/sub1",
            FetchOptions {
                timeout: Duration::from_millis(2000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status(), 404);
    assert_eq!(result.data(), Some(&Value::from("No resource found at path")));

    client_connection.close().await.unwrap();
    server_connection.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker and the skupper-router image"]
async fn put_then_get_round_trips_state() {
    let (_node, port) = common::setup_router().await;
    let url = format!("amqp://localhost:{}", port);
    let (mut server_connection, mut client_connection) = open_pair(&url).await;

    let counter = Arc::new(Mutex::new(Value::from(0)));
    let server = server_connection.server_endpoint("/api").await.unwrap();
    {
        let counter = counter.clone();
        server.get("/variables/counter", move |_req, res| {
            let counter = counter.clone();
            async move {
                let value = counter.lock().unwrap().clone();
                let _ = res.send(value);
            }
        });
    }
    {
        let counter = counter.clone();
        server.put("/variables/counter", move |req, res| {
            let counter = counter.clone();
            async move {
                let value = req.value().cloned().unwrap_or(Value::Null);
                *counter.lock().unwrap() = value.clone();
                let _ = res.send(value);
            }
        });
    }

    let client = client_connection.client_endpoint("/api").await.unwrap();

    let initial = client.fetch("/variables/counter", FetchOptions::default()).await.unwrap();
    assert_eq!(initial.data(), Some(&Value::from(0)));

    let updated = client
        .fetch(
            "/variables/counter",
            FetchOptions {
                op: Operation::Put,
                body: Some(Value::from(42)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status(), 200);
    assert_eq!(updated.data(), Some(&Value::from(42)));

    let after = client.fetch("/variables/counter", FetchOptions::default()).await.unwrap();
    assert_eq!(after.data(), Some(&Value::from(42)));

    client_connection.close().await.unwrap();
    server_connection.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker and the skupper-router image"]
async fn unhandled_verb_is_a_400() {
    let (_node, port) = common::setup_router().await;
    let url = format!("amqp://localhost:{}", port);
    let (mut server_connection, mut client_connection) = open_pair(&url).await;

    let server = server_connection.server_endpoint("/api").await.unwrap();
    server.get("/names", |_req, res| async move {
        let _ = res.send(names_body());
    });

    let client = client_connection.client_endpoint("/api").await.unwrap();
    let result = client
        .fetch(
            "/names",
            FetchOptions {
                op: Operation::Put,
                timeout: Duration::from_millis(1000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.status(), 400);
    assert_eq!(result.status_description(), Some("Not Permitted"));

    client_connection.close().await.unwrap();
    server_connection.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker and the skupper-router image"]
async fn fetch_without_a_server_times_out() {
    let (_node, port) = common::setup_router().await;
    let url = format!("amqp://localhost:{}", port);

    let mut client_connection = ApiConnection::open("portal-test-client", &url).await.unwrap();
    let client = client_connection.client_endpoint("/api").await.unwrap();

    let result = client
        .fetch(
            "/names",
            FetchOptions {
                op: Operation::Put,
                timeout: Duration::from_millis(100),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(Error::RequestTimeout)));
    assert_eq!(client_connection.stats().in_flight_count, 0);

    client_connection.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires docker and the skupper-router image"]
async fn concurrent_critical_sections_are_exclusive() {
    const CLIENTS: usize = 250;

    let (_node, port) = common::setup_router().await;
    let url = format!("amqp://localhost:{}", port);
    let (mut server_connection, mut client_connection) = open_pair(&url).await;

    let counter = Arc::new(Mutex::new(0i32));
    let server = server_connection.server_endpoint("/api").await.unwrap();
    server.mutex_route("/locks");
    {
        let counter = counter.clone();
        server.get("/variables/counter", move |_req, res| {
            let counter = counter.clone();
            async move {
                let value = *counter.lock().unwrap();
                let _ = res.send(Value::from(value));
            }
        });
    }
    {
        let counter = counter.clone();
        server.put("/variables/counter", move |req, res| {
            let counter = counter.clone();
            async move {
                if let Some(Value::Int(value)) = req.value() {
                    *counter.lock().unwrap() = *value;
                }
                let _ = res.send(req.value().cloned().unwrap_or(Value::Null));
            }
        });
    }

    let client = client_connection.client_endpoint("/api").await.unwrap();

    let mut handles = Vec::with_capacity(CLIENTS);
    for _ in 0..CLIENTS {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .critical_section(
                    "/locks",
                    "counter",
                    |_acquisition_id| {
                        let client = client.clone();
                        async move {
                            let current = client
                                .fetch("/variables/counter", FetchOptions::default())
                                .await
                                .unwrap();
                            let value = match current.data() {
                                Some(Value::Int(value)) => *value,
                                _ => 0,
                            };
                            let next = value + 1;
                            client
                                .fetch(
                                    "/variables/counter",
                                    FetchOptions {
                                        op: Operation::Put,
                                        body: Some(Value::from(next)),
                                        ..Default::default()
                                    },
                                )
                                .await
                                .unwrap();
                            next
                        }
                    },
                    || {},
                    CriticalSectionOptions {
                        timeout: Some(Duration::from_secs(120)),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let value = handle.await.unwrap();
        assert!((1..=CLIENTS as i32).contains(&value));
        assert!(seen.insert(value), "safe_increment returned {value} twice");
    }

    let final_value = client.fetch("/variables/counter", FetchOptions::default()).await.unwrap();
    assert_eq!(final_value.data(), Some(&Value::from(CLIENTS as i32)));

    client_connection.close().await.unwrap();
    server_connection.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker and the skupper-router image"]
async fn queued_acquire_times_out_with_wait_time() {
    let (_node, port) = common::setup_router().await;
    let url = format!("amqp://localhost:{}", port);
    let (mut server_connection, mut client_connection) = open_pair(&url).await;

    let server = server_connection.server_endpoint("/api").await.unwrap();
    server.mutex_route("/locks");

    let client = client_connection.client_endpoint("/api").await.unwrap();

    let holder = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .critical_section(
                    "/locks",
                    "contended",
                    |_id| async move {
                        tokio::time::sleep(Duration::from_millis(1500)).await;
                    },
                    || {},
                    CriticalSectionOptions::default(),
                )
                .await
        })
    };
    // let the holder win the queue head
    tokio::time::sleep(Duration::from_millis(300)).await;

    let waiter = client
        .critical_section(
            "/locks",
            "contended",
            |_id| async move {},
            || {},
            CriticalSectionOptions {
                wait_time: Some(Duration::from_millis(200)),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(waiter, Err(Error::Mutex { status: 408, .. })));

    holder.await.unwrap().unwrap();
    client_connection.close().await.unwrap();
    server_connection.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker and the skupper-router image"]
async fn dropped_holder_is_cancelled() {
    let (_node, port) = common::setup_router().await;
    let url = format!("amqp://localhost:{}", port);
    let (mut server_connection, mut client_connection) = open_pair(&url).await;

    let server = server_connection.server_endpoint("/api").await.unwrap();
    server.mutex_route("/locks");

    let client = client_connection.client_endpoint("/api").await.unwrap();
    let cancelled = Arc::new(AtomicBool::new(false));

    {
        let server = server.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            server.drop_mutex_holder("/locks", "doomed");
        });
    }

    let result = client
        .critical_section(
            "/locks",
            "doomed",
            |_id| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
            },
            {
                let cancelled = cancelled.clone();
                move || cancelled.store(true, Ordering::SeqCst)
            },
            CriticalSectionOptions {
                timeout: Some(Duration::ZERO),
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(result, Err(Error::MutexDropped)));
    assert!(cancelled.load(Ordering::SeqCst));

    client_connection.close().await.unwrap();
    server_connection.close().await.unwrap();
}
