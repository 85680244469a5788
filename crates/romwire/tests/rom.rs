//! Remote objects end to end: a registry served by `RomServer`, driven by
//! typed proxies over `JsonRpcRomClient`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use romwire::prelude::*;
use romwire::transport::MemoryConnector;
use tokio::sync::mpsc;

// =========================================================================
// Server side
// =========================================================================

rom_struct! {
    pub struct Changed {
        pub value: i64,
    }
}

impl RomEvent for Changed {
    const TYPE: &'static str = "Changed";
}

struct Counter {
    value: Mutex<i64>,
}

impl RemoteClass for Counter {
    fn invoke(&self, operation: &str, params: &Props, cx: &ObjectContext) -> Result<Value, RomError> {
        match operation {
            "getValue" => Ok(self.value.lock().flatten()),
            "increment" => {
                let by: Option<i64> = cx.param(params, "by")?;
                let value = {
                    let mut value = self.value.lock();
                    *value += by.unwrap_or(1);
                    *value
                };
                cx.fire("Changed", &Changed { value });
                Ok(value.flatten())
            }
            "reset" => {
                *self.value.lock() = 0;
                Ok(Value::Null)
            }
            "fail" => Err(RomError::fault("counter jammed")),
            other => Err(cx.unknown_operation(other)),
        }
    }
}

fn counter(props: &Props, cx: &ObjectContext) -> Result<Counter, RomError> {
    let start: Option<i64> = cx.param(props, "start")?;
    Ok(Counter {
        value: Mutex::new(start.unwrap_or(0)),
    })
}

// =========================================================================
// Client side
// =========================================================================

remote_proxy! {
    pub struct CounterProxy: "Counter" {
        builder CounterBuilder {
            start: i64,
        }
        fn get_value() -> i64;
        fn increment(by: i64) -> i64;
        fn reset() -> ();
        fn fail() -> ();
        fn explode() -> ();
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn client_config() -> ClientConfig {
    ClientConfig {
        session: SessionConfig {
            reconnect_grace: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: None,
        },
        reconnect_delay: Duration::from_millis(20),
    }
}

/// Serves `Counter` over the in-memory transport.
fn start_server() -> (RemoteObjectRegistry, MemoryConnector) {
    let registry = RemoteObjectRegistry::new();
    registry.register_class("Counter", counter);
    let (listener, connector) = memory::listener();
    let server = RomServer::builder()
        .registry(registry.clone())
        .build_on(listener);
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (registry, connector)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold in time");
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_create_then_invoke_round_trips() {
    let (registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();

    let counter = CounterProxy::builder(&manager).start(5).build().await.unwrap();

    assert!(registry.contains(counter.reference()));
    assert_eq!(counter.get_value().await.unwrap(), 5);
    assert_eq!(counter.increment(3).await.unwrap(), 8);
    counter.reset().await.unwrap();
    assert_eq!(counter.get_value().await.unwrap(), 0);
}

#[tokio::test]
async fn test_create_without_params_uses_defaults() {
    let (_registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();

    let counter: CounterProxy = manager.create_as(Props::new()).await.unwrap();

    assert_eq!(counter.get_value().await.unwrap(), 0);
}

#[tokio::test]
async fn test_create_unknown_class_is_rejected() {
    let (_registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();

    let err = manager.create("Abacus", Props::new()).await.unwrap_err();

    assert!(matches!(err, RomError::UnknownClass { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_untyped_invoke_reads_wrapped_scalar() {
    let (_registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();
    let object = manager
        .builder("Counter")
        .with("start", 41)
        .build()
        .await
        .unwrap();

    let value: i64 = object
        .invoke("increment", Props::new().with("by", 1))
        .await
        .unwrap();

    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_errors_map_back_to_rom_errors() {
    let (_registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();
    let counter: CounterProxy = manager.create_as(Props::new()).await.unwrap();

    assert_eq!(counter.fail().await.unwrap_err(), RomError::fault("counter jammed"));
    assert_eq!(
        counter.explode().await.unwrap_err(),
        RomError::unknown_operation("Counter", "explode")
    );
}

#[tokio::test]
async fn test_release_removes_object_on_server() {
    let (registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();
    let counter: CounterProxy = manager.create_as(Props::new()).await.unwrap();
    let reference = counter.reference().to_string();

    counter.object().release_and_wait().await.unwrap();

    assert!(!registry.contains(&reference));
    let err = counter.get_value().await.unwrap_err();
    assert!(matches!(err, RomError::UnknownObject { .. }));
}

#[tokio::test]
async fn test_stale_reference_is_unknown_object() {
    let (_registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();

    let stale: CounterProxy = manager.proxy("no-such-object");
    let err = stale.get_value().await.unwrap_err();

    assert!(matches!(err, RomError::UnknownObject { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_listener_receives_events_over_session() {
    let (_registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();
    let counter: CounterProxy = manager.create_as(Props::new()).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    counter
        .object()
        .add_listener(move |event: Changed| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();
    counter.increment(2).await.unwrap();
    counter.increment(3).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert_eq!(first, Some(Changed { value: 2 }));
    assert_eq!(second, Some(Changed { value: 5 }));
}

#[tokio::test]
async fn test_removed_listener_stops_events() {
    let (registry, connector) = start_server();
    let (_client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();
    let counter: CounterProxy = manager.create_as(Props::new()).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let listener = counter
        .object()
        .on_event("Changed", move |props| sink.lock().push(props))
        .await
        .unwrap();
    assert_eq!(registry.subscription_count(), 1);

    counter.object().remove_listener(&listener).await.unwrap();
    counter.increment(1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(registry.subscription_count(), 0);
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_events_reach_only_subscribed_session() {
    let (_registry, connector) = start_server();
    let (_a, alice) = JsonRpcRomClient::connect(connector.clone(), client_config())
        .await
        .unwrap();
    let (_b, bob) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();

    let counter: CounterProxy = alice.create_as(Props::new()).await.unwrap();
    let shared: CounterProxy = bob.proxy(counter.reference());
    let (tx, mut rx) = mpsc::unbounded_channel();
    counter
        .object()
        .add_listener(move |event: Changed| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();

    // Bob drives the object; only Alice listens.
    assert_eq!(shared.increment(7).await.unwrap(), 7);

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert_eq!(event, Some(Changed { value: 7 }));
}

#[tokio::test]
async fn test_closed_session_drops_its_subscriptions() {
    let (registry, connector) = start_server();
    let (client, manager) = JsonRpcRomClient::connect(connector, client_config()).await.unwrap();
    let counter: CounterProxy = manager.create_as(Props::new()).await.unwrap();
    counter
        .object()
        .on_event("Changed", |_| {})
        .await
        .unwrap();
    assert_eq!(registry.subscription_count(), 1);

    client.close().await;

    eventually(|| registry.subscription_count() == 0).await;
    // Objects outlive the session that created them.
    assert!(registry.contains(counter.reference()));
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let server = RomServer::builder()
        .bind("127.0.0.1:0")
        .register_class("Counter", counter)
        .build()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let (client, manager) = JsonRpcRomClient::connect(
        WebSocketConnector::new(format!("ws://{addr}")),
        client_config(),
    )
    .await
    .unwrap();
    let counter = CounterProxy::builder(&manager).start(10).build().await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    counter
        .object()
        .add_listener(move |event: Changed| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();

    assert_eq!(counter.increment(5).await.unwrap(), 15);
    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert_eq!(event, Some(Changed { value: 15 }));

    client.close().await;
    assert!(client.is_closed());
}
