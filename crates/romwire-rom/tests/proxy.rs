//! Client proxies driven against an in-process registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use romwire_rom::{
    EventHandler, Flatten, LocalRomClient, ObjectContext, Props, RemoteClass,
    RemoteObjectRegistry, RemoteProxy, RomClient, RomError, RomEvent, RomManager, ServerObject,
    Unflatten, Value, remote_proxy, rom_enum, rom_struct,
};
use serde_json::json;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

rom_enum! {
    pub enum Codec { VP8, H264 }
}

rom_struct! {
    pub struct Stats {
        pub packets: i64,
        pub codec: Codec,
        pub ratio: f64,
    }
}

rom_struct! {
    pub struct Changed {
        pub att3: f32,
    }
}

impl RomEvent for Changed {
    const TYPE: &'static str = "Changed";
}

struct WebRtc {
    att3: Mutex<f32>,
    codec: Codec,
    calls: AtomicU32,
}

impl RemoteClass for WebRtc {
    fn invoke(&self, operation: &str, params: &Props, cx: &ObjectContext) -> Result<Value, RomError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match operation {
            "getAtt3" => Ok(self.att3.lock().flatten()),
            "setAtt3" => {
                let value: f32 = cx.param(params, "value")?;
                *self.att3.lock() = value;
                cx.fire("Changed", &Changed { att3: value });
                Ok(Value::Null)
            }
            "getCodec" => Ok(self.codec.flatten()),
            "getStats" => Ok(Stats {
                packets: 42,
                codec: self.codec,
                ratio: 0.25,
            }
            .flatten()),
            "getTags" => Ok(vec!["a".to_string(), "b".to_string()].flatten()),
            "connect" => {
                let peer: ServerObject = cx.param(params, "sink")?;
                Ok(peer.reference().flatten())
            }
            "spawnPeer" => {
                let reference = cx.registry().create("WebRtc", &Props::new())?;
                Ok(reference.flatten())
            }
            "getMaybe" => {
                let present: bool = cx.param(params, "present")?;
                Ok(present.then_some(7_i32).flatten())
            }
            "getBig" => Ok(u64::MAX.flatten()),
            "fail" => Err(RomError::fault("requested failure")),
            other => Err(cx.unknown_operation(other)),
        }
    }
}

fn registry() -> RemoteObjectRegistry {
    let registry = RemoteObjectRegistry::new();
    registry.register_class("WebRtc", |props, cx| {
        let att3: Option<f32> = cx.param(props, "att3")?;
        let codec: Option<Codec> = cx.param(props, "codec")?;
        Ok(WebRtc {
            att3: Mutex::new(att3.unwrap_or(1.0)),
            codec: codec.unwrap_or(Codec::VP8),
            calls: AtomicU32::new(0),
        })
    });
    registry
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

remote_proxy! {
    pub struct WebRtcProxy: "WebRtc" {
        builder WebRtcBuilder {
            att3: f32,
            codec: Codec,
        }
        flags {
            use_data_channels / no_data_channels,
        }
        fn get_att3() -> f32;
        fn set_att3(value: f32) -> ();
        fn get_codec() -> Codec;
        fn get_stats() -> Stats;
        fn get_tags() -> Vec<String>;
        fn connect(sink: WebRtcProxy) -> String;
        fn spawn_peer() -> WebRtcProxy;
        fn get_maybe(present: bool) -> Option<i32>;
        fn get_big() -> u64;
        fn fail() -> ();
        fn explode() -> ();
    }
}

/// Records every primitive call with its wire params, then forwards it.
struct RecordingClient {
    inner: LocalRomClient,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingClient {
    fn new(registry: RemoteObjectRegistry) -> Self {
        Self {
            inner: LocalRomClient::new(registry),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, method: &str, params: Value) {
        self.calls.lock().push((method.to_string(), params));
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

impl RomClient for RecordingClient {
    fn create(&self, class_name: &str, constructor_params: Props) -> BoxFuture<'_, Result<String, RomError>> {
        self.record(
            "create",
            json!({"type": class_name, "constructorParams": constructor_params}),
        );
        self.inner.create(class_name, constructor_params)
    }

    fn invoke(
        &self,
        reference: &str,
        operation: &str,
        operation_params: Props,
    ) -> BoxFuture<'_, Result<Value, RomError>> {
        self.record(
            "invoke",
            json!({"object": reference, "operation": operation, "operationParams": operation_params}),
        );
        self.inner.invoke(reference, operation, operation_params)
    }

    fn release(&self, reference: &str) -> BoxFuture<'_, Result<(), RomError>> {
        self.record("release", json!({"object": reference}));
        self.inner.release(reference)
    }

    fn subscribe(&self, reference: &str, event_type: &str) -> BoxFuture<'_, Result<String, RomError>> {
        self.record("subscribe", json!({"object": reference, "type": event_type}));
        self.inner.subscribe(reference, event_type)
    }

    fn unsubscribe(&self, reference: &str, subscription: &str) -> BoxFuture<'_, Result<(), RomError>> {
        self.record(
            "unsubscribe",
            json!({"object": reference, "subscription": subscription}),
        );
        self.inner.unsubscribe(reference, subscription)
    }

    fn set_event_handler(&self, handler: EventHandler) {
        self.inner.set_event_handler(handler);
    }
}

fn setup() -> (RemoteObjectRegistry, Arc<RecordingClient>, RomManager) {
    let registry = registry();
    let client = Arc::new(RecordingClient::new(registry.clone()));
    let manager = RomManager::new(client.clone());
    (registry, client, manager)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_builder_then_getter_emits_create_and_invoke() {
    let (_registry, client, manager) = setup();

    let proxy = WebRtcProxy::builder(&manager).att3(0.5).build().await.unwrap();
    let att3 = proxy.get_att3().await.unwrap();

    assert_eq!(att3, 0.5);
    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        (
            "create".to_string(),
            json!({"type": "WebRtc", "constructorParams": {"att3": 0.5}})
        )
    );
    assert_eq!(calls[1].0, "invoke");
    assert_eq!(calls[1].1["object"], proxy.reference());
    assert_eq!(calls[1].1["operation"], "getAtt3");
}

#[tokio::test]
async fn test_untyped_builder_flags_accumulate_params() {
    let (_registry, client, manager) = setup();

    let object = manager
        .builder("WebRtc")
        .with("att3", 2.0)
        .flag("useDataChannels")
        .not("recording")
        .build()
        .await
        .unwrap();

    assert_eq!(object.class_name(), "WebRtc");
    assert_eq!(
        client.calls()[0].1["constructorParams"],
        json!({"att3": 2.0, "useDataChannels": true, "recording": false})
    );
}

#[tokio::test]
async fn test_results_unflatten_for_each_type() {
    let (_registry, _client, manager) = setup();
    let proxy = WebRtcProxy::builder(&manager)
        .codec(Codec::H264)
        .build()
        .await
        .unwrap();

    assert_eq!(proxy.get_codec().await.unwrap(), Codec::H264);
    assert_eq!(
        proxy.get_stats().await.unwrap(),
        Stats {
            packets: 42,
            codec: Codec::H264,
            ratio: 0.25
        }
    );
    assert_eq!(proxy.get_tags().await.unwrap(), vec!["a", "b"]);
    proxy.set_att3(3.5).await.unwrap();
    assert_eq!(proxy.get_att3().await.unwrap(), 3.5);
}

#[tokio::test]
async fn test_proxy_params_flatten_to_references() {
    let (_registry, _client, manager) = setup();
    let a: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();
    let b: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();

    let seen = a.connect(b.clone()).await.unwrap();
    assert_eq!(seen, b.reference());
}

#[tokio::test]
async fn test_unknown_reference_in_result_is_bound_lazily() {
    let (registry, _client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();
    assert_eq!(manager.len(), 1);

    let peer = proxy.spawn_peer().await.unwrap();

    assert!(registry.contains(peer.reference()));
    assert!(manager.contains(peer.reference()));
    assert_eq!(peer.object().class_name(), "WebRtc");
    assert_eq!(peer.get_att3().await.unwrap(), 1.0);
}

#[tokio::test]
async fn test_invoke_after_release_is_unknown_object() {
    let (registry, client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();
    let reference = proxy.reference().to_string();

    proxy.object().release_and_wait().await.unwrap();

    assert!(!registry.contains(&reference));
    assert!(!manager.contains(&reference));
    let err = proxy.get_att3().await.unwrap_err();
    assert_eq!(err, RomError::unknown_object(reference.as_str()));
    // The released handle doesn't reach the wire again.
    assert_eq!(client.calls().last().map(|c| c.0.as_str()), Some("release"));
}

#[tokio::test]
async fn test_server_release_surfaces_unknown_object() {
    let (registry, _client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();

    registry.release(proxy.reference());

    let err = proxy.get_att3().await.unwrap_err();
    assert!(matches!(err, RomError::UnknownObject { .. }));
}

#[tokio::test]
async fn test_fire_and_forget_release_detaches_immediately() {
    let (registry, _client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();
    let reference = proxy.reference().to_string();

    proxy.release();
    assert!(proxy.object().is_released());
    assert!(!manager.contains(&reference));

    tokio::time::timeout(Duration::from_secs(1), async {
        while registry.contains(&reference) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // Second release is a no-op.
    proxy.release();
}

#[tokio::test]
async fn test_application_fault_and_unknown_operation_propagate() {
    let (_registry, _client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();

    assert_eq!(
        proxy.fail().await.unwrap_err(),
        RomError::fault("requested failure")
    );
    assert_eq!(
        proxy.explode().await.unwrap_err(),
        RomError::unknown_operation("WebRtc", "explode")
    );
}

#[tokio::test]
async fn test_result_type_mismatch_is_protocol_error() {
    let (_registry, _client, manager) = setup();
    let object = manager.create("WebRtc", Props::new()).await.unwrap();

    let err = object.invoke::<i32>("getCodec", Props::new()).await.unwrap_err();
    assert!(matches!(err, RomError::Protocol { .. }));
}

#[tokio::test]
async fn test_typed_listener_receives_unflattened_payload() {
    let (_registry, client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    proxy
        .object()
        .add_listener(move |event: Changed| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();
    proxy.set_att3(0.75).await.unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event, Changed { att3: 0.75 });
    assert!(client.calls().iter().any(|(method, params)| method == "subscribe"
        && params["type"] == "Changed"));
}

#[tokio::test]
async fn test_untyped_listener_gets_props() {
    let (_registry, _client, manager) = setup();
    let object = manager.create("WebRtc", Props::new()).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    object
        .on_event("Changed", move |props| sink.lock().push(props))
        .await
        .unwrap();
    object
        .invoke::<()>("setAtt3", Props::new().with("value", 1.5))
        .await
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("att3"), Some(&json!(1.5)));
}

#[tokio::test]
async fn test_removed_listener_no_longer_fires() {
    let (registry, _client, manager) = setup();
    let object = manager.create("WebRtc", Props::new()).await.unwrap();
    let count = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&count);
    let listener = object
        .add_listener(move |_: Changed| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    object.remove_listener(&listener).await.unwrap();
    object
        .invoke::<()>("setAtt3", Props::new().with("value", 2.0))
        .await
        .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(object.listener_count(), 0);
    assert_eq!(registry.subscription_count(), 0);
}

#[tokio::test]
async fn test_event_for_unsubscribed_type_is_dropped() {
    let (_registry, _client, manager) = setup();
    let object = manager.create("WebRtc", Props::new()).await.unwrap();

    // No listener for "Other": dispatch logs and returns without panicking.
    manager.dispatch_event(romwire_rom::EventNotification::new(
        object.reference(),
        "Other",
        json!({"x": 1}),
    ));
    manager.dispatch_event(romwire_rom::EventNotification::new(
        "ghost_WebRtc",
        "Changed",
        json!({}),
    ));
}

#[tokio::test]
async fn test_invoke_with_delivers_to_continuation() {
    let (_registry, _client, manager) = setup();
    let object = manager.create("WebRtc", Props::new()).await.unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    object.invoke_with::<f32, _>("getAtt3", Props::new(), move |result| {
        let _ = tx.send(result);
    });

    assert_eq!(rx.await.unwrap().unwrap(), 1.0);
}

#[tokio::test]
async fn test_panicking_continuation_is_contained() {
    let (_registry, _client, manager) = setup();
    let object = manager.create("WebRtc", Props::new()).await.unwrap();

    object.invoke_with::<f32, _>("getAtt3", Props::new(), |_| panic!("continuation"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The object is still usable afterwards.
    assert_eq!(object.invoke::<f32>("getAtt3", Props::new()).await.unwrap(), 1.0);
}

#[tokio::test]
async fn test_flatten_round_trip_through_manager_context() {
    let (_registry, _client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();

    let wire = proxy.flatten();
    assert_eq!(wire, json!(proxy.reference()));
    let back = <WebRtcProxy as Unflatten<RomManager>>::unflatten(&wire, &manager).unwrap();
    assert_eq!(back, proxy);

    let stats = Stats {
        packets: 1,
        codec: Codec::VP8,
        ratio: 0.5,
    };
    let back = <Stats as Unflatten<RomManager>>::unflatten(&stats.flatten(), &manager).unwrap();
    assert_eq!(back, stats);
}

#[tokio::test]
async fn test_optional_result_round_trips_none_and_some() {
    let (_registry, _client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();

    assert_eq!(proxy.get_maybe(false).await.unwrap(), None);
    assert_eq!(proxy.get_maybe(true).await.unwrap(), Some(7));
}

#[tokio::test]
async fn test_unsigned_result_above_i64_max_round_trips() {
    let (_registry, _client, manager) = setup();
    let proxy: WebRtcProxy = manager.create_as(Props::new()).await.unwrap();

    assert_eq!(proxy.get_big().await.unwrap(), u64::MAX);
}

#[tokio::test]
async fn test_typed_builder_flags_set_booleans() {
    let (_registry, client, manager) = setup();

    let on = WebRtcProxy::builder(&manager).use_data_channels();
    assert_eq!(on.params().get("useDataChannels"), Some(&json!(true)));
    let off = WebRtcProxy::builder(&manager).att3(0.5).no_data_channels();
    assert_eq!(off.params().get("useDataChannels"), Some(&json!(false)));

    off.build().await.unwrap();
    assert_eq!(
        client.calls()[0].1["constructorParams"],
        json!({"att3": 0.5, "useDataChannels": false})
    );
}
