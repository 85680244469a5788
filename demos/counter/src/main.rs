use std::time::Duration;

use parking_lot::Mutex;
use romwire::prelude::*;
use tracing::info;

// ---------------------------------------------------------------------------
// Remote types
// ---------------------------------------------------------------------------

rom_enum! {
    pub enum Direction { UP, DOWN }
}

rom_struct! {
    pub struct Changed {
        pub value: i64,
        pub direction: Direction,
    }
}

impl RomEvent for Changed {
    const TYPE: &'static str = "Changed";
}

// ---------------------------------------------------------------------------
// Server object
// ---------------------------------------------------------------------------

struct Counter {
    value: Mutex<i64>,
    step: i64,
}

impl Counter {
    fn new(props: &Props, cx: &ObjectContext) -> Result<Self, RomError> {
        let start: Option<i64> = cx.param(props, "start")?;
        let step: Option<i64> = cx.param(props, "step")?;
        Ok(Self {
            value: Mutex::new(start.unwrap_or(0)),
            step: step.unwrap_or(1),
        })
    }

    fn bump(&self, direction: Direction, cx: &ObjectContext) -> i64 {
        let value = {
            let mut value = self.value.lock();
            match direction {
                Direction::UP => *value += self.step,
                Direction::DOWN => *value -= self.step,
            }
            *value
        };
        cx.fire("Changed", &Changed { value, direction });
        value
    }
}

impl RemoteClass for Counter {
    fn invoke(&self, operation: &str, params: &Props, cx: &ObjectContext) -> Result<Value, RomError> {
        match operation {
            "getValue" => Ok(self.value.lock().flatten()),
            "increment" => Ok(self.bump(Direction::UP, cx).flatten()),
            "decrement" => {
                if *self.value.lock() - self.step < 0 {
                    return Err(RomError::fault("counter cannot go below zero"));
                }
                Ok(self.bump(Direction::DOWN, cx).flatten())
            }
            "shift" => {
                let direction: Direction = cx.param(params, "direction")?;
                Ok(self.bump(direction, cx).flatten())
            }
            other => Err(cx.unknown_operation(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Client proxy
// ---------------------------------------------------------------------------

remote_proxy! {
    pub struct CounterProxy: "Counter" {
        builder CounterBuilder {
            start: i64,
            step: i64,
        }
        fn get_value() -> i64;
        fn increment() -> i64;
        fn decrement() -> i64;
        fn shift(direction: Direction) -> i64;
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

async fn serve(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server = RomServer::builder()
        .bind(addr)
        .register_class("Counter", Counter::new)
        .build()
        .await?;
    info!(addr = %server.local_addr()?, "serving counters");
    server.run().await?;
    Ok(())
}

async fn drive(url: &str) -> Result<(), RomwireError> {
    let (client, manager) =
        JsonRpcRomClient::connect(WebSocketConnector::new(url), ClientConfig::default()).await?;
    info!(session_id = ?client.session_id(), "connected");

    let counter = CounterProxy::builder(&manager).start(1).step(2).build().await?;
    counter
        .object()
        .add_listener(|event: Changed| {
            info!(value = event.value, direction = %event.direction, "counter changed");
        })
        .await?;

    counter.increment().await?;
    counter.shift(Direction::UP).await?;
    loop {
        match counter.decrement().await {
            Ok(value) => info!(value, "decremented"),
            Err(e) => {
                info!(error = %e, "refused as expected");
                break;
            }
        }
    }
    info!(value = counter.get_value().await?, "final value");

    // Let the last events arrive before hanging up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    counter.object().release_and_wait().await?;
    client.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    romwire::init_tracing();

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "demo".to_string());
    let target = args.next();

    match mode.as_str() {
        "serve" => serve(target.as_deref().unwrap_or("0.0.0.0:8888")).await?,
        "drive" => drive(target.as_deref().unwrap_or("ws://127.0.0.1:8888")).await?,
        "demo" => {
            let server = RomServer::builder()
                .bind("127.0.0.1:0")
                .register_class("Counter", Counter::new)
                .build()
                .await?;
            let addr = server.local_addr()?;
            tokio::spawn(async move {
                let _ = server.run().await;
            });
            drive(&format!("ws://{addr}")).await?;
        }
        other => {
            eprintln!("usage: counter [serve [ADDR] | drive [URL] | demo]");
            return Err(format!("unknown mode '{other}'").into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::Message;

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start() -> String {
        let server = RomServer::builder()
            .bind("127.0.0.1:0")
            .register_class("Counter", Counter::new)
            .build()
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    async fn ws(addr: &str) -> Ws {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        ws
    }

    async fn send(ws: &mut Ws, value: serde_json::Value) {
        ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    async fn recv(ws: &mut Ws) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout")
            .unwrap()
            .unwrap();
        serde_json::from_slice(&msg.into_data()).unwrap()
    }

    // Drives the wire by hand: connect, create, invoke, subscribe.
    #[tokio::test]
    async fn test_raw_wire_session() {
        let addr = start().await;
        let mut ws = ws(&addr).await;

        send(&mut ws, json!({"jsonrpc": "2.0", "id": 1, "method": "connect"})).await;
        let connected = recv(&mut ws).await;
        let session_id = connected["result"]["sessionId"].as_str().unwrap().to_string();

        send(
            &mut ws,
            json!({"jsonrpc": "2.0", "id": 2, "method": "create", "params": {
                "type": "Counter",
                "constructorParams": {"start": 5},
                "sessionId": session_id,
            }}),
        )
        .await;
        let created = recv(&mut ws).await;
        assert_eq!(created["id"], 2);
        assert_eq!(created["result"]["sessionId"], session_id.as_str());
        let reference = created["result"]["value"].as_str().unwrap().to_string();

        send(
            &mut ws,
            json!({"jsonrpc": "2.0", "id": 3, "method": "subscribe", "params": {
                "object": reference, "type": "Changed", "sessionId": session_id,
            }}),
        )
        .await;
        let subscribed = recv(&mut ws).await;
        let subscription = subscribed["result"]["value"].as_str().unwrap().to_string();

        send(
            &mut ws,
            json!({"jsonrpc": "2.0", "id": 4, "method": "invoke", "params": {
                "object": reference, "operation": "increment", "sessionId": session_id,
            }}),
        )
        .await;
        let event = recv(&mut ws).await;
        assert_eq!(event["method"], "onEvent");
        assert_eq!(event["params"]["object"], reference.as_str());
        assert_eq!(event["params"]["subscription"], subscription.as_str());
        assert_eq!(event["params"]["data"], json!({"value": 6, "direction": "UP"}));
        let invoked = recv(&mut ws).await;
        assert_eq!(invoked["id"], 4);
        assert_eq!(invoked["result"]["value"], 6);
    }

    #[tokio::test]
    async fn test_proxy_moves_and_refuses_negative() {
        let addr = start().await;
        let (client, manager) =
            JsonRpcRomClient::connect(WebSocketConnector::new(format!("ws://{addr}")), ClientConfig::default())
                .await
                .unwrap();

        let counter = CounterProxy::builder(&manager).start(1).build().await.unwrap();
        assert_eq!(counter.shift(Direction::UP).await.unwrap(), 2);
        assert_eq!(counter.decrement().await.unwrap(), 1);
        assert_eq!(counter.decrement().await.unwrap(), 0);
        assert_eq!(
            counter.decrement().await.unwrap_err(),
            RomError::fault("counter cannot go below zero")
        );
        client.close().await;
    }
}
