//! [`RomClient`] over a [`JsonRpcClient`] session.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use romwire_protocol::{Props, Value, method, param};
use romwire_rom::{EventHandler, RomClient, RomError, RomManager, string_result};
use romwire_transport::{Connector, TransportError};

use crate::client::JsonRpcClient;
use crate::config::ClientConfig;
use crate::RomwireError;

/// Speaks the remote object methods over one client session.
///
/// Cheap to clone; clones share the session.
#[derive(Debug, Clone)]
pub struct JsonRpcRomClient {
    client: Arc<JsonRpcClient>,
}

impl JsonRpcRomClient {
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    /// Dials the server and returns an object manager over the new
    /// session, along with the client that owns it.
    pub async fn connect<K>(
        connector: K,
        config: ClientConfig,
    ) -> Result<(Arc<JsonRpcClient>, RomManager), RomwireError>
    where
        K: Connector<Error = TransportError>,
    {
        let client = Arc::new(JsonRpcClient::connect(connector, config).await?);
        let manager = Self::new(Arc::clone(&client)).manager();
        Ok((client, manager))
    }

    pub fn client(&self) -> &JsonRpcClient {
        &self.client
    }

    /// A manager driving this client. It installs itself as the event
    /// handler, so create one manager per session.
    pub fn manager(&self) -> RomManager {
        RomManager::new(Arc::new(self.clone()))
    }

    async fn request(&self, method_name: &str, params: Props) -> Result<Value, RomError> {
        let response = self
            .client
            .session()
            .call(method_name, Some(params.into()))
            .await
            .map_err(|e| RomError::Transport {
                reason: e.to_string(),
            })?;
        response.outcome.map_err(RomError::from_response_error)
    }
}

/// Empty bags are left off the wire.
fn with_bag(props: Props, name: &str, bag: Props) -> Props {
    if bag.is_empty() {
        props
    } else {
        props.with(name, bag)
    }
}

impl RomClient for JsonRpcRomClient {
    fn create(
        &self,
        class_name: &str,
        constructor_params: Props,
    ) -> BoxFuture<'_, Result<String, RomError>> {
        let params = with_bag(
            Props::new().with(param::TYPE, class_name),
            param::CONSTRUCTOR_PARAMS,
            constructor_params,
        );
        Box::pin(async move { string_result(self.request(method::CREATE, params).await?) })
    }

    fn invoke(
        &self,
        reference: &str,
        operation: &str,
        operation_params: Props,
    ) -> BoxFuture<'_, Result<Value, RomError>> {
        let params = with_bag(
            Props::new()
                .with(param::OBJECT, reference)
                .with(param::OPERATION, operation),
            param::OPERATION_PARAMS,
            operation_params,
        );
        Box::pin(self.request(method::INVOKE, params))
    }

    fn release(&self, reference: &str) -> BoxFuture<'_, Result<(), RomError>> {
        let params = Props::new().with(param::OBJECT, reference);
        Box::pin(async move {
            self.request(method::RELEASE, params).await?;
            Ok(())
        })
    }

    fn subscribe(
        &self,
        reference: &str,
        event_type: &str,
    ) -> BoxFuture<'_, Result<String, RomError>> {
        let params = Props::new()
            .with(param::OBJECT, reference)
            .with(param::TYPE, event_type);
        Box::pin(async move { string_result(self.request(method::SUBSCRIBE, params).await?) })
    }

    fn unsubscribe(
        &self,
        reference: &str,
        subscription: &str,
    ) -> BoxFuture<'_, Result<(), RomError>> {
        let params = Props::new()
            .with(param::OBJECT, reference)
            .with(param::SUBSCRIPTION, subscription);
        Box::pin(async move {
            self.request(method::UNSUBSCRIBE, params).await?;
            Ok(())
        })
    }

    fn set_event_handler(&self, handler: EventHandler) {
        self.client.set_event_handler(handler);
    }
}
