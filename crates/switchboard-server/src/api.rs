//! The broker API.
//!
//! [`Broker`] wires the model, the coordinator and the dispatcher together
//! and exposes the channel topics to clients:
//!
//! - connected clients get a window in the model, starting on the default
//!   channel, and lose it when they disconnect;
//! - every membership change is pushed to all connected clients as a
//!   `channel-changed` event;
//! - broadcasts are retained on the channel and pushed as `context` events
//!   to its members and listeners, except the sender.

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use switchboard_protocol::api::{
    topics, BroadcastPayload, ChannelBroadcastPayload, ChannelIdPayload,
    GetCurrentChannelPayload, JoinChannelPayload,
};
use switchboard_protocol::events::{self, ChannelChangedEvent, ContextEvent};
use switchboard_protocol::{ChannelTransport, Context, Identity};
use tenvis_switchboard_core::{
    encode_result, ActionError, ActionSet, AppWindow, ContextChannel, Coordinator, DispatchError, Dispatcher,
    LookupError, Model,
};
use tenvis_switchboard_transport::Bus;
use tracing::{debug, info, trace};

/// Error kind returned for calls that arrive after the broker is dropped.
pub const BROKER_STOPPED: &str = "BrokerStopped";

type Operation<P, R> = fn(&Broker, P, &Identity) -> Result<R, ActionError>;

/// The provider side of the interop broker.
pub struct Broker {
    coordinator: Arc<Coordinator>,
    dispatcher: Arc<Dispatcher>,
}

impl Broker {
    /// Create a broker over `model`, serving under `service`.
    #[must_use]
    pub fn new(model: Arc<Model>, service: impl Into<String>) -> Arc<Self> {
        let coordinator = Coordinator::new(model.clone());
        let dispatcher = Arc::new(Dispatcher::new(service));

        let windows = model.clone();
        dispatcher.on_connection.add(move |identity: &Identity| {
            windows.register_window(identity.clone());
        });

        let windows = model;
        dispatcher.on_disconnection.add(move |identity: &Identity| {
            windows.remove_window(identity);
        });

        let clients = dispatcher.clone();
        coordinator
            .on_channel_changed
            .add(move |event: &ChannelChangedEvent| notify_channel_changed(&clients, event));

        Arc::new(Self {
            coordinator,
            dispatcher,
        })
    }

    /// The channel coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// The message dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Register the broker API on `bus`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider endpoint cannot be created.
    pub async fn start(self: &Arc<Self>, bus: &dyn Bus) -> Result<(), DispatchError> {
        self.dispatcher.register_actions(bus, self.actions()).await?;
        info!(service = %self.dispatcher.service(), "Broker started");
        Ok(())
    }

    fn actions(self: &Arc<Self>) -> ActionSet {
        let actions = ActionSet::new();
        let actions = self.route(actions, topics::GET_SYSTEM_CHANNELS, Self::system_channels);
        let actions = self.route(actions, topics::GET_CHANNEL_BY_ID, Self::channel_by_id);
        let actions = self.route(actions, topics::GET_CURRENT_CHANNEL, Self::current_channel);
        let actions = self.route(actions, topics::CHANNEL_GET_MEMBERS, Self::channel_members);
        let actions = self.route(actions, topics::CHANNEL_JOIN, Self::join_channel);
        let actions = self.route(
            actions,
            topics::CHANNEL_GET_CURRENT_CONTEXT,
            Self::current_context,
        );
        let actions = self.route(actions, topics::CHANNEL_BROADCAST, Self::channel_broadcast);
        let actions = self.route(actions, topics::BROADCAST, Self::broadcast);
        let actions = self.route(
            actions,
            topics::CHANNEL_ADD_CONTEXT_LISTENER,
            Self::add_context_listener,
        );
        self.route(
            actions,
            topics::CHANNEL_REMOVE_CONTEXT_LISTENER,
            Self::remove_context_listener,
        )
    }

    /// Add `op` under `topic`. A missing payload is read as an empty object.
    ///
    /// Actions hold the broker weakly; the endpoint they live on is owned by
    /// the broker's dispatcher.
    fn route<P, R>(
        self: &Arc<Self>,
        actions: ActionSet,
        topic: &'static str,
        op: Operation<P, R>,
    ) -> ActionSet
    where
        P: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        let broker: Weak<Self> = Arc::downgrade(self);
        actions.add_sync(topic, move |payload: Value, source: Identity| {
            let broker = broker
                .upgrade()
                .ok_or_else(|| ActionError::custom(BROKER_STOPPED, "Broker has stopped"))?;
            let payload = if payload.is_null() {
                Value::Object(Map::new())
            } else {
                payload
            };
            let result = op(&broker, serde_json::from_value(payload)?, &source)?;
            encode_result(result)
        })
    }

    fn system_channels(
        &self,
        _payload: IgnoredAny,
        _source: &Identity,
    ) -> Result<Vec<ChannelTransport>, ActionError> {
        Ok(self
            .coordinator
            .list_channels()
            .iter()
            .map(|channel| channel.to_transport())
            .collect())
    }

    fn channel_by_id(
        &self,
        payload: ChannelIdPayload,
        _source: &Identity,
    ) -> Result<ChannelTransport, ActionError> {
        Ok(self.coordinator.get_channel_by_id(&payload.id)?.to_transport())
    }

    fn current_channel(
        &self,
        payload: GetCurrentChannelPayload,
        source: &Identity,
    ) -> Result<ChannelTransport, ActionError> {
        let window = match payload.identity {
            Some(identity) => self.coordinator.get_window(&identity)?,
            None => self.caller_window(source)?,
        };
        Ok(window.channel().to_transport())
    }

    fn channel_members(
        &self,
        payload: ChannelIdPayload,
        _source: &Identity,
    ) -> Result<Vec<Identity>, ActionError> {
        let channel = self.coordinator.get_channel_by_id(&payload.id)?;
        Ok(self
            .coordinator
            .get_channel_members(&channel)
            .into_iter()
            .map(|window| window.identity().clone())
            .collect())
    }

    fn join_channel(
        &self,
        payload: JoinChannelPayload,
        source: &Identity,
    ) -> Result<(), ActionError> {
        let channel = self.coordinator.get_channel_by_id(&payload.id)?;
        let identity = match payload.identity {
            Some(identity) => identity,
            None => self.caller_window(source)?.identity().clone(),
        };
        self.coordinator.join_channel(&identity, &channel)?;
        Ok(())
    }

    fn current_context(
        &self,
        payload: ChannelIdPayload,
        _source: &Identity,
    ) -> Result<Option<Context>, ActionError> {
        let channel = self.coordinator.get_channel_by_id(&payload.id)?;
        Ok(self.coordinator.get_retained_context(&channel))
    }

    fn channel_broadcast(
        &self,
        payload: ChannelBroadcastPayload,
        source: &Identity,
    ) -> Result<(), ActionError> {
        let channel = self.coordinator.get_channel_by_id(&payload.id)?;
        self.publish(&channel, payload.context, source)
    }

    fn broadcast(&self, payload: BroadcastPayload, source: &Identity) -> Result<(), ActionError> {
        let channel = self.caller_window(source)?.channel().clone();
        self.publish(&channel, payload.context, source)
    }

    fn add_context_listener(
        &self,
        payload: ChannelIdPayload,
        source: &Identity,
    ) -> Result<(), ActionError> {
        let channel = self.coordinator.get_channel_by_id(&payload.id)?;
        self.caller_window(source)?;
        let added = self
            .coordinator
            .model()
            .add_context_listener(source, channel.id())
            .ok_or_else(|| LookupError::WindowNotFound(source.clone()))?;
        debug!(identity = %source, channel = %channel.id(), added, "Context listener added");
        Ok(())
    }

    fn remove_context_listener(
        &self,
        payload: ChannelIdPayload,
        source: &Identity,
    ) -> Result<(), ActionError> {
        let channel = self.coordinator.get_channel_by_id(&payload.id)?;
        let removed = self
            .coordinator
            .model()
            .remove_context_listener(source, channel.id())
            .ok_or_else(|| LookupError::WindowNotFound(source.clone()))?;
        debug!(identity = %source, channel = %channel.id(), removed, "Context listener removed");
        Ok(())
    }

    /// The caller's window.
    ///
    /// A call can arrive before the connection is announced; connected
    /// callers are registered on demand.
    fn caller_window(&self, source: &Identity) -> Result<AppWindow, LookupError> {
        if let Ok(window) = self.coordinator.get_window(source) {
            return Ok(window);
        }
        if self.dispatcher.is_client_connection(source) {
            return Ok(self.coordinator.model().register_window(source.clone()));
        }
        Err(LookupError::WindowNotFound(source.clone()))
    }

    /// Retain `context` on `channel` and push it to interested windows.
    fn publish(
        &self,
        channel: &ContextChannel,
        context: Context,
        source: &Identity,
    ) -> Result<(), ActionError> {
        let retained = self
            .coordinator
            .set_last_broadcast_context(channel, context.clone());

        let recipients = self.coordinator.model().windows_where(|window| {
            window.identity() != source
                && (window.is_member_of(channel) || window.has_context_listener(channel.id()))
        });

        let event = serde_json::to_value(ContextEvent {
            channel: channel.id().to_string(),
            context,
        })?;
        for window in &recipients {
            if let Err(err) = self
                .dispatcher
                .send(window.identity(), events::CONTEXT, event.clone())
            {
                debug!(identity = %window.identity(), error = %err, "Context not delivered");
            }
        }

        debug!(
            source = %source,
            channel = %channel.id(),
            recipients = recipients.len(),
            retained,
            "Broadcast context"
        );
        Ok(())
    }
}

fn notify_channel_changed(dispatcher: &Dispatcher, event: &ChannelChangedEvent) {
    let payload = match serde_json::to_value(event) {
        Ok(payload) => payload,
        Err(err) => {
            debug!(error = %err, "Failed to encode channel-changed event");
            return;
        }
    };

    for connection in dispatcher.get_client_connections() {
        if let Err(err) =
            dispatcher.send(&connection.identity, events::CHANNEL_CHANGED, payload.clone())
        {
            trace!(identity = %connection.identity, error = %err, "Channel change not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_protocol::{DisplayMetadata, SerializedError};
    use tenvis_switchboard_transport::{LocalBus, LocalClient, TransportError};

    const SERVICE: &str = "switchboard";

    fn desktop(id: &str) -> ContextChannel {
        ContextChannel::desktop(
            id,
            DisplayMetadata {
                name: id.to_string(),
                color: "#000000".to_string(),
                glyph: None,
            },
        )
    }

    async fn broker() -> (LocalBus, Arc<Broker>) {
        let model = Arc::new(Model::new([desktop("red"), desktop("blue")]).unwrap());
        let broker = Broker::new(model, SERVICE);
        let bus = LocalBus::new();
        broker.start(&bus).await.unwrap();
        (bus, broker)
    }

    async fn connect(bus: &LocalBus, window: &str) -> LocalClient {
        let client = bus
            .connect(SERVICE, Identity::new("app", window), None)
            .unwrap();
        settle().await;
        client
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(client: &mut LocalClient) -> Vec<(String, Value)> {
        std::iter::from_fn(|| client.try_next_event()).collect()
    }

    fn remote_error(result: Result<Value, TransportError>) -> SerializedError {
        match result {
            Err(TransportError::Remote(err)) => err,
            other => panic!("Expected remote failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_system_channels() {
        let (bus, _broker) = broker().await;
        let client = connect(&bus, "w").await;

        let channels = client
            .dispatch(topics::GET_SYSTEM_CHANNELS, Value::Null)
            .await
            .unwrap();
        let ids: Vec<_> = channels
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["red", "blue"]);
        assert_eq!(channels[0]["type"], "desktop");
        assert_eq!(channels[0]["displayMetadata"]["name"], "red");
    }

    #[tokio::test]
    async fn test_channel_by_id() {
        let (bus, _broker) = broker().await;
        let client = connect(&bus, "w").await;

        let channel = client
            .dispatch(topics::GET_CHANNEL_BY_ID, json!({"id": "default"}))
            .await
            .unwrap();
        assert_eq!(channel["id"], "default");
        assert_eq!(channel["type"], "default");

        let err = remote_error(
            client
                .dispatch(topics::GET_CHANNEL_BY_ID, json!({"id": "nonexistent"}))
                .await,
        );
        assert_eq!(err.error_kind, "ChannelDoesNotExist");
        assert_eq!(err.message, "No channel with channelId: nonexistent");

        let err = remote_error(client.dispatch(topics::GET_CHANNEL_BY_ID, Value::Null).await);
        assert_eq!(err.error_kind, "InvalidPayload");
    }

    #[tokio::test]
    async fn test_connection_registers_window() {
        let (bus, broker) = broker().await;
        let client = connect(&bus, "w").await;

        let identity = client.identity().clone();
        assert!(broker.coordinator().get_window(&identity).is_ok());

        let current = client
            .dispatch(topics::GET_CURRENT_CHANNEL, Value::Null)
            .await
            .unwrap();
        assert_eq!(current["id"], "default");

        client.disconnect();
        assert!(broker.coordinator().get_window(&identity).is_err());
    }

    #[tokio::test]
    async fn test_join_and_members() {
        let (bus, _broker) = broker().await;
        let a = connect(&bus, "a").await;
        let b = connect(&bus, "b").await;

        a.dispatch(topics::CHANNEL_JOIN, json!({"id": "red"}))
            .await
            .unwrap();
        b.dispatch(
            topics::CHANNEL_JOIN,
            json!({"id": "red", "identity": {"applicationId": "app", "windowName": "b"}}),
        )
        .await
        .unwrap();

        let members = a
            .dispatch(topics::CHANNEL_GET_MEMBERS, json!({"id": "red"}))
            .await
            .unwrap();
        assert_eq!(
            members,
            json!([
                {"applicationId": "app", "windowName": "a"},
                {"applicationId": "app", "windowName": "b"}
            ])
        );

        let current = b
            .dispatch(
                topics::GET_CURRENT_CHANNEL,
                json!({"identity": {"applicationId": "app", "windowName": "a"}}),
            )
            .await
            .unwrap();
        assert_eq!(current["id"], "red");
    }

    #[tokio::test]
    async fn test_join_unknown_window() {
        let (bus, _broker) = broker().await;
        let client = connect(&bus, "w").await;

        let err = remote_error(
            client
                .dispatch(
                    topics::CHANNEL_JOIN,
                    json!({"id": "red", "identity": {"applicationId": "x", "windowName": "y"}}),
                )
                .await,
        );
        assert_eq!(err.error_kind, "WindowNotFound");
    }

    #[tokio::test]
    async fn test_channel_changed_pushed_to_all_clients() {
        let (bus, _broker) = broker().await;
        let mut a = connect(&bus, "a").await;
        let mut b = connect(&bus, "b").await;
        drain(&mut a);
        drain(&mut b);

        a.dispatch(topics::CHANNEL_JOIN, json!({"id": "blue"}))
            .await
            .unwrap();

        for client in [&mut a, &mut b] {
            let received = drain(client);
            assert_eq!(received.len(), 1);
            let (topic, payload) = &received[0];
            assert_eq!(topic, events::CHANNEL_CHANGED);
            assert_eq!(payload["identity"]["windowName"], "a");
            assert_eq!(payload["channel"]["id"], "blue");
            assert_eq!(payload["previousChannel"]["id"], "default");
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members_and_listeners() {
        let (bus, _broker) = broker().await;
        let sender = connect(&bus, "sender").await;
        let mut member = connect(&bus, "member").await;
        let mut listener = connect(&bus, "listener").await;
        let mut outsider = connect(&bus, "outsider").await;

        sender
            .dispatch(topics::CHANNEL_JOIN, json!({"id": "red"}))
            .await
            .unwrap();
        member
            .dispatch(topics::CHANNEL_JOIN, json!({"id": "red"}))
            .await
            .unwrap();
        listener
            .dispatch(topics::CHANNEL_ADD_CONTEXT_LISTENER, json!({"id": "red"}))
            .await
            .unwrap();
        drain(&mut member);
        drain(&mut listener);
        drain(&mut outsider);

        let context = json!({"type": "fdc3.instrument", "id": {"ticker": "AAPL"}});
        sender
            .dispatch(topics::BROADCAST, json!({ "context": context }))
            .await
            .unwrap();

        let expected = vec![(
            events::CONTEXT.to_string(),
            json!({"channel": "red", "context": context}),
        )];
        assert_eq!(drain(&mut member), expected);
        assert_eq!(drain(&mut listener), expected);
        assert!(drain(&mut outsider).is_empty());

        let retained = outsider
            .dispatch(topics::CHANNEL_GET_CURRENT_CONTEXT, json!({"id": "red"}))
            .await
            .unwrap();
        assert_eq!(retained, context);
    }

    #[tokio::test]
    async fn test_removed_listener_gets_nothing() {
        let (bus, _broker) = broker().await;
        let sender = connect(&bus, "sender").await;
        let mut listener = connect(&bus, "listener").await;

        listener
            .dispatch(topics::CHANNEL_ADD_CONTEXT_LISTENER, json!({"id": "blue"}))
            .await
            .unwrap();
        listener
            .dispatch(topics::CHANNEL_REMOVE_CONTEXT_LISTENER, json!({"id": "blue"}))
            .await
            .unwrap();
        drain(&mut listener);

        sender
            .dispatch(
                topics::CHANNEL_BROADCAST,
                json!({"id": "blue", "context": {"type": "fdc3.contact"}}),
            )
            .await
            .unwrap();
        assert!(drain(&mut listener).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_into_empty_channel_not_retained() {
        let (bus, _broker) = broker().await;
        let client = connect(&bus, "w").await;

        client
            .dispatch(
                topics::CHANNEL_BROADCAST,
                json!({"id": "blue", "context": {"type": "fdc3.contact"}}),
            )
            .await
            .unwrap();

        let retained = client
            .dispatch(topics::CHANNEL_GET_CURRENT_CONTEXT, json!({"id": "blue"}))
            .await
            .unwrap();
        assert_eq!(retained, Value::Null);
    }

    #[tokio::test]
    async fn test_context_cleared_when_last_member_leaves() {
        let (bus, _broker) = broker().await;
        let a = connect(&bus, "a").await;
        let observer = connect(&bus, "observer").await;

        a.dispatch(topics::CHANNEL_JOIN, json!({"id": "red"}))
            .await
            .unwrap();
        a.dispatch(
            topics::CHANNEL_BROADCAST,
            json!({"id": "red", "context": {"type": "fdc3.contact"}}),
        )
        .await
        .unwrap();

        a.disconnect();

        let retained = observer
            .dispatch(topics::CHANNEL_GET_CURRENT_CONTEXT, json!({"id": "red"}))
            .await
            .unwrap();
        assert_eq!(retained, Value::Null);
    }

    #[tokio::test]
    async fn test_call_before_connection_announced() {
        let (bus, broker) = broker().await;
        let client = bus
            .connect(SERVICE, Identity::new("app", "eager"), None)
            .unwrap();

        client
            .dispatch(topics::CHANNEL_JOIN, json!({"id": "red"}))
            .await
            .unwrap();
        settle().await;

        let window = broker.coordinator().get_window(client.identity()).unwrap();
        assert_eq!(window.channel().id(), "red");
    }

    #[tokio::test]
    async fn test_dropping_broker_releases_it() {
        let (bus, broker) = broker().await;
        let client = connect(&bus, "w1").await;
        let weak = Arc::downgrade(&broker);

        drop(broker);
        assert!(weak.upgrade().is_none());

        let err = remote_error(
            client
                .dispatch(topics::GET_SYSTEM_CHANNELS, json!(null))
                .await,
        );
        assert_eq!(err.error_kind, BROKER_STOPPED);
    }
}
