//! Message dispatch for Switchboard.
//!
//! The dispatcher creates the provider endpoint on a [`Bus`], registers a
//! fixed set of named actions on it and tracks which clients are connected.
//! Every action runs behind a wrapper that turns failures (including
//! panics) into a [`SerializedError`] before they leave the provider.

use crate::error::{encode_result, serialize_error, ActionError, DispatchError};
use crate::signal::Signal;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{
    Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant};
use switchboard_protocol::{ConnectPayload, Identity, SerializedError};
use tenvis_switchboard_transport::{ActionFn, ActionFuture, Bus, ProviderEndpoint};
use tracing::{debug, error, info, trace, warn};

/// Error kind reported when an action panics.
pub const PANIC_KIND: &str = "Panic";

/// A provider action: takes the request payload and the caller identity.
pub type Action = Arc<dyn Fn(Value, Identity) -> PendingResult + Send + Sync>;

/// Future returned by an [`Action`].
pub type PendingResult = BoxFuture<'static, Result<Value, ActionError>>;

/// The set of actions to expose, keyed by topic.
#[derive(Clone, Default)]
pub struct ActionSet {
    actions: BTreeMap<String, Action>,
}

impl ActionSet {
    /// Create an empty action set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asynchronous action.
    #[must_use]
    pub fn add<F, Fut>(self, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Identity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.insert(
            topic.into(),
            Arc::new(move |payload: Value, source: Identity| -> PendingResult {
                handler(payload, source).boxed()
            }),
        )
    }

    /// Add an action that produces its result immediately.
    #[must_use]
    pub fn add_sync<F>(self, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Identity) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        self.insert(
            topic.into(),
            Arc::new(move |payload: Value, source: Identity| -> PendingResult {
                future::ready(handler(payload, source)).boxed()
            }),
        )
    }

    /// Add an action with a typed payload and result.
    ///
    /// Payloads that do not deserialize into `P` fail with `InvalidPayload`,
    /// results that do not serialize fail with `InvalidResult`.
    #[must_use]
    pub fn add_typed<P, R, F, Fut>(self, topic: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(P, Identity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ActionError>> + Send + 'static,
    {
        self.insert(
            topic.into(),
            Arc::new(move |payload: Value, source: Identity| -> PendingResult {
                let call =
                    serde_json::from_value::<P>(payload).map(|parsed| handler(parsed, source));
                async move {
                    let result = call?.await?;
                    encode_result(result)
                }
                .boxed()
            }),
        )
    }

    /// Topics in this set, in sorted order.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn insert(mut self, topic: String, action: Action) -> Self {
        if self.actions.insert(topic.clone(), action).is_some() {
            warn!(topic = %topic, "Replacing previously added action");
        }
        self
    }
}

/// A client connection tracked by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    /// The connected window.
    pub identity: Identity,
    /// Client library version, if it announced one.
    pub version: Option<String>,
}

/// Outcome of a single dispatched call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Action topic.
    pub topic: String,
    /// Caller.
    pub source: Identity,
    /// Time spent in the action.
    pub elapsed: Duration,
    /// Error kind if the call failed.
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone)]
struct Tracked {
    connection: ClientConnection,
    announced: bool,
}

/// Connected clients and the signals that announce them.
///
/// A connection is announced on a later scheduling turn. A client that
/// leaves before that is announced right before its disconnection, so the
/// two signals always pair up and never reorder for one client.
struct Presence {
    tracked: RwLock<Vec<Tracked>>,
    announcing: Mutex<()>,
    connected: Signal<Identity>,
    disconnected: Signal<Identity>,
}

impl Presence {
    /// Start tracking a client. Returns `false` if it is already tracked.
    fn track(&self, identity: &Identity, version: Option<String>) -> bool {
        track_in(&mut self.write(), identity, version)
    }

    fn announce(&self, identity: &Identity) {
        let _announcing = self.announcing.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = {
            let mut tracked = self.write();
            match tracked
                .iter_mut()
                .find(|t| t.connection.identity == *identity && !t.announced)
            {
                Some(entry) => {
                    entry.announced = true;
                    true
                }
                None => false,
            }
        };
        if pending {
            self.connected.emit(identity);
        }
    }

    fn forget(&self, identity: &Identity) {
        let _announcing = self.announcing.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = {
            let mut tracked = self.write();
            tracked
                .iter()
                .position(|t| t.connection.identity == *identity)
                .map(|index| tracked.remove(index))
        };
        let Some(removed) = removed else {
            trace!(identity = %identity, "Ignoring disconnection of untracked client");
            return;
        };

        if !removed.announced {
            debug!(identity = %identity, "Client left before connection was announced");
            self.connected.emit(identity);
        }
        debug!(identity = %identity, "Client disconnected");
        self.disconnected.emit(identity);
    }

    fn contains(&self, identity: &Identity) -> bool {
        self.read()
            .iter()
            .any(|t| t.connection.identity == *identity)
    }

    fn snapshot(&self) -> Vec<ClientConnection> {
        self.read().iter().map(|t| t.connection.clone()).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Tracked>> {
        self.tracked.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Tracked>> {
        self.tracked.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exposes named actions over a bus and tracks client connections.
pub struct Dispatcher {
    service: String,
    endpoint: OnceLock<Arc<dyn ProviderEndpoint>>,
    presence: Arc<Presence>,
    /// Fired when a client connects, once it is able to receive calls.
    ///
    /// Always fires before [`Dispatcher::on_disconnection`] for the same
    /// client, even if it leaves straight away.
    pub on_connection: Signal<Identity>,
    /// Fired when a client disconnects.
    pub on_disconnection: Signal<Identity>,
    /// Fired after every dispatched call.
    pub on_call_completed: Signal<CallRecord>,
}

impl Dispatcher {
    /// Create a dispatcher for the named service.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        let on_connection = Signal::new();
        let on_disconnection = Signal::new();
        Self {
            service: service.into(),
            endpoint: OnceLock::new(),
            presence: Arc::new(Presence {
                tracked: RwLock::new(Vec::new()),
                announcing: Mutex::new(()),
                connected: on_connection.clone(),
                disconnected: on_disconnection.clone(),
            }),
            on_connection,
            on_disconnection,
            on_call_completed: Signal::new(),
        }
    }

    /// The service name the endpoint is created under.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The provider endpoint, once actions are registered.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Arc<dyn ProviderEndpoint>> {
        self.endpoint.get()
    }

    /// Create the provider endpoint, register every action on it and start
    /// accepting clients.
    ///
    /// Clients the endpoint already holds are tracked and announced like
    /// new ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be created, a topic cannot be
    /// registered, or actions were already registered. Nothing is retried.
    pub async fn register_actions(
        &self,
        bus: &dyn Bus,
        actions: ActionSet,
    ) -> Result<(), DispatchError> {
        if self.endpoint.get().is_some() {
            return Err(DispatchError::AlreadyRegistered);
        }

        let endpoint = bus
            .create_provider(&self.service)
            .await
            .map_err(DispatchError::EndpointCreation)?;
        if self.endpoint.set(endpoint.clone()).is_err() {
            return Err(DispatchError::AlreadyRegistered);
        }

        endpoint.on_connection(self.connection_hook());
        endpoint.on_disconnection(self.disconnection_hook());
        self.track_existing(endpoint.as_ref());

        let count = actions.len();
        for (topic, action) in actions.actions {
            let wrapped = self.wrap(topic.clone(), action);
            endpoint
                .register(&topic, wrapped)
                .map_err(|source| DispatchError::Registration { topic, source })?;
        }
        endpoint.start();

        info!(
            service = %self.service,
            bus = bus.name(),
            actions = count,
            "Registered provider actions"
        );
        Ok(())
    }

    /// Check whether `identity` is a currently connected client.
    #[must_use]
    pub fn is_client_connection(&self, identity: &Identity) -> bool {
        self.presence.contains(identity)
    }

    /// Snapshot of the connected clients, in connection order.
    #[must_use]
    pub fn get_client_connections(&self) -> Vec<ClientConnection> {
        self.presence.snapshot()
    }

    /// Push an event to a connected client.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint exists or the client is not connected.
    pub fn send(&self, to: &Identity, topic: &str, payload: Value) -> Result<(), DispatchError> {
        let endpoint = self.endpoint.get().ok_or(DispatchError::NotRegistered)?;
        endpoint.send(to, topic, payload)?;
        Ok(())
    }

    fn wrap(&self, topic: String, action: Action) -> ActionFn {
        let completed = self.on_call_completed.clone();

        Arc::new(move |payload: Value, source: Identity| -> ActionFuture {
            let action = action.clone();
            let topic = topic.clone();
            let completed = completed.clone();

            async move {
                let started = Instant::now();
                let caller = source.clone();
                let outcome = AssertUnwindSafe(async move { action(payload, caller).await })
                    .catch_unwind()
                    .await;

                let result = match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => {
                        warn!(topic = %topic, source = %source, error = %err, "Action failed");
                        Err(serialize_error(&err))
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(topic = %topic, source = %source, panic = %message, "Action panicked");
                        Err(SerializedError::new(PANIC_KIND, message))
                    }
                };

                completed.emit(&CallRecord {
                    topic,
                    source,
                    elapsed: started.elapsed(),
                    error_kind: result.as_ref().err().map(|e| e.error_kind.clone()),
                });
                result
            }
            .boxed()
        })
    }

    /// Track clients that reached the endpoint before the hooks were added.
    fn track_existing(&self, endpoint: &dyn ProviderEndpoint) {
        // Holding the list keeps a concurrent disconnection from running
        // between reading the endpoint and tracking what it returned.
        let mut tracked = self.presence.write();
        let mut seeded = Vec::new();
        for identity in endpoint.connections() {
            if track_in(&mut tracked, &identity, None) {
                seeded.push(identity);
            }
        }
        drop(tracked);

        for identity in seeded {
            debug!(identity = %identity, "Tracking client connected before registration");
            announce_deferred(self.presence.clone(), identity);
        }
    }

    fn connection_hook(&self) -> tenvis_switchboard_transport::ConnectionHook {
        let presence = self.presence.clone();

        Arc::new(move |identity: &Identity, payload: Option<&ConnectPayload>| {
            let version = payload.and_then(ConnectPayload::version).map(str::to_string);
            match &version {
                Some(version) => {
                    info!(identity = %identity, version = %version, "Connection from client")
                }
                None => warn!(
                    identity = %identity,
                    "Connection from client, unable to determine version"
                ),
            }

            if presence.track(identity, version) {
                announce_deferred(presence.clone(), identity.clone());
            }
        })
    }

    fn disconnection_hook(&self) -> tenvis_switchboard_transport::DisconnectionHook {
        let presence = self.presence.clone();
        Arc::new(move |identity: &Identity| presence.forget(identity))
    }
}

fn track_in(tracked: &mut Vec<Tracked>, identity: &Identity, version: Option<String>) -> bool {
    if tracked.iter().any(|t| t.connection.identity == *identity) {
        return false;
    }
    tracked.push(Tracked {
        connection: ClientConnection {
            identity: identity.clone(),
            version,
        },
        announced: false,
    });
    true
}

/// Announce a connection on a later scheduling turn.
///
/// The transport reports a connection slightly before the client can be
/// called back; deferring lets subscribers contact the client right away.
fn announce_deferred(presence: Arc<Presence>, identity: Identity) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::task::yield_now().await;
                presence.announce(&identity);
            });
        }
        Err(_) => presence.announce(&identity),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Action panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookupError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tenvis_switchboard_transport::{EndpointCore, LocalBus, TransportError};
    use tokio::sync::oneshot;

    const SERVICE: &str = "switchboard-test";

    fn ping_and_fail() -> ActionSet {
        ActionSet::new()
            .add_sync("ping", |_payload, _source| Ok(json!("pong")))
            .add("fail", |_payload, _source| async {
                Err::<Value, ActionError>(anyhow::anyhow!("boom").into())
            })
    }

    async fn registered(actions: ActionSet) -> (LocalBus, Arc<Dispatcher>) {
        let bus = LocalBus::new();
        let dispatcher = Arc::new(Dispatcher::new(SERVICE));
        dispatcher.register_actions(&bus, actions).await.unwrap();
        (bus, dispatcher)
    }

    fn remote_error(result: Result<Value, TransportError>) -> SerializedError {
        match result {
            Err(TransportError::Remote(err)) => err,
            other => panic!("Expected remote failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_is_serialized() {
        let (bus, _dispatcher) = registered(ping_and_fail()).await;
        let client = bus.connect(SERVICE, Identity::new("app", "w"), None).unwrap();

        assert_eq!(client.dispatch("ping", json!(null)).await.unwrap(), json!("pong"));

        let err = remote_error(client.dispatch("fail", json!(null)).await);
        assert_eq!(err.message, "boom");
        assert_eq!(err.error_kind, "Error");
    }

    #[tokio::test]
    async fn test_async_and_sync_results_are_equal() {
        let actions = ActionSet::new()
            .add_sync("sync", |_payload, _source| Ok(json!({"v": 1})))
            .add("deferred", |_payload, _source| async {
                tokio::task::yield_now().await;
                Ok::<Value, ActionError>(json!({"v": 1}))
            });
        let (bus, _dispatcher) = registered(actions).await;
        let client = bus.connect(SERVICE, Identity::new("app", "w"), None).unwrap();

        let sync = client.dispatch("sync", json!(null)).await.unwrap();
        let deferred = client.dispatch("deferred", json!(null)).await.unwrap();
        assert_eq!(sync, json!({"v": 1}));
        assert_eq!(sync, deferred);
    }

    #[tokio::test]
    async fn test_typed_action_and_invalid_payload() {
        #[derive(serde::Deserialize)]
        struct Add {
            a: i64,
            b: i64,
        }

        let actions = ActionSet::new().add_typed("add", |payload: Add, _source| async move {
            Ok::<_, ActionError>(payload.a + payload.b)
        });
        let (bus, _dispatcher) = registered(actions).await;
        let client = bus.connect(SERVICE, Identity::new("app", "w"), None).unwrap();

        assert_eq!(
            client.dispatch("add", json!({"a": 2, "b": 3})).await.unwrap(),
            json!(5)
        );

        let err = remote_error(client.dispatch("add", json!({"a": "x"})).await);
        assert_eq!(err.error_kind, "InvalidPayload");
    }

    #[tokio::test]
    async fn test_typed_result_encoding_failure() {
        let actions = ActionSet::new().add_typed("keys", |_payload: Value, _source| async move {
            Ok::<_, ActionError>(BTreeMap::from([(vec![1u8, 2], 3u8)]))
        });
        let (bus, _dispatcher) = registered(actions).await;
        let client = bus.connect(SERVICE, Identity::new("app", "w"), None).unwrap();

        let err = remote_error(client.dispatch("keys", json!({})).await);
        assert_eq!(err.error_kind, crate::error::INVALID_RESULT_KIND);
    }

    #[tokio::test]
    async fn test_lookup_error_kind_preserved() {
        let actions = ActionSet::new().add_sync("lookup", |_payload, _source| {
            Err(LookupError::ChannelDoesNotExist("nonexistent".into()).into())
        });
        let (bus, _dispatcher) = registered(actions).await;
        let client = bus.connect(SERVICE, Identity::new("app", "w"), None).unwrap();

        let err = remote_error(client.dispatch("lookup", json!(null)).await);
        assert_eq!(err.error_kind, "ChannelDoesNotExist");
    }

    #[tokio::test]
    async fn test_panicking_action_is_contained() {
        let actions = ActionSet::new()
            .add_sync("explode", |_payload, _source| panic!("kaboom"))
            .add_sync("ping", |_payload, _source| Ok(json!("pong")));
        let (bus, _dispatcher) = registered(actions).await;
        let client = bus.connect(SERVICE, Identity::new("app", "w"), None).unwrap();

        let err = remote_error(client.dispatch("explode", json!(null)).await);
        assert_eq!(err.error_kind, PANIC_KIND);
        assert_eq!(err.message, "kaboom");

        assert_eq!(client.dispatch("ping", json!(null)).await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_overlapping_calls_do_not_serialize() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let actions = ActionSet::new()
            .add("slow", move |_payload, _source| {
                let release_rx = release_rx.clone();
                async move {
                    let rx = release_rx.lock().await.take();
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok::<Value, ActionError>(json!("slow"))
                }
            })
            .add_sync("fast", |_payload, _source| Ok(json!("fast")));
        let (bus, _dispatcher) = registered(actions).await;
        let slow_client = bus.connect(SERVICE, Identity::new("app", "slow"), None).unwrap();
        let fast_client = bus.connect(SERVICE, Identity::new("app", "fast"), None).unwrap();

        let slow = tokio::spawn(async move { slow_client.dispatch("slow", json!(null)).await });
        tokio::task::yield_now().await;

        assert_eq!(fast_client.dispatch("fast", json!(null)).await.unwrap(), json!("fast"));
        assert!(!slow.is_finished());

        release_tx.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap(), json!("slow"));
    }

    #[tokio::test]
    async fn test_connection_signal_deferred_without_version() {
        let (bus, dispatcher) = registered(ping_and_fail()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher
            .on_connection
            .add(move |identity: &Identity| sink.lock().unwrap().push(identity.clone()));

        let identity = Identity::new("app", "w");
        let _client = bus.connect(SERVICE, identity.clone(), None).unwrap();

        // Tracked immediately, announced on a later turn.
        assert!(dispatcher.is_client_connection(&identity));
        assert!(seen.lock().unwrap().is_empty());

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![identity.clone()]);
        assert_eq!(
            dispatcher.get_client_connections(),
            vec![ClientConnection {
                identity,
                version: None
            }]
        );
    }

    #[tokio::test]
    async fn test_connection_version_recorded() {
        let (bus, dispatcher) = registered(ping_and_fail()).await;
        let identity = Identity::new("app", "w");
        let _client = bus
            .connect(SERVICE, identity, Some(ConnectPayload::with_version("3.0.1")))
            .unwrap();

        let connections = dispatcher.get_client_connections();
        assert_eq!(connections[0].version.as_deref(), Some("3.0.1"));
    }

    #[tokio::test]
    async fn test_disconnection_is_synchronous() {
        let (bus, dispatcher) = registered(ping_and_fail()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher
            .on_disconnection
            .add(move |identity: &Identity| sink.lock().unwrap().push(identity.clone()));

        let identity = Identity::new("app", "w");
        let client = bus.connect(SERVICE, identity.clone(), None).unwrap();
        client.disconnect();

        assert_eq!(*seen.lock().unwrap(), vec![identity.clone()]);
        assert!(!dispatcher.is_client_connection(&identity));
        assert!(dispatcher.get_client_connections().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_disconnection_still_paired() {
        let (bus, dispatcher) = registered(ping_and_fail()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let connected = seen.clone();
        dispatcher.on_connection.add(move |identity: &Identity| {
            connected.lock().unwrap().push(("connect", identity.clone()))
        });
        let disconnected = seen.clone();
        dispatcher.on_disconnection.add(move |identity: &Identity| {
            disconnected
                .lock()
                .unwrap()
                .push(("disconnect", identity.clone()))
        });

        let identity = Identity::new("app", "brief");
        bus.connect(SERVICE, identity.clone(), None)
            .unwrap()
            .disconnect();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("connect", identity.clone()), ("disconnect", identity)]
        );
    }

    #[tokio::test]
    async fn test_is_client_connection_matches_app_and_window() {
        let (bus, dispatcher) = registered(ping_and_fail()).await;
        let _client = bus.connect(SERVICE, Identity::new("app", "w1"), None).unwrap();

        assert!(dispatcher.is_client_connection(&Identity::new("app", "w1")));
        assert!(!dispatcher.is_client_connection(&Identity::new("app", "w2")));
        assert!(!dispatcher.is_client_connection(&Identity::new("other", "w1")));
    }

    #[tokio::test]
    async fn test_call_records_emitted() {
        let (bus, dispatcher) = registered(ping_and_fail()).await;
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        dispatcher
            .on_call_completed
            .add(move |record: &CallRecord| sink.lock().unwrap().push(record.clone()));

        let client = bus.connect(SERVICE, Identity::new("app", "w"), None).unwrap();
        let _ = client.dispatch("ping", json!(null)).await;
        let _ = client.dispatch("fail", json!(null)).await;

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].topic, "ping");
        assert!(records[0].error_kind.is_none());
        assert_eq!(records[1].error_kind.as_deref(), Some("Error"));
    }

    #[tokio::test]
    async fn test_send_pushes_event() {
        let (bus, dispatcher) = registered(ping_and_fail()).await;
        let identity = Identity::new("app", "w");
        let mut client = bus.connect(SERVICE, identity.clone(), None).unwrap();

        dispatcher.send(&identity, "context", json!({"x": 1})).unwrap();
        assert_eq!(
            client.next_event().await,
            Some(("context".to_string(), json!({"x": 1})))
        );

        let stranger = Identity::new("app", "nobody");
        assert!(matches!(
            dispatcher.send(&stranger, "context", json!(null)),
            Err(DispatchError::Transport(TransportError::NotConnected(_)))
        ));
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let (bus, dispatcher) = registered(ping_and_fail()).await;
        assert!(matches!(
            dispatcher.register_actions(&bus, ping_and_fail()).await,
            Err(DispatchError::AlreadyRegistered)
        ));
    }

    struct BrokenBus;

    #[async_trait]
    impl Bus for BrokenBus {
        async fn create_provider(
            &self,
            _service: &str,
        ) -> Result<Arc<dyn ProviderEndpoint>, TransportError> {
            Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "address in use",
            )))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_endpoint_creation_failure_is_fatal() {
        let dispatcher = Dispatcher::new(SERVICE);
        assert!(matches!(
            dispatcher.register_actions(&BrokenBus, ping_and_fail()).await,
            Err(DispatchError::EndpointCreation(_))
        ));
        assert!(dispatcher.endpoint().is_none());
        assert!(matches!(
            dispatcher.send(&Identity::new("app", "w"), "x", json!(null)),
            Err(DispatchError::NotRegistered)
        ));
    }

    /// A bus whose endpoint already holds a client when it is handed over.
    struct EagerBus {
        client: Identity,
        outbound: Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<switchboard_protocol::Frame>>>,
    }

    #[async_trait]
    impl Bus for EagerBus {
        async fn create_provider(
            &self,
            service: &str,
        ) -> Result<Arc<dyn ProviderEndpoint>, TransportError> {
            let core = Arc::new(EndpointCore::new(service));
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            core.accept(self.client.clone(), None, tx)?;
            *self.outbound.lock().unwrap() = Some(rx);
            Ok(core)
        }

        fn name(&self) -> &'static str {
            "eager"
        }
    }

    #[tokio::test]
    async fn test_clients_present_before_registration_are_tracked() {
        let client = Identity::new("app", "early");
        let bus = EagerBus {
            client: client.clone(),
            outbound: Mutex::new(None),
        };
        let dispatcher = Dispatcher::new(SERVICE);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher
            .on_connection
            .add(move |identity: &Identity| sink.lock().unwrap().push(identity.clone()));

        dispatcher.register_actions(&bus, ping_and_fail()).await.unwrap();
        assert!(dispatcher.is_client_connection(&client));

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![client.clone()]);

        dispatcher.send(&client, "hello", json!(1)).unwrap();
        assert!(bus.outbound.lock().unwrap().as_mut().unwrap().try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_endpoint_started_after_registration() {
        let bus = LocalBus::new();
        let dispatcher = Dispatcher::new(SERVICE);
        assert!(bus.connect(SERVICE, Identity::new("app", "w"), None).is_err());

        dispatcher.register_actions(&bus, ping_and_fail()).await.unwrap();
        let client = bus.connect(SERVICE, Identity::new("app", "w"), None).unwrap();
        assert_eq!(client.dispatch("ping", json!(null)).await.unwrap(), json!("pong"));
    }

    #[test]
    fn test_action_set_topics() {
        let actions = ping_and_fail().add_sync("ping", |_payload, _source| Ok(json!(1)));
        assert_eq!(actions.topics().collect::<Vec<_>>(), vec!["fail", "ping"]);
        assert_eq!(actions.len(), 2);
    }
}
