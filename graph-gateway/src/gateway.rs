//! Starting and stopping the gateway: event sources, lifecycle states and
//! the handle the host program drives the server with.

use crate::axum_http_server_factory::AxumHttpServerFactory;
use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::files;
use crate::router_factory::GraphRouterFactory;
use crate::state_machine::StateMachine;
use derivative::Derivative;
use derive_more::Display;
use derive_more::From;
use displaydoc::Display as DisplayDoc;
use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::prelude::*;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;
use thiserror::Error;
use tokio::task::spawn;
use typed_builder::TypedBuilder;
use Event::*;

/// Error types for the gateway.
#[derive(Error, Debug, DisplayDoc)]
pub enum GatewayError {
    /// failed to start server
    StartupError,

    /// failed to stop HTTP server
    HttpServerLifecycleError,

    /// no valid configuration was supplied
    NoConfiguration,

    /// no valid schema was supplied
    NoSchema,

    /// could not create the router: {0}
    ServiceCreationError(tower::BoxError),

    /// could not create the HTTP server: {0}
    ServerCreationError(std::io::Error),
}

/// The subgraph schemas the supergraph is composed from.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaUpdate {
    /// Ask every configured subgraph for its SDL and compose the results.
    Introspect,

    /// Compose from SDL supplied up front, as (subgraph name, SDL) pairs.
    Static(Vec<(String, String)>),
}

/// How the supergraph schema is obtained.
#[derive(Display, Debug)]
pub enum SchemaSource {
    /// Introspect the schema out of the running subgraphs, through
    /// `{ _service { sdl } }`. With a poll interval the subgraphs are asked
    /// again periodically and the supergraph recomposed on changes.
    #[display(fmt = "Introspect")]
    Introspect { poll_interval: Option<Duration> },

    /// A fixed set of subgraph SDLs, composed once at startup.
    #[display(fmt = "Static")]
    Static { subgraphs: Vec<(String, String)> },
}

impl SchemaSource {
    /// Convert this schema source into a stream regardless of if is static or
    /// not. Allows for unified handling later.
    fn into_stream(self) -> impl Stream<Item = Event> {
        match self {
            SchemaSource::Introspect {
                poll_interval: None,
            } => stream::once(future::ready(UpdateSchema(SchemaUpdate::Introspect))).boxed(),
            SchemaSource::Introspect {
                poll_interval: Some(period),
            } => {
                // the first tick fires immediately and provides the startup
                // schema, later ticks drive re-composition
                stream::unfold(tokio::time::interval(period), |mut interval| async move {
                    interval.tick().await;
                    Some((UpdateSchema(SchemaUpdate::Introspect), interval))
                })
                .boxed()
            }
            SchemaSource::Static { subgraphs } => stream::once(future::ready(UpdateSchema(
                SchemaUpdate::Static(subgraphs),
            )))
            .boxed(),
        }
        .chain(stream::iter(vec![NoMoreSchema]))
    }
}

type ConfigurationStream = Pin<Box<dyn Stream<Item = Configuration> + Send>>;

/// The user supplied config. Either a static instance or a stream for hot reloading.
#[derive(From, Display, Derivative)]
#[derivative(Debug)]
pub enum ConfigurationSource {
    /// A static configuration.
    #[display(fmt = "Instance")]
    Instance(Box<Configuration>),

    /// A configuration stream where the gateway will react to new configuration.
    #[display(fmt = "Stream")]
    Stream(#[derivative(Debug = "ignore")] ConfigurationStream),

    /// A YAML file that may be watched for changes.
    #[display(fmt = "File")]
    File {
        /// The path of the configuration file.
        path: PathBuf,

        /// `true` to watch the file for changes and hot apply them.
        watch: bool,
    },
}

impl From<Configuration> for ConfigurationSource {
    fn from(configuration: Configuration) -> Self {
        ConfigurationSource::Instance(configuration.boxed())
    }
}

impl ConfigurationSource {
    /// Convert this config into a stream regardless of if is static or not. Allows for unified handling later.
    fn into_stream(self) -> impl Stream<Item = Event> {
        match self {
            ConfigurationSource::Instance(instance) => {
                stream::iter(vec![UpdateConfiguration(instance)]).boxed()
            }
            ConfigurationSource::Stream(stream) => {
                stream.map(|x| UpdateConfiguration(x.boxed())).boxed()
            }
            ConfigurationSource::File { path, watch } => {
                // Sanity check, does the config file exists, if it doesn't then bail.
                if !path.exists() {
                    tracing::error!(
                        "configuration file at path '{}' does not exist.",
                        path.to_string_lossy()
                    );
                    stream::empty().boxed()
                } else {
                    match ConfigurationSource::read_config(&path) {
                        Ok(configuration) => {
                            if watch {
                                files::watch(&path)
                                    .filter_map(move |_| {
                                        future::ready(
                                            ConfigurationSource::read_config(&path)
                                                .map_err(|err| {
                                                    tracing::error!(
                                                        "invalid configuration: {}",
                                                        err
                                                    )
                                                })
                                                .ok(),
                                        )
                                    })
                                    .map(UpdateConfiguration)
                                    .boxed()
                            } else {
                                stream::once(future::ready(UpdateConfiguration(configuration)))
                                    .boxed()
                            }
                        }
                        Err(err) => {
                            tracing::error!("invalid configuration: {}", err);
                            stream::empty().boxed()
                        }
                    }
                }
            }
        }
        .chain(stream::iter(vec![NoMoreConfiguration]))
        .boxed()
    }

    fn read_config(path: &Path) -> Result<Box<Configuration>, ConfigurationError> {
        let config = std::fs::read_to_string(path)?;
        Ok(config.parse::<Configuration>()?.boxed())
    }
}

type ShutdownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The user supplied shutdown hook.
#[derive(Display, Derivative)]
#[derivative(Debug)]
pub enum ShutdownSource {
    /// No graceful shutdown
    #[display(fmt = "None")]
    None,

    /// A custom shutdown future.
    #[display(fmt = "Custom")]
    Custom(#[derivative(Debug = "ignore")] ShutdownFuture),

    /// Watch for termination signals: Ctl-C, and SIGTERM on unix.
    #[display(fmt = "CtrlC")]
    CtrlC,
}

/// Resolve when the process is asked to terminate, by Ctrl-C or, on unix,
/// SIGTERM as sent by process supervisors.
#[cfg(unix)]
async fn termination_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM signal handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        result = tokio::signal::ctrl_c() => {
            result.expect("Failed to install CTRL+C signal handler");
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
}

impl ShutdownSource {
    /// Convert this shutdown hook into a future. Allows for unified handling later.
    fn into_stream(self) -> impl Stream<Item = Event> {
        match self {
            ShutdownSource::None => stream::pending::<Event>().boxed(),
            ShutdownSource::Custom(future) => future.map(|_| Shutdown).into_stream().boxed(),
            ShutdownSource::CtrlC => termination_signal()
                .map(|_| Shutdown)
                .into_stream()
                .boxed(),
        }
    }
}

/// The gateway takes GraphQL requests and federates a response from calls to
/// the subgraphs.
///
/// # Examples
///
/// ```ignore
/// let gateway = GraphGateway::builder()
///     .configuration(Configuration::default())
///     .schema(SchemaSource::Introspect { poll_interval: None })
///     .shutdown(ShutdownSource::CtrlC)
///     .build();
/// let handle = gateway.serve();
/// handle.await;
/// ```
#[derive(TypedBuilder, Debug)]
#[builder(field_defaults(setter(into)))]
pub struct GraphGateway {
    /// The Configuration that the gateway will use. This can be static or a stream for hot reloading.
    configuration: ConfigurationSource,

    /// Where the subgraph schemas come from.
    schema: SchemaSource,

    /// A future that when resolved will shut down the server.
    #[builder(default = ShutdownSource::None)]
    shutdown: ShutdownSource,
}

/// Messages that are broadcast across the app.
#[derive(Debug, PartialEq)]
pub(crate) enum Event {
    /// The configuration was updated.
    UpdateConfiguration(Box<Configuration>),

    /// There are no more updates to the configuration
    NoMoreConfiguration,

    /// The schema was updated.
    UpdateSchema(SchemaUpdate),

    /// There are no more updates to the schema
    NoMoreSchema,

    /// The server should gracefully shutdown.
    Shutdown,
}

/// Public state that the client can be notified with via state listener
/// This is useful for waiting until the server is actually serving requests.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum State {
    /// The server is starting up.
    Startup,

    /// The server is running on a particular address.
    Running(SocketAddr),

    /// The server has stopped.
    Stopped,

    /// The server has errored.
    Errored,
}

/// A handle that allows the client to await for various server events.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct GatewayHandle {
    #[derivative(Debug = "ignore")]
    result: Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send>>,
    #[derivative(Debug = "ignore")]
    shutdown_sender: oneshot::Sender<()>,
    #[derivative(Debug = "ignore")]
    state_receiver: Option<mpsc::Receiver<State>>,
}

impl GatewayHandle {
    /// Wait until the server is ready and return the socket address that it is listening on.
    /// If the socket address has been configured to port zero the OS will choose the port.
    /// The socket address returned is the actual port that was bound.
    ///
    /// This method can only be called once, and is not designed for use in dynamic configuration
    /// scenarios.
    pub async fn ready(&mut self) -> Option<SocketAddr> {
        self.state_receiver()
            .filter_map(|state| {
                future::ready(match state {
                    State::Running(socket) => Some(socket),
                    _ => None,
                })
            })
            .next()
            .boxed()
            .await
    }

    /// Return a receiver of lifecycle events for the server. This method may only be called once.
    pub fn state_receiver(&mut self) -> mpsc::Receiver<State> {
        self.state_receiver.take().expect(
            "State listener has already been taken. 'ready' or 'state' may be called once only.",
        )
    }

    /// Trigger and wait until the server has shut down.
    pub async fn shutdown(mut self) -> Result<(), GatewayError> {
        self.maybe_close_state_receiver();
        if self.shutdown_sender.send(()).is_err() {
            tracing::error!("Failed to send shutdown event")
        }
        self.result.await
    }

    /// If the state receiver has not been set it must be closed otherwise it'll block the
    /// state machine from progressing.
    fn maybe_close_state_receiver(&mut self) {
        if let Some(mut state_receiver) = self.state_receiver.take() {
            state_receiver.close();
        }
    }
}

impl Future for GatewayHandle {
    type Output = Result<(), GatewayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.maybe_close_state_receiver();
        self.result.poll_unpin(cx)
    }
}

impl GraphGateway {
    /// Start the gateway.
    ///
    /// The returned handle allows the user to await until the server is ready and shutdown.
    /// Alternatively the user can await on the handle itself to wait for shutdown via the
    /// configured shutdown mechanism.
    pub fn serve(self) -> GatewayHandle {
        let (state_listener, state_receiver) = mpsc::channel::<State>(1);
        let server_factory = AxumHttpServerFactory::new();
        let router_factory = GraphRouterFactory::default();
        let state_machine =
            StateMachine::new(server_factory, Some(state_listener), router_factory);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
        let result = spawn(async {
            state_machine
                .process_events(self.generate_event_stream(shutdown_receiver))
                .await
        })
        .map(|r| match r {
            Ok(Ok(ok)) => Ok(ok),
            Ok(Err(err)) => Err(err),
            Err(_err) => Err(GatewayError::StartupError),
        })
        .boxed();

        GatewayHandle {
            result,
            shutdown_sender,
            state_receiver: Some(state_receiver),
        }
    }

    /// Create the unified event stream.
    /// This merges all contributing streams and sets up shutdown handling.
    /// When a shutdown message is received no more events are emitted.
    fn generate_event_stream(
        self,
        shutdown_receiver: oneshot::Receiver<()>,
    ) -> impl Stream<Item = Event> {
        // Chain is required so that the final shutdown message is sent.
        stream::select_all(vec![
            self.shutdown.into_stream().boxed(),
            self.configuration.into_stream().boxed(),
            self.schema.into_stream().boxed(),
            shutdown_receiver.into_stream().map(|_| Shutdown).boxed(),
        ])
        .take_while(|msg| future::ready(msg != &Shutdown))
        .chain(stream::iter(vec![Shutdown]))
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::tests::create_temp_file;
    use crate::files::tests::write_and_flush;
    use std::env::temp_dir;
    use test_log::test;

    const CONFIG: &str = r#"
server:
  listen: 127.0.0.1:0
subgraphs:
  user:
    routing_url: http://localhost:4002/graphql
"#;

    #[test(tokio::test)]
    async fn config_by_file_watching() {
        let (path, mut file) = create_temp_file();
        let configuration = CONFIG.parse::<Configuration>().unwrap();
        write_and_flush(&mut file, CONFIG).await;
        let mut stream = ConfigurationSource::File { path, watch: true }
            .into_stream()
            .boxed();

        // First update is guaranteed
        assert_eq!(
            stream.next().await.unwrap(),
            UpdateConfiguration(configuration.clone().boxed())
        );

        // Modify the file and try again
        write_and_flush(&mut file, CONFIG).await;
        assert_eq!(
            stream.next().await.unwrap(),
            UpdateConfiguration(configuration.boxed())
        );

        // This time write garbage, there should not be an update.
        write_and_flush(&mut file, ":").await;
        assert!(stream.into_future().now_or_never().is_none());
    }

    #[test(tokio::test)]
    async fn config_by_file_invalid() {
        let (path, mut file) = create_temp_file();
        write_and_flush(&mut file, "garbage: garbage").await;
        let mut stream = ConfigurationSource::File { path, watch: true }.into_stream();

        // First update fails because the file is invalid.
        assert_eq!(stream.next().await.unwrap(), NoMoreConfiguration);
    }

    #[test(tokio::test)]
    async fn config_by_file_missing() {
        let mut stream = ConfigurationSource::File {
            path: temp_dir().join("does_not_exist"),
            watch: true,
        }
        .into_stream();

        // First update fails because the file is missing.
        assert_eq!(stream.next().await.unwrap(), NoMoreConfiguration);
    }

    #[test(tokio::test)]
    async fn config_by_file_no_watch() {
        let (path, mut file) = create_temp_file();
        let configuration = CONFIG.parse::<Configuration>().unwrap();
        write_and_flush(&mut file, CONFIG).await;

        let mut stream = ConfigurationSource::File { path, watch: false }.into_stream();
        assert_eq!(
            stream.next().await.unwrap(),
            UpdateConfiguration(configuration.boxed())
        );
        assert_eq!(stream.next().await.unwrap(), NoMoreConfiguration);
    }

    #[test(tokio::test)]
    async fn static_schema_emits_once() {
        let subgraphs = vec![("user".to_string(), "type Query { me: ID }".to_string())];
        let mut stream = SchemaSource::Static {
            subgraphs: subgraphs.clone(),
        }
        .into_stream();

        assert_eq!(
            stream.next().await.unwrap(),
            UpdateSchema(SchemaUpdate::Static(subgraphs))
        );
        assert_eq!(stream.next().await.unwrap(), NoMoreSchema);
        assert_eq!(stream.next().await, None);
    }

    #[test(tokio::test)]
    async fn introspection_without_polling_emits_once() {
        let mut stream = SchemaSource::Introspect {
            poll_interval: None,
        }
        .into_stream();

        assert_eq!(
            stream.next().await.unwrap(),
            UpdateSchema(SchemaUpdate::Introspect)
        );
        assert_eq!(stream.next().await.unwrap(), NoMoreSchema);
    }

    #[test(tokio::test)]
    async fn introspection_polling_keeps_ticking() {
        let mut stream = SchemaSource::Introspect {
            poll_interval: Some(Duration::from_millis(10)),
        }
        .into_stream();

        for _ in 0..3 {
            assert_eq!(
                stream.next().await.unwrap(),
                UpdateSchema(SchemaUpdate::Introspect)
            );
        }
    }

    #[cfg(unix)]
    #[test(tokio::test)]
    async fn sigterm_emits_shutdown() {
        let mut stream = ShutdownSource::CtrlC.into_stream().boxed();
        // the first poll installs the signal handlers
        assert!(futures::poll!(stream.next()).is_pending());

        unsafe { libc::raise(libc::SIGTERM) };
        assert_eq!(stream.next().await, Some(Shutdown));
    }

    #[test(tokio::test)]
    async fn shutdown_is_always_the_last_event() {
        let gateway = GraphGateway::builder()
            .configuration(Configuration::default())
            .schema(SchemaSource::Static { subgraphs: vec![] })
            .build();
        let (sender, receiver) = oneshot::channel::<()>();
        // dropping the sender counts as a shutdown signal
        drop(sender);

        let events = gateway
            .generate_event_stream(receiver)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(events.last(), Some(&Shutdown));
        assert!(events.contains(&NoMoreConfiguration));
        assert!(events.contains(&NoMoreSchema));
    }
}
