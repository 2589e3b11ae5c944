use crate::configuration::Configuration;
use crate::gateway::Event;
use crate::gateway::Event::NoMoreConfiguration;
use crate::gateway::Event::NoMoreSchema;
use crate::gateway::Event::Shutdown;
use crate::gateway::Event::UpdateConfiguration;
use crate::gateway::Event::UpdateSchema;
use crate::gateway::GatewayError;
use crate::gateway::GatewayError::NoConfiguration;
use crate::gateway::GatewayError::NoSchema;
use crate::gateway::SchemaUpdate;
use crate::gateway::State;
use crate::http_server_factory::HttpServerFactory;
use crate::http_server_factory::HttpServerHandle;
use crate::router_factory::RouterServiceFactory;
use crate::state_machine::PrivateState::Errored;
use crate::state_machine::PrivateState::Running;
use crate::state_machine::PrivateState::Startup;
use crate::state_machine::PrivateState::Stopped;
use futures::channel::mpsc;
use futures::prelude::*;
use std::sync::Arc;

/// This state maintains private information that is not exposed to the user via state listener.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
#[allow(clippy::large_enum_variant)]
enum PrivateState<RS> {
    Startup {
        configuration: Option<Configuration>,
        schema: Option<SchemaUpdate>,
    },
    Running {
        configuration: Arc<Configuration>,
        schema: SchemaUpdate,
        #[derivative(Debug = "ignore")]
        router_service: RS,
        server_handle: HttpServerHandle,
    },
    Stopped,
    Errored(GatewayError),
}

/// A state machine that responds to events to control the lifecycle of the server.
/// The server is in startup state until both configuration and schema are supplied.
/// If config and schema are not supplied then the machine ends with an error.
/// Once schema and config are obtained running state is entered.
/// Config and schema updates will recreate the router and restart the http server, reusing the
/// listening socket when the listen address did not change.
/// At any point a shutdown event will cause the machine to try to get to stopped state.
pub(crate) struct StateMachine<S, FA>
where
    S: HttpServerFactory,
    FA: RouterServiceFactory,
{
    http_server_factory: S,
    state_listener: Option<mpsc::Sender<State>>,
    router_factory: FA,
}

impl<RS> From<&PrivateState<RS>> for State {
    fn from(private_state: &PrivateState<RS>) -> Self {
        match private_state {
            Startup { .. } => State::Startup,
            Running { server_handle, .. } => State::Running(server_handle.listen_address()),
            Stopped => State::Stopped,
            Errored { .. } => State::Errored,
        }
    }
}

impl<S, FA> StateMachine<S, FA>
where
    S: HttpServerFactory,
    FA: RouterServiceFactory + Send,
{
    pub(crate) fn new(
        http_server_factory: S,
        state_listener: Option<mpsc::Sender<State>>,
        router_factory: FA,
    ) -> Self {
        Self {
            http_server_factory,
            state_listener,
            router_factory,
        }
    }

    pub(crate) async fn process_events(
        mut self,
        mut messages: impl Stream<Item = Event> + Unpin,
    ) -> Result<(), GatewayError> {
        tracing::debug!("Starting");
        let mut state = Startup {
            configuration: None,
            schema: None,
        };
        let mut state_listener = self.state_listener.take();
        let initial_state = State::from(&state);
        <StateMachine<S, FA>>::notify_state_listener(&mut state_listener, initial_state).await;
        while let Some(message) = messages.next().await {
            let last_public_state = State::from(&state);
            let new_state = match (state, message) {
                // Startup: Handle schema updates, maybe transition to running.
                (Startup { configuration, .. }, UpdateSchema(new_schema)) => self
                    .maybe_transition_to_running(Startup {
                        configuration,
                        schema: Some(new_schema),
                    })
                    .await
                    .into_ok_or_err2(),

                // Startup: Handle configuration updates, maybe transition to running.
                (Startup { schema, .. }, UpdateConfiguration(new_configuration)) => self
                    .maybe_transition_to_running(Startup {
                        configuration: Some(*new_configuration),
                        schema,
                    })
                    .await
                    .into_ok_or_err2(),

                // Startup: Missing configuration.
                (
                    Startup {
                        configuration: None,
                        ..
                    },
                    NoMoreConfiguration,
                ) => Errored(NoConfiguration),

                // Startup: Missing schema.
                (Startup { schema: None, .. }, NoMoreSchema) => Errored(NoSchema),

                // Startup: Go straight for shutdown.
                (Startup { .. }, Shutdown) => Stopped,

                // Running: Handle shutdown.
                (Running { server_handle, .. }, Shutdown) => {
                    tracing::debug!("Shutting down");
                    match server_handle.shutdown().await {
                        Ok(_) => Stopped,
                        Err(err) => Errored(err),
                    }
                }

                // Running: Handle schema updates
                (
                    Running {
                        configuration,
                        schema,
                        router_service,
                        server_handle,
                    },
                    UpdateSchema(new_schema),
                ) => {
                    tracing::info!("Reloading schema");
                    self.reload_server(
                        configuration,
                        schema,
                        router_service,
                        server_handle,
                        None,
                        Some(new_schema),
                    )
                    .await
                    .into_ok_or_err2()
                }

                // Running: Handle configuration updates
                (
                    Running {
                        configuration,
                        schema,
                        router_service,
                        server_handle,
                    },
                    UpdateConfiguration(new_configuration),
                ) => {
                    tracing::info!("Reloading configuration");
                    self.reload_server(
                        configuration,
                        schema,
                        router_service,
                        server_handle,
                        Some(Arc::new(*new_configuration)),
                        None,
                    )
                    .await
                    .into_ok_or_err2()
                }

                // Anything else we don't care about
                (state, message) => {
                    tracing::debug!("Ignoring message transition {:?}", message);
                    state
                }
            };

            let new_public_state = State::from(&new_state);
            if last_public_state != new_public_state {
                <StateMachine<S, FA>>::notify_state_listener(&mut state_listener, new_public_state)
                    .await;
            }
            tracing::debug!("Transitioned to state {:?}", &new_state);
            state = new_state;

            // If we've errored then exit even if there are potentially more messages
            if matches!(&state, Errored(_)) {
                break;
            }
        }
        tracing::debug!("Stopped");

        match state {
            Stopped => Ok(()),
            Errored(err) => Err(err),
            _ => {
                panic!("Must finish on stopped or errored state.")
            }
        }
    }

    async fn notify_state_listener(
        state_listener: &mut Option<mpsc::Sender<State>>,
        new_public_state: State,
    ) {
        if let Some(state_listener) = state_listener {
            let _ = state_listener.send(new_public_state).await;
        }
    }

    async fn maybe_transition_to_running(
        &self,
        state: PrivateState<<FA as RouterServiceFactory>::RouterService>,
    ) -> Result<
        PrivateState<<FA as RouterServiceFactory>::RouterService>,
        PrivateState<<FA as RouterServiceFactory>::RouterService>,
    > {
        if let Startup {
            configuration: Some(configuration),
            schema: Some(schema),
        } = state
        {
            tracing::debug!("Starting http");
            let configuration = Arc::new(configuration);
            let router = self
                .router_factory
                .create(configuration.clone(), schema.clone(), None)
                .await
                .map_err(|err| {
                    tracing::error!("Cannot create the router: {}", err);
                    Errored(GatewayError::ServiceCreationError(err))
                })?;

            let server_handle = self
                .http_server_factory
                .create(router.clone(), configuration.clone(), None)
                .await
                .map_err(|err| {
                    tracing::error!("Cannot start the server: {}", err);
                    Errored(err)
                })?;

            Ok(Running {
                configuration,
                schema,
                router_service: router,
                server_handle,
            })
        } else {
            Ok(state)
        }
    }

    async fn reload_server(
        &self,
        configuration: Arc<Configuration>,
        schema: SchemaUpdate,
        router_service: <FA as RouterServiceFactory>::RouterService,
        server_handle: HttpServerHandle,
        new_configuration: Option<Arc<Configuration>>,
        new_schema: Option<SchemaUpdate>,
    ) -> Result<
        PrivateState<<FA as RouterServiceFactory>::RouterService>,
        PrivateState<<FA as RouterServiceFactory>::RouterService>,
    > {
        let new_schema = new_schema.unwrap_or_else(|| schema.clone());
        let new_configuration = new_configuration.unwrap_or_else(|| configuration.clone());
        match self
            .router_factory
            .create(
                new_configuration.clone(),
                new_schema.clone(),
                Some(&router_service),
            )
            .await
        {
            Ok(new_router_service) => {
                // a reload that brings back the same configuration and the
                // same router must not restart the server: restarting drains
                // every established client connection
                if Arc::ptr_eq(&configuration, &new_configuration)
                    && self
                        .router_factory
                        .is_unchanged(&router_service, &new_router_service)
                {
                    tracing::debug!("router unchanged, keeping the current server");
                    return Ok(Running {
                        configuration,
                        schema: new_schema,
                        router_service: new_router_service,
                        server_handle,
                    });
                }

                let server_handle = server_handle
                    .restart(
                        &self.http_server_factory,
                        new_router_service.clone(),
                        new_configuration.clone(),
                    )
                    .await
                    .map_err(|err| {
                        tracing::error!("Cannot start the server: {}", err);
                        Errored(err)
                    })?;
                Ok(Running {
                    configuration: new_configuration,
                    schema: new_schema,
                    router_service: new_router_service,
                    server_handle,
                })
            }
            Err(err) => {
                tracing::error!(
                    "Cannot create new router, keeping previous configuration: {}",
                    err
                );
                Err(Running {
                    configuration,
                    schema,
                    router_service,
                    server_handle,
                })
            }
        }
    }
}

trait ResultExt<T> {
    // Unstable method can be deleted in future
    fn into_ok_or_err2(self) -> T;
}

impl<T> ResultExt<T> for Result<T, T> {
    fn into_ok_or_err2(self) -> T {
        match self {
            Ok(v) => v,
            Err(v) => v,
        }
    }
}
