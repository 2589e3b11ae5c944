//! Main entry point for CLI command to start the gateway.

use anyhow::Context;
use anyhow::Result;
use futures::prelude::*;
use graph_gateway::Configuration;
use graph_gateway::ConfigurationSource;
use graph_gateway::GraphGateway;
use graph_gateway::SchemaSource;
use graph_gateway::ShutdownSource;
use graph_gateway::State;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

/// Options for the gateway
#[derive(StructOpt, Debug)]
#[structopt(name = "graph-gateway", about = "GraphQL federation gateway")]
struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[structopt(long = "log", default_value = "info", alias = "loglevel")]
    env_filter: String,

    /// Reload the configuration file automatically.
    #[structopt(short, long)]
    watch: bool,

    /// Configuration location.
    #[structopt(short, long = "config", parse(from_os_str), env)]
    configuration_path: Option<PathBuf>,

    /// Ask the subgraphs for their schema again every that many seconds and
    /// recompose the supergraph.
    #[structopt(long = "poll-interval")]
    poll_interval: Option<u64>,
}

fn main() -> Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(nb) = std::env::var("GATEWAY_NUM_CORES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        builder.worker_threads(nb);
    }
    let runtime = builder.build()?;
    runtime.block_on(rt_main())
}

async fn rt_main() -> Result<()> {
    let opt = Opt::from_args();

    let env_filter = std::env::var("RUST_LOG").ok().unwrap_or(opt.env_filter);

    let builder = tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::try_new(&env_filter).context("could not parse log")?);
    if atty::is(atty::Stream::Stdout) {
        builder.init();
    } else {
        builder.json().init();
    }

    let current_directory = std::env::current_dir()?;

    let configuration = opt
        .configuration_path
        .as_ref()
        .map(|path| {
            let path = if path.is_relative() {
                current_directory.join(path)
            } else {
                path.to_path_buf()
            };

            ConfigurationSource::File {
                path,
                watch: opt.watch,
            }
        })
        .unwrap_or_else(|| ConfigurationSource::from(Configuration::default()));

    let schema = SchemaSource::Introspect {
        poll_interval: opt.poll_interval.map(Duration::from_secs),
    };

    let gateway = GraphGateway::builder()
        .configuration(configuration)
        .schema(schema)
        .shutdown(ShutdownSource::CtrlC)
        .build();
    let mut gateway_handle = gateway.serve();
    gateway_handle
        .state_receiver()
        .for_each(|state| {
            match state {
                State::Startup => {
                    tracing::info!("Composing the supergraph from the subgraph schemas")
                }
                State::Running(address) => {
                    tracing::info!("🚀 Server ready at http://{}/", address)
                }
                State::Stopped => {
                    tracing::info!("Stopped")
                }
                State::Errored => {
                    tracing::info!("Stopped with error")
                }
            }
            future::ready(())
        })
        .await;

    if let Err(err) = gateway_handle.await {
        tracing::error!("{}", err);
        return Err(err.into());
    }

    Ok(())
}
