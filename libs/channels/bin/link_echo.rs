//! Echo server and request client over framed channels
//!
//! ```text
//! link-echo server --bind 127.0.0.1:7001
//! link-echo client --remote 127.0.0.1:7001 --count 5
//! link-echo --config config/link.toml server --name echo
//! ```
//!
//! Messages are UTF-8 text; the correlation key is the part before the first `:`.

use anyhow::{bail, Context, Result};
use channels::sinks::{FormatterSink, Utf8Formatter};
use channels::{
    Channel, ChannelBuilder, Delivery, Pipeline, ServerChannel, ServerChannelBuilder,
};
use clap::{Parser, Subcommand};
use link_config::{load_config, LinkConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Environment overlay (config/environments/<name>.toml)
    #[arg(long, global = true)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections and echo every message back to its sender
    Server {
        /// Server section to use from the configuration file
        #[arg(long)]
        name: Option<String>,

        /// Listen endpoint (`host:port` or `unix:/path`)
        #[arg(long, default_value = "127.0.0.1:7001")]
        bind: String,
    },
    /// Send keyed requests and wait for the echoed responses
    Client {
        /// Channel section to use from the configuration file
        #[arg(long)]
        name: Option<String>,

        /// Remote endpoint (`host:port` or `unix:/path`)
        #[arg(long, default_value = "127.0.0.1:7001")]
        remote: String,

        /// Number of requests
        #[arg(long, default_value_t = 3)]
        count: usize,

        /// Response timeout in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
}

fn correlator() -> impl Fn(&String) -> Option<String> + Send + Sync {
    |message: &String| message.split_once(':').map(|(key, _)| key.to_string())
}

fn pipeline() -> Pipeline<String> {
    Pipeline::new().with(FormatterSink::new(Utf8Formatter))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(Some(path.clone()), args.environment.as_deref())
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LinkConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.global.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Command::Server { name, bind } => {
            let builder = match name {
                Some(name) => {
                    let settings = config
                        .server(&name)
                        .with_context(|| format!("no [servers.{name}] section"))?;
                    ServerChannelBuilder::from_settings(settings)?
                }
                None => ServerChannel::builder().name("echo").bind(bind),
            };
            run_server(builder).await
        }
        Command::Client {
            name,
            remote,
            count,
            timeout_ms,
        } => {
            let builder = match name {
                Some(name) => {
                    let settings = config
                        .channel(&name)
                        .with_context(|| format!("no [channels.{name}] section"))?;
                    ChannelBuilder::from_settings(settings)?
                }
                None => Channel::builder().name("echo-client").endpoint(&remote)?,
            };
            run_client(builder, count, Duration::from_millis(timeout_ms)).await
        }
    }
}

async fn run_server(builder: ServerChannelBuilder<String>) -> Result<()> {
    let server = builder
        .pipeline(pipeline())
        .correlator(correlator())
        .start()
        .await?;
    info!(endpoint = %server.local_endpoint(), "Echo server ready");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            delivery = server.receive(None) => {
                let Some(Delivery::Received(descriptor)) = delivery? else {
                    continue;
                };
                let source = descriptor.source().clone();
                let operation = server.send_to(&source, descriptor.into_message());
                if operation.is_completed() && !operation.is_succeeded() {
                    warn!(%source, reason = ?operation.message(), "Echo failed");
                }
            }
        }
    }

    info!(
        accepted = server.accepted_connections(),
        rejected = server.rejected_connections(),
        "Shutting down"
    );
    server.close();
    Ok(())
}

async fn run_client(builder: ChannelBuilder<String>, count: usize, timeout: Duration) -> Result<()> {
    let channel = builder
        .pipeline(pipeline())
        .correlator(correlator())
        .build();
    channel.connect().await?;

    let mut failures = 0;
    for i in 0..count {
        let request = channel.send_expecting_response(format!("{i}:ping"), timeout, false, None)?;
        request.wait_completion(None, false).await;
        match request.response() {
            Some(response) => info!(%response, "Response received"),
            None => {
                failures += 1;
                warn!(request = i, reason = ?request.message(), "No response");
            }
        }
    }

    let stats = channel.stats();
    info!(
        sent = stats.messages_sent,
        received = stats.messages_received,
        "Client done"
    );
    channel.close();

    if failures > 0 {
        bail!("{failures} of {count} requests failed");
    }
    Ok(())
}
