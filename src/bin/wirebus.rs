//! Wirebus CLI - talk to a broker from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wirebus::{
    ActionFilter, Message, PublishOptions, RequestOptions, WirebusClient, WirebusConfig,
};

#[derive(Parser)]
#[command(name = "wirebus")]
#[command(about = "Wirebus CLI - publish, request and listen on a message bus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Broker URL
    #[arg(long, env = "WIREBUS_URL", default_value = "ws://localhost:8000", global = true)]
    url: String,

    /// Request timeout in milliseconds
    #[arg(long, env = "WIREBUS_TIMEOUT_MS", global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an event
    ///
    /// Examples:
    ///   wirebus publish test.event '{"status":"running"}'
    ///   wirebus publish test.event '{}' --wait
    Publish {
        topic: String,

        /// JSON object payload
        #[arg(default_value = "{}")]
        payload: String,

        /// Attach a request id and wait for a correlated reply
        #[arg(long)]
        wait: bool,
    },

    /// Send a request and print the reply
    ///
    /// Examples:
    ///   wirebus request test.echo '{"hello":"world"}'
    Request {
        topic: String,

        /// JSON object payload
        #[arg(default_value = "{}")]
        payload: String,
    },

    /// Print every message delivered on the given topics
    Listen {
        /// Topics to subscribe to
        #[arg(required = true)]
        topics: Vec<String>,

        /// Which actions to receive: publish, request, or all
        #[arg(long, default_value = "all", value_parser = parse_filter)]
        action: ActionFilter,

        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// Register as a service and echo every request on a topic
    ///
    /// Each echoed request is also republished on `<topic>.handled` with the
    /// request as parent.
    Respond {
        topic: String,

        #[arg(long, default_value = "wirebus-cli")]
        name: String,

        #[arg(long, default_value = "Echo responder")]
        description: String,

        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
}

fn parse_filter(s: &str) -> Result<ActionFilter, String> {
    s.parse()
}

fn parse_payload(payload: &str) -> Result<serde_json::Value> {
    serde_json::from_str(payload).with_context(|| format!("Invalid JSON payload: {}", payload))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = WirebusConfig::new(&cli.url);
    if let Some(ms) = cli.timeout_ms {
        config = config.request_timeout(Duration::from_millis(ms));
    }

    match cli.command {
        Commands::Publish {
            topic,
            payload,
            wait,
        } => publish(config, topic, payload, wait).await,

        Commands::Request { topic, payload } => request(config, topic, payload).await,

        Commands::Listen {
            topics,
            action,
            priority,
        } => listen(config, topics, action, priority).await,

        Commands::Respond {
            topic,
            name,
            description,
            priority,
        } => respond(config, topic, name, description, priority).await,
    }
}

async fn connect(config: WirebusConfig) -> Result<WirebusClient> {
    let url = config.url.clone();
    let client = WirebusClient::new(config);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    Ok(client)
}

async fn publish(config: WirebusConfig, topic: String, payload: String, wait: bool) -> Result<()> {
    let payload = parse_payload(&payload)?;
    let client = connect(config).await?;

    let mut options = PublishOptions::default();
    if wait {
        options = options.with_request_id();
    }

    if let Some(reply) = client.publish(&topic, &payload, options).await? {
        print_message(&reply);
    }

    client.disconnect().await?;
    Ok(())
}

async fn request(config: WirebusConfig, topic: String, payload: String) -> Result<()> {
    let payload = parse_payload(&payload)?;
    let client = connect(config).await?;

    let reply = client
        .request(&topic, &payload, RequestOptions::default())
        .await
        .with_context(|| format!("Request on {} failed", topic))?;
    print_message(&reply);

    client.disconnect().await?;
    Ok(())
}

async fn listen(
    config: WirebusConfig,
    topics: Vec<String>,
    action: ActionFilter,
    priority: i32,
) -> Result<()> {
    let client = connect(config.reconnect(Duration::from_secs(1))).await?;

    for topic in &topics {
        client
            .subscribe(action, topic, priority, |message| print_message(&message))
            .await
            .with_context(|| format!("Failed to subscribe to {}", topic))?;
        info!(topic = %topic, "Listening");
    }

    tokio::signal::ctrl_c().await?;
    client.disconnect().await?;
    Ok(())
}

async fn respond(
    config: WirebusConfig,
    topic: String,
    name: String,
    description: String,
    priority: i32,
) -> Result<()> {
    let client = connect(config.reconnect(Duration::from_secs(1))).await?;
    client.register(&name, &description).await?;

    let handled = format!("{}.handled", topic);
    client
        .subscribe(ActionFilter::Request, &topic, priority, move |message| {
            print_message(&message);
            if let Err(e) = message.response(message.payload().clone()) {
                eprintln!("Failed to respond: {}", e);
                return;
            }

            let handled = handled.clone();
            tokio::spawn(async move {
                let event = message.payload().to_value();
                if let Err(e) = message
                    .publish(&handled, &event, PublishOptions::default())
                    .await
                {
                    eprintln!("Failed to publish {}: {}", handled, e);
                }
            });
        })
        .await
        .with_context(|| format!("Failed to subscribe to {}", topic))?;

    info!(topic = %topic, name = %name, "Responding");
    tokio::signal::ctrl_c().await?;
    client.disconnect().await?;
    Ok(())
}

fn print_message(message: &Message) {
    let header = message.header();
    println!(
        "{} {} {} {}",
        header.action,
        header.topic,
        header.request_id.as_deref().unwrap_or("-"),
        message.payload().to_value()
    );
}
