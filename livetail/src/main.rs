mod server;
mod tail;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use livetail_broker::{publish_envelope, RedisPublisher};
use livetail_core::{config::load_config, logging, Content, Envelope, EventType, ThreadId};

use server::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "livetail")]
#[command(about = "Real-time event relay: broker channels to per-thread event streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Serve,

    /// Publish one envelope to a thread's channel through Redis
    Publish {
        /// Thread to publish to
        #[arg(long)]
        thread: String,

        /// token, status, delta, done or error
        #[arg(long = "type", default_value = "token")]
        event_type: EventType,

        /// Event content
        #[arg(long, default_value = "")]
        content: String,

        /// Parse content as JSON instead of plain text
        #[arg(long)]
        json: bool,

        /// Overrides redis.url from the configuration
        #[arg(long, env = "REDIS_URL")]
        redis_url: Option<String>,
    },

    /// Follow a thread's stream and print each envelope as a JSON line
    Tail {
        /// Relay base URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        #[arg(long)]
        thread: String,

        /// Also follow the legacy per-run channel
        #[arg(long)]
        run_id: Option<String>,

        /// Bearer token; signed with jwt.secret from the configuration when omitted
        #[arg(long, env = "LIVETAIL_TOKEN")]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = load_config()?;

    match cli.command {
        Command::Serve => {
            // Fail fast on misconfigurations
            if let Err(errors) = config.validate() {
                for e in &errors {
                    eprintln!("Config validation error: {e}");
                }
                return Err(anyhow::anyhow!(
                    "Configuration validation failed with {} error(s)",
                    errors.len()
                ));
            }

            logging::init_logging(&config.logging)?;
            info!("livetail relay starting...");
            info!("HTTP address: {}", config.http_address());

            RelayServer::build(config).await?.run().await
        }
        Command::Publish {
            thread,
            event_type,
            content,
            json,
            redis_url,
        } => {
            tail::init_cli_logging();

            let redis_url = redis_url.unwrap_or_else(|| config.redis.url.clone());
            if redis_url.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "publish needs a Redis URL (redis.url or --redis-url)"
                ));
            }

            let content = if json {
                Content::from(serde_json::from_str::<serde_json::Value>(&content)?)
            } else {
                Content::Text(content)
            };
            let envelope = Envelope::new(event_type, ThreadId::from(thread), content);

            let publisher = RedisPublisher::new(&redis_url)?;
            let subscribers = publish_envelope(&publisher, &envelope).await?;
            println!("{subscribers}");
            Ok(())
        }
        Command::Tail {
            url,
            thread,
            run_id,
            token,
        } => {
            tail::init_cli_logging();
            tail::run(&config, &url, ThreadId::from(thread), run_id, token).await
        }
    }
}
