//! `livetail tail`: follow one thread from the command line

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use livetail_client::{
    ConnectorError, HttpTransport, JwtTokenProvider, StaticToken, StreamHandler, StreamingConnector,
    TokenProvider,
};
use livetail_core::{auth::JwtService, Config, Envelope, ThreadId};

/// CLI output goes to stdout, so logs go to stderr
pub fn init_cli_logging() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .compact()
        .try_init();
}

/// How the stream ended
enum Exit {
    Closed,
    Failed(ConnectorError),
}

struct PrintHandler {
    exit: mpsc::UnboundedSender<Exit>,
}

impl StreamHandler for PrintHandler {
    fn on_open(&self) {
        info!("Stream open");
    }

    fn on_event(&self, envelope: Envelope) {
        match envelope.to_json() {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to print envelope"),
        }
    }

    fn on_close(&self) {
        let _ = self.exit.send(Exit::Closed);
    }

    fn on_error(&self, error: ConnectorError) {
        match error {
            ConnectorError::MalformedFrame(reason) => warn!(reason = %reason, "Skipping malformed frame"),
            fatal => {
                let _ = self.exit.send(Exit::Failed(fatal));
            }
        }
    }

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {
        warn!(
            attempt = attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Stream lost, reconnecting"
        );
    }
}

pub async fn run(
    config: &Config,
    url: &str,
    thread_id: ThreadId,
    run_id: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let tokens: Arc<dyn TokenProvider> = match token {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(JwtTokenProvider::new(
            JwtService::from_config(&config.jwt)?,
            "livetail-cli",
        )),
    };

    let mut transport = HttpTransport::new(url)?;
    if let Some(run_id) = run_id {
        transport = transport.with_run_id(run_id);
    }

    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let connector = StreamingConnector::new(
        Arc::new(transport),
        tokens,
        Arc::new(PrintHandler { exit: exit_tx }),
    );
    connector.connect(thread_id);

    let exit = tokio::select! {
        exit = exit_rx.recv() => exit,
        _ = tokio::signal::ctrl_c() => None,
    };
    connector.disconnect();

    match exit {
        Some(Exit::Failed(error)) => Err(error.into()),
        Some(Exit::Closed) | None => Ok(()),
    }
}
