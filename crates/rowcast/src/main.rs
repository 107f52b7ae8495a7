//! Rowcast binary entry point.
//!
//! Usage: rowcast [--input <events.jsonl>] [--mode lpush|rpush|xadd|pubsub] ...
//!
//! Reads newline-delimited JSON change events from `--input` (or stdin) and
//! forwards each one to Redis. Settings not given on the command line come
//! from `ROWCAST_*` environment variables.

use anyhow::Context;
use clap::Parser;
use rowcast::{
    ChangeEvent, DeliveryMode, FilePositionStore, MemoryPositionStore, OutputConfig,
    PositionStore, Producer, ProducerConfig, RedisProducer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{error, info, warn};

/// Rowcast: forwards row-change events to Redis.
#[derive(Parser, Debug)]
#[command(name = "rowcast")]
#[command(about = "Forwards row-change (CDC) events to Redis lists, streams or pub/sub channels")]
struct Args {
    /// Destination template; may contain %{database} and %{table}.
    #[arg(long)]
    channel: Option<String>,

    /// Delivery mode: lpush, rpush, xadd or pubsub (anything else is pubsub).
    #[arg(long)]
    mode: Option<String>,

    /// Stream field holding the payload (xadd only).
    #[arg(long)]
    stream_field_key: Option<String>,

    /// Redis host.
    #[arg(long)]
    host: Option<String>,

    /// Redis port.
    #[arg(long)]
    port: Option<u16>,

    /// Redis password.
    #[arg(long, env = "ROWCAST_REDIS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Redis logical database.
    #[arg(long)]
    database: Option<i64>,

    /// Log and count delivery failures instead of exiting (true/false).
    #[arg(long)]
    ignore_producer_error: Option<bool>,

    /// Seconds to wait for in-flight sends at shutdown.
    #[arg(long)]
    drain_timeout_secs: Option<u64>,

    /// Deliver schema-change events too.
    #[arg(long)]
    output_ddl: bool,

    /// Newline-delimited JSON events; stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// File to persist the checkpoint position in.
    #[arg(long)]
    position_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn build_config(args: &Args) -> anyhow::Result<ProducerConfig> {
    let mut config = ProducerConfig::from_env().context("Invalid ROWCAST_* environment")?;

    if let Some(channel) = &args.channel {
        config.channel = channel.clone();
    }
    if let Some(mode) = &args.mode {
        config.delivery_mode = DeliveryMode::from_config(mode);
    }
    if let Some(key) = &args.stream_field_key {
        config.stream_field_key = Some(key.clone());
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(password) = &args.password {
        config.password = Some(password.clone());
    }
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(ignore) = args.ignore_producer_error {
        config.ignore_producer_error = ignore;
    }
    if let Some(secs) = args.drain_timeout_secs {
        config.drain_timeout = Duration::from_secs(secs);
    }

    Ok(config)
}

/// Forward every line of `lines` through the producer. Returns the number of
/// events pushed.
async fn forward<R>(producer: &mut RedisProducer, lines: &mut Lines<R>) -> anyhow::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut pushed = 0u64;
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let event = ChangeEvent::from_json_line(&line)
            .with_context(|| format!("Malformed event on line {line_no}"))?;
        producer
            .push(event)
            .await
            .with_context(|| format!("Fatal producer error on line {line_no}"))?;
        pushed += 1;
    }

    Ok(pushed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "rowcast".into(),
        default_level: args.log_level.clone(),
        json: args.log_json,
        ..Default::default()
    });

    info!("Rowcast starting...");

    let config = build_config(&args)?;

    info!(
        redis = %config.address(),
        database = config.database,
        channel = %config.channel,
        mode = %config.delivery_mode,
        ignore_producer_error = config.ignore_producer_error,
        "Configuration loaded"
    );

    let positions: Arc<dyn PositionStore> = match &args.position_file {
        Some(path) => {
            let store = FilePositionStore::open(path)
                .with_context(|| format!("Cannot open position file {}", path.display()))?;
            if let Some(position) = store.position() {
                info!(position = %position, "Resuming after stored position");
            }
            Arc::new(store)
        }
        None => Arc::new(MemoryPositionStore::new()),
    };
    let filter = Arc::new(OutputConfig {
        output_ddl: args.output_ddl,
    });

    let mut producer = RedisProducer::connect(&config, positions.clone(), filter)?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Cannot open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    let result = tokio::select! {
        result = forward(&mut producer, &mut lines) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping...");
            Ok(0)
        }
    };

    if !producer.drain(config.drain_timeout).await {
        warn!("Some sends were still in flight at shutdown");
    }
    producer.request_stop().await;
    producer.await_stop(config.drain_timeout).await;

    let snapshot = producer.snapshot();
    info!(
        succeeded = snapshot.succeeded,
        failed = snapshot.failed,
        in_flight = snapshot.in_flight,
        position = ?positions.position().map(|p| p.to_string()),
        "Rowcast stopped"
    );

    match result {
        Ok(pushed) => {
            info!(events = pushed, "Input exhausted");
            // A failure escalated after the last push still fails the run.
            if let Some(failure) = producer.take_escalation() {
                let err = rowcast::ProducerError::from(failure);
                error!(error = %err, "Delivery failed after last event");
                return Err(err.into());
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Rowcast exited with error");
            Err(e)
        }
    }
}
