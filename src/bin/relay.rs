use std::collections::VecDeque;

use bytes::Bytes;
use clap::Parser;
use relay_core::{
    Batcher, JsonArray, QueueError, QueueResult, Task, TaskHandle,
    config::{Config, read_config_file},
    queue::TaskQueueBuilder,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Relays newline-delimited JSON payloads from stdin to stdout in batches
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,

    /// Subject the ingest handler is registered under
    #[arg(long, default_value = "ingest")]
    subject: String,
}

fn report(result: QueueResult<()>) {
    if let Err(e) = result {
        error!("failed to relay payload: {e}");
    }
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("relay_core", LevelFilter::TRACE),
        ("relay", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    }
    .with_env_overrides();
    config.validate()?;

    let combine = match config.batch.max_payload_bytes {
        Some(limit) => JsonArray::with_limit(limit),
        None => JsonArray::new(),
    };

    let batcher = Batcher::from_config(
        combine,
        |payload: Bytes| async move {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&payload).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
            anyhow::Ok(())
        },
        &config.batch,
    );

    let ingest = batcher.clone();
    let queue = TaskQueueBuilder::<Bytes>::from_config(&config.queue)
        .handler(args.subject.clone(), move |payloads: Vec<Bytes>| {
            let batcher = ingest.clone();
            async move {
                for payload in payloads {
                    batcher.add(payload).await;
                }
                anyhow::Ok(())
            }
        })
        .on_full(|history: &[Task<Bytes>]| {
            let recent: Vec<_> = history
                .iter()
                .map(|task| format!("#{} {} @ {}", task.index, task.subject, task.enqueued_at))
                .collect();
            warn!("ingest queue full, recent tasks: {recent:?}");
        })
        .spawn();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight: VecDeque<TaskHandle<Bytes>> = VecDeque::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Err(e) = serde_json::from_str::<serde_json::Value>(line) {
            warn!("skipping invalid JSON payload: {e}");
            continue;
        }

        let payload = Bytes::from(line.to_string());

        // A full queue makes us wait for the oldest task, then retry
        loop {
            match queue.push_async(&args.subject, vec![payload.clone()]) {
                Ok(handle) => {
                    in_flight.push_back(handle);
                    break;
                }
                Err(QueueError::CapacityExhausted { .. }) => match in_flight.pop_front() {
                    Some(oldest) => report(oldest.wait().await),
                    None => {
                        warn!("dropping payload, ingest queue is full");
                        break;
                    }
                },
                Err(e) => {
                    error!("failed to relay payload: {e}");
                    break;
                }
            }
        }

        while let Some(oldest) = in_flight.front_mut() {
            let Some(result) = oldest.try_result() else {
                break;
            };
            in_flight.pop_front();
            report(result);
        }
    }

    debug!("input closed, draining");

    for handle in in_flight {
        report(handle.wait().await);
    }

    queue.shutdown().await;
    batcher.exit().await;

    let stats = batcher.stats();
    debug!(
        flushes = stats.flush_count,
        delivered = stats.delivered,
        failed = stats.failed,
        "relay finished"
    );

    Ok(())
}
