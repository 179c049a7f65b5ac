use anyhow::{Context, Result};
use std::borrow::Cow;

use resq_common::{DataStore, KeyValueStore, Peek};

use crate::Command;

pub async fn run<S: KeyValueStore>(data_store: &DataStore<S>, command: Command) -> Result<()> {
    match command {
        Command::Info => info(data_store).await,
        Command::Queues => queues(data_store).await,
        Command::Size { queue } => {
            let size = data_store
                .queue_size(&queue)
                .await
                .context("Failed to read queue size")?;
            println!("{}", size);
            Ok(())
        }
        Command::Peek {
            queue,
            start,
            count,
        } => peek(data_store, &queue, start, count).await,
        Command::Push { queue, payload } => {
            data_store
                .push_to_queue(&queue, payload)
                .await
                .context("Failed to push to queue")?;
            println!("pushed to '{}'", queue);
            Ok(())
        }
        Command::Pop { queue } => {
            let item = data_store
                .pop_from_queue(&queue)
                .await
                .context("Failed to pop from queue")?;
            match item {
                Some(item) => println!("{}", display(&item)),
                None => println!("(empty)"),
            }
            Ok(())
        }
        Command::RemoveQueue { queue } => {
            data_store
                .remove_queue(&queue)
                .await
                .context("Failed to remove queue")?;
            println!("removed '{}'", queue);
            Ok(())
        }
        Command::Failed { clear } => failed(data_store, clear).await,
        Command::Workers => workers(data_store).await,
        Command::Keys => {
            let mut keys = data_store
                .all_known_keys()
                .await
                .context("Failed to list keys")?;
            keys.sort();
            for key in keys {
                println!("{}", key);
            }
            Ok(())
        }
    }
}

async fn info<S: KeyValueStore>(data_store: &DataStore<S>) -> Result<()> {
    let queues = data_store
        .queue_names()
        .await
        .context("Failed to list queues")?;
    let workers = data_store
        .worker_ids()
        .await
        .context("Failed to list workers")?;
    let failed = data_store
        .num_failed()
        .await
        .context("Failed to count failures")?;
    let processed = data_store
        .stat("processed")
        .await
        .context("Failed to read stats")?;

    println!("store:     {}", data_store.identifier());
    println!("queues:    {}", queues.len());
    println!("workers:   {}", workers.len());
    println!("processed: {}", processed);
    println!("failed:    {}", failed);
    Ok(())
}

async fn queues<S: KeyValueStore>(data_store: &DataStore<S>) -> Result<()> {
    let mut names = data_store
        .queue_names()
        .await
        .context("Failed to list queues")?;
    names.sort();

    for name in names {
        let size = data_store
            .queue_size(&name)
            .await
            .with_context(|| format!("Failed to read size of '{}'", name))?;
        println!("{}\t{}", name, size);
    }
    Ok(())
}

async fn peek<S: KeyValueStore>(
    data_store: &DataStore<S>,
    queue: &str,
    start: i64,
    count: usize,
) -> Result<()> {
    let peeked = data_store
        .peek_in_queue(queue, start, count)
        .await
        .context("Failed to peek into queue")?;

    let items = match peeked {
        Peek::One(item) => item.into_iter().collect(),
        Peek::Many(items) => items,
    };
    if items.is_empty() {
        println!("(empty)");
    }
    for (offset, item) in items.iter().enumerate() {
        println!("{}\t{}", start + offset as i64, display(item));
    }
    Ok(())
}

async fn failed<S: KeyValueStore>(data_store: &DataStore<S>, clear: bool) -> Result<()> {
    if clear {
        data_store
            .clear_failed()
            .await
            .context("Failed to clear failures")?;
    }

    let count = data_store
        .num_failed()
        .await
        .context("Failed to count failures")?;
    let mut failed_queues = data_store
        .failed_queue_names()
        .await
        .context("Failed to list failed queues")?;
    failed_queues.sort();

    println!("failed: {}", count);
    for name in failed_queues {
        println!("failed queue: {}", name);
    }
    Ok(())
}

async fn workers<S: KeyValueStore>(data_store: &DataStore<S>) -> Result<()> {
    let mut ids = data_store
        .worker_ids()
        .await
        .context("Failed to list workers")?;
    ids.sort();
    let payloads = data_store
        .workers_payload_map(&ids)
        .await
        .context("Failed to read worker payloads")?;

    for id in &ids {
        let started = data_store
            .worker_start_time(id)
            .await
            .with_context(|| format!("Failed to read start time of '{}'", id))?
            .unwrap_or_else(|| "-".to_string());
        let job = match payloads.get(id) {
            Some(Some(payload)) => display(payload),
            _ => Cow::Borrowed("idle"),
        };
        println!("{}\t{}\t{}", id, started, job);
    }
    Ok(())
}

fn display(raw: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(raw)
}
