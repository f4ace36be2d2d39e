use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use twinq::{FileQueueConfig, FileQueueService, Message, QueueHandle, QueueService, ReceiptToken, SystemClock};

#[derive(Parser)]
#[command(name = "twinq-cli", version, about = "File-backed twinq queue tooling")]
struct Cli {
    /// Home directory shared by all processes using the queues
    #[arg(long)]
    home: PathBuf,

    /// Optional JSON file with FileQueueConfig overrides
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a queue (no-op if it already exists)
    Create {
        queue: String,
        #[arg(long = "timeout-ms", default_value_t = 30_000)]
        timeout_ms: u64,
    },
    /// Push one message
    Push { queue: String, body: String },
    /// Pull one message and print `receipt<TAB>visible_at<TAB>body`
    Pull { queue: String },
    /// Delete a pulled message by its receipt token
    Delete { queue: String, receipt: String },
    /// Print unclaimed and claimed counts
    Stats { queue: String },
    /// Show who holds the queue's lock marker
    Lock { queue: String },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FileQueueConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FileQueueConfig::default(),
    };
    let service = FileQueueService::with_config(&cli.home, SystemClock, config);

    match cli.command {
        Commands::Create { queue, timeout_ms } => {
            let handle = service.create_queue(&queue, Duration::from_millis(timeout_ms))?;
            let meta = service
                .queue_meta(&handle)?
                .context("queue metadata missing after create")?;
            println!(
                "{}\t{}ms\t{}",
                handle,
                meta.visibility_timeout_ms,
                service.queue_dir(&queue).display()
            );
        }
        Commands::Push { queue, body } => {
            service.push(&QueueHandle::new(queue), body.as_bytes())?;
        }
        Commands::Pull { queue } => {
            if let Some(message) = service.pull(&QueueHandle::new(queue))? {
                let receipt = message.receipt().map(ReceiptToken::as_str).unwrap_or("");
                let body = String::from_utf8_lossy(message.body());
                println!("{receipt}\t{}\t{body}", message.visible_at());
            }
        }
        Commands::Delete { queue, receipt } => {
            let probe = claimed_probe(receipt);
            let deleted = service.delete(&QueueHandle::new(queue), &probe)?;
            println!("{deleted}");
        }
        Commands::Stats { queue } => {
            let stats = service.stats(&QueueHandle::new(queue))?;
            println!("unclaimed\t{}\nclaimed\t{}", stats.unclaimed, stats.claimed);
        }
        Commands::Lock { queue } => match service.lock_owner(&QueueHandle::new(queue))? {
            Some(owner) => println!(
                "pid {} acquired_at {}ms alive {}",
                owner.pid,
                owner.acquired_at_ms,
                owner.is_alive()
            ),
            None => println!("unlocked"),
        },
    }

    Ok(())
}

/// A message carrying only the receipt; delete matches on nothing else.
fn claimed_probe(receipt: String) -> Message {
    Message::with_receipt(ReceiptToken::from_string(receipt))
}
