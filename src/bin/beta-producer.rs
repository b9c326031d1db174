//! # Beta Producer
//!
//! Enqueues the three demonstration jobs onto the primary queue.
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost:5432/beta_worker cargo run --bin beta-producer
//! ```

use anyhow::Context;
use tracing::info;

use beta_worker::config::{ConfigLoader, SubstrateKind};
use beta_worker::logging;
use beta_worker::producer::{demo_jobs, Producer};
use beta_worker::worker::build_substrate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = ConfigLoader::load_default().context("failed to load configuration")?;
    if config.substrate == SubstrateKind::InMemory {
        anyhow::bail!("the in-memory substrate is process-local; run the producer against pgmq");
    }

    let substrate = build_substrate(&config)
        .await
        .context("failed to connect to the delivery substrate")?;
    substrate
        .ensure_queue(&config.queues.primary)
        .await
        .context("failed to create the primary queue")?;

    let producer = Producer::new(substrate, config.queues.primary.clone());
    for (payload, priority) in demo_jobs() {
        let handle = producer
            .submit(payload, priority)
            .await
            .context("failed to enqueue demo job")?;
        info!(task = %handle, priority = %priority, "Demo job enqueued");
    }

    println!("Enqueued 3 demo jobs.");
    Ok(())
}
