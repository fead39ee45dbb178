//! Sweep command handler
//!
//! Runs one redelivery pass, or keeps sweeping on an interval until Ctrl+C.

use color_eyre::Result;
use fairq::server::{Sweeper, SweeperConfig};
use fairq::TaskQueue;
use std::time::Duration;
use tokio::sync::watch;

/// Handle sweep command
///
/// # Arguments
/// * `queue` - Queue engine
/// * `queues` - Queue names to sweep
/// * `watch_secs` - Sweep interval; a single pass when absent
pub async fn handle(queue: TaskQueue, queues: Vec<String>, watch_secs: Option<u64>) -> Result<()> {
    let names: Vec<&str> = queues.iter().map(String::as_str).collect();

    match watch_secs {
        None => {
            let sweeper = Sweeper::new(queue.clone(), &names, SweeperConfig::default());
            let requeued = sweeper.sweep_once().await;
            println!("Requeued {} expired tasks", requeued);
            for name in &names {
                println!("  {}: {} pending", name, queue.size(name).await?);
            }
        }
        Some(0) => {
            return Err(color_eyre::eyre::eyre!("--watch interval must be at least 1 second"));
        }
        Some(secs) => {
            let config = SweeperConfig::new().interval(Duration::from_secs(secs));
            let sweeper = Sweeper::new(queue, &names, config);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            println!("Sweeping {:?} every {}s, press Ctrl+C to stop", names, secs);
            let handle = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

            tokio::signal::ctrl_c().await?;
            shutdown_tx.send_replace(true);
            handle.await?;
        }
    }
    Ok(())
}
