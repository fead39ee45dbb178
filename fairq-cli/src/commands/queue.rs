//! Queue command handlers
//!
//! Provides commands for showing queue size, listing active tenants and
//! enqueueing tasks.

use clap::Args;
use color_eyre::Result;
use fairq::{Priority, TaskQueue, TenantId};

/// Arguments of the push command
#[derive(Args)]
pub struct PushArgs {
    /// Queue name
    pub queue: String,
    /// Task type
    pub task_type: String,
    /// Tenant ID
    pub tenant_id: TenantId,
    /// Payload, sent as raw bytes
    pub payload: String,
    /// Priority: high, default or low
    #[arg(long, default_value = "default")]
    pub priority: Priority,
}

/// Show pending task count
pub async fn size(queue: &TaskQueue, name: &str) -> Result<()> {
    let size = queue.size(name).await?;
    println!("{}", size);
    Ok(())
}

/// List active tenants, least loaded first
pub async fn tenants(queue: &TaskQueue, name: &str) -> Result<()> {
    let tenants = queue.active_tenants(name).await?;

    println!("Active tenants: {}", name);
    if tenants.is_empty() {
        println!("  (No tenants)");
    } else {
        println!("  {:<20} {:>10}", "TENANT", "IN FLIGHT");
        for (tenant_id, in_flight) in tenants {
            println!("  {:<20} {:>10}", tenant_id, in_flight);
        }
    }
    Ok(())
}

/// Enqueue a task
pub async fn push(queue: &TaskQueue, args: PushArgs) -> Result<()> {
    queue
        .add_task(
            &args.queue,
            &args.task_type,
            args.tenant_id,
            args.payload.into_bytes(),
            args.priority,
        )
        .await?;
    println!(
        "Queued {} for tenant {} on '{}' ({} priority)",
        args.task_type, args.tenant_id, args.queue, args.priority
    );
    Ok(())
}
