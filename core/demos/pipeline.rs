//! End-to-end pipeline example: an email API starts timing out

use job_gate::{
    ExecutionOutcome, JobConsumer, JobMessage, MemoryStore, MemoryTransport, ScriptedExecutor,
    SimulatedExecutor,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Job routing with a per-job-type circuit breaker ===\n");

    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryTransport::new());
    let executor = Arc::new(ScriptedExecutor::new().fail_always("email", "API_TIMEOUT"));

    let consumer = JobConsumer::builder(store.clone(), executor.clone(), transport.clone())
        .failure_threshold(5)
        .cooldown_secs(60)
        .on_open(|alert| {
            println!(
                "🔴 ALERT: circuit '{}' opened after {} x {}",
                alert.job_type, alert.failure_count, alert.error_code
            )
        })
        .on_close(|job_type| println!("🟢 Circuit '{}' closed", job_type))
        .build()?;

    println!("--- Six emails while the provider times out ---");
    for i in 1..=6 {
        transport.submit(&JobMessage::new(
            "email",
            json!({ "to": format!("user{}@example.com", i) }),
        ))?;
    }
    while transport.ready_len() > 0 {
        let settlement = consumer.process_next().await?;
        println!("  {:?} (executor calls: {})", settlement, executor.calls());
    }

    let snapshot = consumer.snapshot("email").await?;
    println!("\nSnapshot: {}", serde_json::to_string_pretty(&snapshot)?);
    println!("Open circuits: {:?}", consumer.engine().open_circuits().await?);
    println!("Quarantined: {}", transport.quarantined().len());
    println!("Waiting retries: {}\n", transport.scheduled_retries().len());

    println!("--- Provider recovers, cooldown elapses ---");
    executor.set_fallback("email", ExecutionOutcome::Success);
    store.advance(Duration::from_secs(60));
    transport.submit(&JobMessage::new("email", json!({ "to": "probe@example.com" })))?;
    let settlement = consumer.process_next().await?;
    println!("  probe: {:?}", settlement);
    println!(
        "  state: {}, counters: {:?}\n",
        consumer.engine().state("email").await?,
        consumer.snapshot("email").await?.failure_counts
    );

    println!("--- Background consumer over a flaky SMS gateway ---");
    let sms_transport = Arc::new(MemoryTransport::new());
    let sms = Arc::new(
        JobConsumer::builder(
            Arc::new(MemoryStore::new()),
            Arc::new(SimulatedExecutor::new(7).with_failure_rate("sms", 0.3, "GATEWAY_502")),
            sms_transport.clone(),
        )
        .prefetch(4)
        .build()?,
    );

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(sms.clone().run(shutdown.clone()));

    for i in 0..20 {
        sms_transport.submit(&JobMessage::new("sms", json!({ "seq": i })))?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    worker.await?;

    println!("  stats: {:?}", sms.stats());
    println!("  health: {:?}", sms.health());
    println!("  retries waiting: {}", sms_transport.scheduled_retries().len());

    Ok(())
}
