//! # Example: database
//!
//! Simulated flaky database guarded by the engine. Each operation shows one
//! resilience pattern:
//!
//! | Operation  | Policies                                   |
//! |------------|--------------------------------------------|
//! | `save`     | retry: 3 attempts, 1s fixed delay          |
//! | `fetch`    | retry: 4 attempts, 500ms ×2, max 5s        |
//! | `heavy`    | concurrency: 2                             |
//! | `critical` | concurrency: 1 + retry: 2 attempts, 1s     |
//! | `simple`   | none (passthrough, for comparison)         |
//!
//! The random failures live in the operations below; the engine itself never
//! injects any.
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example database --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use opvisor::{
    ConcurrencyPolicy, Engine, EngineConfig, ExecuteError, LogWriter, OpFn, OpRef,
    OperationBinding, RetryPolicy, Subscribe,
};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct DatabaseError(&'static str);

type Db = Engine<String, String, DatabaseError>;

/// Fails with probability `p`.
fn flaky(p: f64, message: &'static str) -> Result<(), DatabaseError> {
    if rand::random::<f64>() < p {
        Err(DatabaseError(message))
    } else {
        Ok(())
    }
}

fn save() -> OpRef<String, String, DatabaseError> {
    OpFn::arc(|data: String, _ctx: CancellationToken| async move {
        info!(%data, "saving data");
        flaky(0.5, "database connection failed - simulated error")?;
        Ok(format!("data '{data}' saved successfully"))
    })
}

fn fetch() -> OpRef<String, String, DatabaseError> {
    OpFn::arc(|id: String, _ctx: CancellationToken| async move {
        info!(%id, "fetching data");
        flaky(0.6, "database timeout - simulated error")?;
        Ok(format!("data for id '{id}': sample database record"))
    })
}

fn heavy() -> OpRef<String, String, DatabaseError> {
    OpFn::arc(|task: String, ctx: CancellationToken| async move {
        info!(%task, "starting heavy operation");
        tokio::select! {
            _ = ctx.cancelled() => return Err(DatabaseError("operation interrupted")),
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        }
        info!(%task, "completed heavy operation");
        Ok(format!("heavy operation '{task}' completed successfully"))
    })
}

fn critical() -> OpRef<String, String, DatabaseError> {
    OpFn::arc(|id: String, _ctx: CancellationToken| async move {
        info!(%id, "executing critical operation");
        flaky(0.4, "critical operation failed - simulated error")?;
        Ok(format!("critical operation '{id}' executed successfully"))
    })
}

fn simple() -> OpRef<String, String, DatabaseError> {
    OpFn::arc(|input: String, _ctx: CancellationToken| async move {
        flaky(0.3, "simple operation failed - no retry configured")?;
        Ok(format!("simple operation completed with: {input}"))
    })
}

fn build() -> anyhow::Result<Db> {
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];

    let engine = Engine::builder(EngineConfig::default())
        .with_subscribers(subs)
        .register(
            OperationBinding::new("save", save())
                .with_retry(RetryPolicy::fixed(3, Duration::from_secs(1))?),
        )?
        .register(OperationBinding::new("fetch", fetch()).with_retry(RetryPolicy::new(
            4,
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(5),
        )?))?
        .register(
            OperationBinding::new("heavy", heavy()).with_concurrency(ConcurrencyPolicy::new(2)?),
        )?
        .register(
            OperationBinding::new("critical", critical())
                .with_concurrency(ConcurrencyPolicy::new(1)?)
                .with_retry(RetryPolicy::fixed(2, Duration::from_secs(1))?),
        )?
        .register(OperationBinding::new("simple", simple()))?
        .build();
    Ok(engine)
}

/// Maps an outcome the way an HTTP handler would render it.
fn report(key: &str, res: Result<String, ExecuteError<DatabaseError>>) {
    match res {
        Ok(message) => info!(operation = key, status = "success", %message),
        Err(e) => info!(
            operation = key,
            status = "failed",
            attempts = e.attempts(),
            kind = e.as_label(),
            message = %e
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let engine = Arc::new(build()?);

    report("save", engine.execute("save", "my important data".into()).await);
    report("fetch", engine.execute("fetch", "123".into()).await);

    info!("=== starting concurrency test with 5 tasks ===");
    let tasks: Vec<_> = (1..=5)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .execute("heavy", format!("concurrent-task-{i}"))
                    .await
            })
        })
        .collect();
    for t in tasks {
        report("heavy", t.await?);
    }
    if let Some(stats) = engine.admission_stats("heavy") {
        info!(admitted = stats.admitted, released = stats.released, "heavy gate drained");
    }

    report("critical", engine.execute("critical", "critical-op-1".into()).await);
    report("simple", engine.execute("simple", "no resilience".into()).await);

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown().await,
        Err(_) => anyhow::bail!("engine still shared at exit"),
    }
    Ok(())
}
