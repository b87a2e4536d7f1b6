//! Fault injection over many randomized calls: whatever happens to a call
//! (success, retryable or fatal failures, cancellation, deadline), no admission
//! slot may leak.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use opvisor::{
    CallOptions, Composition, ConcurrencyPolicy, Engine, EngineConfig, ErrorClass, ExecuteError,
    OpFn, OperationBinding, RetryPolicy,
};

const RUNS: usize = 1000;
const BATCH: usize = 50;
const KEYS: [&str; 3] = ["once", "per_attempt", "single"];

#[derive(Clone, Copy, Debug)]
enum Fault {
    Succeed,
    FailTimes(u32),
    FatalOn(u32),
    Hang,
}

#[derive(Clone, Debug)]
struct Plan {
    fault: Fault,
    hold: Duration,
    invocations: Arc<AtomicU32>,
}

fn binding(key: &'static str) -> OperationBinding<Plan, u32, String> {
    OperationBinding::new(
        key,
        OpFn::arc(|plan: Plan, ctx: CancellationToken| async move {
            let n = plan.invocations.fetch_add(1, Ordering::SeqCst) + 1;
            let hold = match plan.fault {
                Fault::Hang => Duration::from_secs(3600),
                _ => plan.hold,
            };
            tokio::select! {
                _ = ctx.cancelled() => return Err(format!("cancelled on attempt {n}")),
                _ = tokio::time::sleep(hold) => {}
            }
            match plan.fault {
                Fault::Succeed => Ok(n),
                Fault::FailTimes(k) if n <= k => Err(format!("transient {n}")),
                Fault::FailTimes(_) => Ok(n),
                Fault::FatalOn(k) if n == k => Err(format!("fatal {n}")),
                Fault::FatalOn(_) => Err(format!("transient {n}")),
                Fault::Hang => Ok(n),
            }
        }),
    )
    .with_classifier(|e: &String| {
        if e.starts_with("fatal") {
            ErrorClass::Fatal
        } else {
            ErrorClass::Retryable
        }
    })
}

fn random_plan(rng: &mut StdRng) -> Plan {
    let fault = match rng.random_range(0..4) {
        0 => Fault::Succeed,
        1 => Fault::FailTimes(rng.random_range(1..=4)),
        2 => Fault::FatalOn(rng.random_range(1..=3)),
        _ => Fault::Hang,
    };
    Plan {
        fault,
        hold: Duration::from_millis(rng.random_range(0..30)),
        invocations: Arc::new(AtomicU32::new(0)),
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_slot_leaks_under_fault_injection() {
    let retry = RetryPolicy::new(3, Duration::from_millis(10), 2.0, Duration::from_millis(40)).unwrap();
    let limit = ConcurrencyPolicy::new(2).unwrap();
    let engine = Arc::new(
        Engine::builder(EngineConfig::default())
            .register(binding("once").with_retry(retry).with_concurrency(limit))
            .unwrap()
            .register(
                binding("per_attempt")
                    .with_retry(retry)
                    .with_concurrency(limit)
                    .with_composition(Composition::AdmitPerAttempt),
            )
            .unwrap()
            .register(binding("single").with_concurrency(limit))
            .unwrap()
            .build(),
    );

    let mut rng = StdRng::seed_from_u64(0x5107_5AFE);
    let mut outcomes = std::collections::HashMap::<&'static str, usize>::new();

    for _ in 0..RUNS / BATCH {
        let mut joins = Vec::with_capacity(BATCH);
        for _ in 0..BATCH {
            let key = KEYS[rng.random_range(0..KEYS.len())];
            let plan = random_plan(&mut rng);

            let mut opts = CallOptions::new();
            if rng.random_bool(0.3) {
                opts = opts.with_timeout(Duration::from_millis(rng.random_range(0..120)));
            }
            if matches!(plan.fault, Fault::Hang) || rng.random_bool(0.2) {
                let token = CancellationToken::new();
                let after = Duration::from_millis(rng.random_range(0..150));
                let cancel = token.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    cancel.cancel();
                });
                opts = opts.with_cancel(token);
            }

            let engine = Arc::clone(&engine);
            joins.push(tokio::spawn(async move {
                engine.execute_with(key, plan, &opts).await
            }));
        }

        for j in joins {
            let label = match j.await.unwrap() {
                Ok(_) => "ok",
                Err(e) => {
                    if let ExecuteError::Exhausted { attempts, .. } = &e {
                        assert_eq!(*attempts, 3);
                    }
                    e.as_label()
                }
            };
            *outcomes.entry(label).or_default() += 1;
        }
    }

    assert_eq!(outcomes.values().sum::<usize>(), RUNS);
    assert!(outcomes.len() > 3, "fault mix too narrow: {outcomes:?}");

    for key in KEYS {
        let stats = engine.admission_stats(key).unwrap();
        assert_eq!(stats.admitted, stats.released, "{key}: {stats:?}");
        assert_eq!(stats.in_flight, 0, "{key}");
        assert_eq!(stats.available, 2, "{key}");
        assert_eq!(stats.waiting, 0, "{key}");
        assert!(stats.admitted > 0, "{key}");
    }
}
