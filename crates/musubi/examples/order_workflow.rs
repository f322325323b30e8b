//! Order processing with fork/join, retries and a fallback branch.
//!
//! Demonstrates:
//! - Forking into concurrent branches and joining them with an AND join
//! - An OR join that takes whichever payment provider answers first
//! - Retry with exponential backoff on a flaky provider
//! - Observing the run through events

use musubi::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Reserved(u32),
    Charged(String),
    Shipped(String),
    Confirmed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Reserved(units) => write!(f, "{units} units reserved"),
            Outcome::Charged(receipt) => write!(f, "charged ({receipt})"),
            Outcome::Shipped(summary) => write!(f, "shipped [{summary}]"),
            Outcome::Confirmed(order) => write!(f, "order {order} confirmed"),
        }
    }
}

#[derive(Debug)]
struct Order {
    id: String,
    items: Vec<(String, u32)>,
    total_cents: u64,
}

type OrderStep = StepSpec<Order, Outcome>;

fn reserve_stock() -> OrderStep {
    StepSpec::from_fn("reserve_stock", |ctx: StepContext<Order, Outcome>| async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let units = ctx.read(|order| order.items.iter().map(|(_, qty)| qty).sum::<u32>());
        println!("Reserved {units} units");
        Ok::<_, BoxError>(Outcome::Reserved(units))
    })
}

fn primary_gateway(calls: Arc<AtomicU32>) -> OrderStep {
    StepSpec::from_fn("primary_gateway", move |ctx: StepContext<Order, Outcome>| {
        let calls = Arc::clone(&calls);
        async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 3 {
                println!("Primary gateway timed out (call {call})");
                return Err::<Outcome, BoxError>("gateway timeout".into());
            }
            let total = ctx.read(|order| order.total_cents);
            Ok(Outcome::Charged(format!("primary-{total}")))
        }
    })
}

fn backup_gateway() -> OrderStep {
    StepSpec::from_fn("backup_gateway", |ctx: StepContext<Order, Outcome>| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let total = ctx.read(|order| order.total_cents);
        Ok::<_, BoxError>(Outcome::Charged(format!("backup-{total}")))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let calls = Arc::new(AtomicU32::new(0));
    let mut builder = Workflow::builder().name("order");

    let validate = builder.declare(
        StepSpec::from_fn("validate", |ctx: StepContext<Order, Outcome>| async move {
            let valid = ctx.read(|order| !order.items.is_empty() && order.total_cents > 0);
            if !valid {
                return Err::<Outcome, BoxError>("empty order".into());
            }
            Ok(Outcome::Confirmed(ctx.read(|order| order.id.clone())))
        })
        .start()
        .fork(),
    );
    let reserve = builder.declare(reserve_stock().after(&validate));
    let primary = builder.declare(
        primary_gateway(calls)
            .after(&validate)
            .retry_policy(RetryPolicy::exponential(3, Duration::from_millis(50))),
    );
    let backup = builder.declare(backup_gateway().after(&validate));
    let charge = builder.declare(
        StepSpec::from_fn("charge", |ctx: StepContext<Order, Outcome>| async move {
            let receipt = ctx.inputs().first().cloned();
            receipt.ok_or_else(|| BoxError::from("no receipt"))
        })
        .after_any([primary, backup]),
    );

    let workflow = builder
        .step(
            StepSpec::from_fn("ship", |ctx: StepContext<Order, Outcome>| async move {
                let summary: Vec<String> = ctx
                    .inputs()
                    .iter()
                    .map(|(step, outcome)| format!("{step}: {outcome}"))
                    .collect();
                Ok::<_, BoxError>(Outcome::Shipped(summary.join(", ")))
            })
            .after_all([reserve, charge])
            .join()
            .end(),
        )
        .build()?;

    workflow.subscribe(EventKind::RetryStep, |event| {
        println!(
            "retrying {:?} (attempt {:?})",
            event.step.as_ref().map(StepName::as_str),
            event.attempt
        );
    });

    println!("{}", workflow.to_mermaid());

    let order = Order {
        id: "ORD-001".to_string(),
        items: vec![("PROD-A".to_string(), 2), ("PROD-B".to_string(), 1)],
        total_cents: 12_500,
    };

    let output = workflow.run(order).await?;
    println!("Order finished via '{}': {}", output.end_step, output.result);
    if let Some(Outcome::Confirmed(order)) = output.output("validate") {
        println!("  confirmed order id: {order}");
    }
    for name in workflow.step_names() {
        if let Some(summary) = output.summary(name.as_str()) {
            println!("  {name}: {:?} ({} attempts)", summary.status, summary.attempts);
        }
    }

    Ok(())
}
