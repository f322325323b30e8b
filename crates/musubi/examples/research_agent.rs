//! Agent-style loop: draft, critique, revise until the critic approves.
//!
//! The `revise` step OR-depends on itself and is gated on the run state, so
//! it keeps re-running until its guard flips. The `publish` step waits on
//! `revise` and only runs once the draft is approved.

use musubi::prelude::*;

#[derive(Debug, Default)]
struct Session {
    messages: Vec<String>,
    revisions: u32,
    approved: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let workflow = Workflow::builder()
        .name("research_agent")
        .config(WorkflowConfig::default().with_max_steps(50))
        .step(
            StepSpec::from_fn("draft", |ctx: StepContext<Session, String>| async move {
                let draft = "Rust ownership prevents data races".to_string();
                ctx.update(|s| s.messages.push(format!("draft: {draft}")));
                Ok::<_, BoxError>(draft)
            })
            .start(),
        )
        .step(
            StepSpec::from_fn("revise", |ctx: StepContext<Session, String>| async move {
                let previous = ctx.inputs().first().cloned().unwrap_or_default();
                let revised = format!("{previous}, checked at compile time");
                let revisions = ctx.update(|s| {
                    s.revisions += 1;
                    s.approved = s.revisions >= 2;
                    s.messages.push(format!("revision {}: {revised}", s.revisions));
                    s.revisions
                });
                println!("Revision {revisions} done");
                Ok::<_, BoxError>(revised)
            })
            .after_any(["draft", "revise"])
            .when(|s: &Session| !s.approved)
            .retry(1),
        )
        .step(
            StepSpec::from_fn("publish", |ctx: StepContext<Session, String>| async move {
                let text = ctx.inputs().get("revise").cloned().unwrap_or_default();
                let turns = ctx.read(|s| s.messages.len());
                Ok::<_, BoxError>(format!("{text} ({turns} messages)"))
            })
            .after("revise")
            .when(|s: &Session| s.approved)
            .end(),
        )
        .build()?;

    let (_, mut events) = workflow.events().channel(None);
    let output = workflow.run(Session::default()).await?;

    println!("Published: {}", output.result);
    println!("Transcript:");
    output.read(|s| s.messages.iter().for_each(|m| println!("  {m}")));

    while let Ok(event) = events.try_recv() {
        println!("event {} step={:?}", event.kind, event.step.as_ref().map(StepName::as_str));
    }

    Ok(())
}
