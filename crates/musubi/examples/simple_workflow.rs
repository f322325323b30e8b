//! Simple linear workflow example.

use async_trait::async_trait;
use musubi::prelude::*;

#[derive(Debug, Default)]
struct Dataset {
    rows: Vec<String>,
}

#[derive(Debug)]
struct DataLoadStep;

#[async_trait]
impl Step<Dataset, usize> for DataLoadStep {
    async fn execute(&self, ctx: StepContext<Dataset, usize>) -> Result<usize, BoxError> {
        println!("Loading data...");
        let loaded = ctx.update(|data| {
            data.rows = vec!["alpha".into(), "beta".into(), "gamma".into()];
            data.rows.len()
        });
        Ok(loaded)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let workflow = Workflow::builder()
        .name("simple")
        .step(StepSpec::new("load", DataLoadStep).start())
        .step(
            StepSpec::from_fn("count", |ctx: StepContext<Dataset, usize>| async move {
                let loaded = ctx.inputs().get("load").copied().unwrap_or_default();
                let non_empty = ctx.read(|data| data.rows.iter().filter(|r| !r.is_empty()).count());
                println!("Loaded {loaded} rows, {non_empty} non-empty");
                Ok::<_, BoxError>(non_empty)
            })
            .after("load")
            .end(),
        )
        .build()?;

    match workflow.run(Dataset::default()).await {
        Ok(output) => {
            println!("Workflow completed successfully");
            println!("Result of '{}': {}", output.end_step, output.result);
        }
        Err(error) => {
            eprintln!("Workflow failed: {}", error);
        }
    }

    Ok(())
}
