use clap::Parser;
use training::util::{init_logging, run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = TrainArgs::parse();
    let summary = run_train(args)?;
    tracing::info!(
        steps = summary.steps_run,
        checkpoints = summary.checkpoints.len(),
        final_learning_rate = summary.final_learning_rate,
        "done"
    );
    Ok(())
}
