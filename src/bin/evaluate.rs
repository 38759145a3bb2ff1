//! Evaluate a trained checkpoint on the configured splits.
//!
//! Mirrors the training pipeline's test entry point: load the persisted
//! model, score the DCASE 2018 evaluation split and the DCASE 2019
//! validation split, and optionally write the validation predictions to a
//! tab-separated file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sed_eval::{run_evaluation, EvalConfig, ExperimentState};

#[derive(Parser, Debug)]
#[command(name = "evaluate", about = "Evaluate a sound event detection checkpoint")]
struct Args {
    /// Restrict each split to its first N metadata rows
    #[arg(short = 's', long = "subpart-data")]
    subpart_data: Option<usize>,

    /// Path of the checkpoint to evaluate
    #[arg(short = 'm', long = "model-path")]
    model_path: Option<PathBuf>,

    /// Where to write the validation split's predicted events
    #[arg(short = 'p', long = "save-predictions-fname")]
    save_predictions_fname: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let Some(model_path) = args.model_path else {
        eprintln!("No checkpoint given; pass -m/--model-path.");
        return ExitCode::FAILURE;
    };
    if !model_path.exists() {
        eprintln!("Checkpoint not found: {}", model_path.display());
        return ExitCode::FAILURE;
    }

    let state = match ExperimentState::load(&model_path) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to load checkpoint: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_evaluation(
        &state,
        &EvalConfig::default(),
        args.subpart_data,
        args.save_predictions_fname.as_deref(),
    ) {
        Ok(summary) => {
            println!("Checkpoint epoch: {}", summary.epoch);
            for split in &summary.splits {
                println!(
                    "{}: {} clips, event-based macro F1 {:.4}, weak macro F1 {:.4}",
                    split.name,
                    split.n_clips,
                    split.event_macro_f1(),
                    split.weak_macro_f1()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Evaluation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
