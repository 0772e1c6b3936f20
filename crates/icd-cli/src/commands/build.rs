use anyhow::Result;
use icd_models::models::factory::{pick_model, pick_model_multitask};
use icd_models::IcdModel;
use std::path::Path;

use crate::input::RunConfig;

/// Builds the configured model, prints its summary and optionally saves the
/// freshly initialized weights.
///
/// With `tasks` the single-path multi-task builder is used instead and one
/// output layer is created per task.
pub fn run_build(config: &RunConfig, save: Option<&Path>, tasks: Option<&[String]>) -> Result<()> {
    let dicts = config.load_dicts()?;

    if let Some(tasks) = tasks {
        let (feature, heads) = pick_model_multitask(&config.args, &dicts, tasks)?;
        println!("{} shared features", config.args.model);
        println!("Feature dim: {}", feature.output_dim());
        println!("Parameters: {}", feature.state().num_parameters());
        for (task, head) in tasks.iter().zip(&heads) {
            println!("Task {}: {} labels, {} parameters", task, head.num_labels(), head.num_parameters());
        }
        return Ok(());
    }

    let model = pick_model(&config.args, &dicts)?;
    model.print_summary();

    if let Some(path) = save {
        model.save(path)?;
        println!("Saved weights to {:?}", path);
    }
    Ok(())
}
