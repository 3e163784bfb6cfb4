//! Subcommand handlers.

use crate::{Commands, ConfigAction, RunsAction, SimulateArgs};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use trackfit_core::tracker::RunRecord;
use trackfit_core::{
    FitPlan, Learner, LocalTracker, Phase, SaveModel, SequentialModel, Session, TrackerCallback,
    TrackerConfig,
};

pub(crate) fn handle_command(
    command: Commands,
    workspace: &Path,
    project: Option<&str>,
) -> anyhow::Result<()> {
    match command {
        Commands::Simulate(args) => {
            let config = effective_config(workspace, project)?;
            let run = simulate(&args, &config, workspace)?;
            tracing::info!(run_id = %run.id, state = ?run.state, "Simulation finished");
            print_summary(&run);
            Ok(())
        }
        Commands::Runs { action } => {
            let config = effective_config(workspace, project)?;
            handle_runs(action, &config, workspace)
        }
        Commands::Config { action } => handle_config(action, workspace, project),
    }
}

/// Layered configuration with the `--project` flag applied on top.
fn effective_config(workspace: &Path, project: Option<&str>) -> anyhow::Result<TrackerConfig> {
    let mut config = trackfit_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    if let Some(project) = project {
        config.project = Some(project.to_string());
    }
    Ok(config)
}

fn tracker(config: &TrackerConfig, workspace: &Path) -> LocalTracker {
    LocalTracker::new(
        config.resolved_store_dir(workspace),
        config.project.clone(),
    )
}

/// Fit a small MLP on a synthetic loss curve and return the stored run.
pub(crate) fn simulate(
    args: &SimulateArgs,
    config: &TrackerConfig,
    workspace: &Path,
) -> anyhow::Result<RunRecord> {
    let tracker = Arc::new(tracker(config, workspace));
    let session = match &args.resume {
        Some(id) => tracker.resume(id)?,
        None => tracker.start_session(args.name.as_deref().or(config.run_name.as_deref()))?,
    };
    let run_id = session.id().to_string();

    let callback = TrackerCallback::from_config(tracker.clone(), config)?
        .log_model_weights(config.log_model_weights && !args.no_weights)
        .keep_session_running(config.keep_session_running || args.keep_running);

    let groups = vec![
        BTreeMap::from([("lr".to_string(), 1e-2), ("wd".to_string(), 1e-4)]),
        BTreeMap::from([("lr".to_string(), 1e-3), ("wd".to_string(), 0.0)]),
    ];
    let mut learn = Learner::new(Box::new(SequentialModel::mlp(16, 32, 4)))
        .with_path(workspace.join(".trackfit"))
        .with_hyper_groups(groups);
    if !args.no_checkpoints {
        learn = learn.with_checkpoint_saver(Box::new(SaveModel::new("model", args.every_epoch)));
    }
    learn.add_callback(Box::new(callback));

    let plan = FitPlan::new(args.epochs, args.batches).with_validation(args.valid_batches);
    let total_steps = (args.epochs * args.batches).max(1) as f64;
    let mut rng = StdRng::seed_from_u64(args.seed);

    learn.fit(plan, |state, phase| {
        let progress = state.train_iter as f64 / total_steps;
        if phase == Phase::Train {
            // Cosine decay of every group's learning rate.
            let scale = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
            for (group, base) in state.hyper_groups.iter_mut().zip([1e-2, 1e-3]) {
                group.insert("lr".to_string(), base * scale);
            }
        }
        let noise: f64 = rng.gen_range(-0.05..0.05);
        let loss = 2.0 * (-3.0 * progress).exp() + 0.1 + noise;
        Ok(match phase {
            Phase::Train => loss,
            Phase::Valid => loss * 1.15,
        })
    })?;

    Ok(tracker.load_run(&run_id)?)
}

fn print_summary(run: &RunRecord) {
    println!("Run {} ({})", run.name, run.id);
    println!("  state:     {:?}", run.state);
    println!(
        "  metrics:   {} series, {} points",
        run.metrics.len(),
        run.metric_point_count()
    );
    println!("  artifacts: {}", run.artifacts.len());
    if let Some(loss) = run.last_metric("epoch__train_loss") {
        println!("  final train loss: {loss:.4}");
    }
}

fn handle_runs(action: RunsAction, config: &TrackerConfig, workspace: &Path) -> anyhow::Result<()> {
    let tracker = tracker(config, workspace);
    match action {
        RunsAction::List => {
            let runs = tracker.list_runs()?;
            if runs.is_empty() {
                println!("No runs recorded yet.");
                return Ok(());
            }
            println!("Runs ({}):", runs.len());
            for run in &runs {
                println!(
                    "  {}  {:<20} {:<8} {}",
                    run.id,
                    run.name,
                    format!("{:?}", run.state).to_lowercase(),
                    run.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        RunsAction::Show { id, json } => {
            let run = tracker.load_run(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_run(&run);
            }
            Ok(())
        }
    }
}

fn print_run(run: &RunRecord) {
    println!("Run: {} ({})", run.name, run.id);
    println!("Project: {}", run.project);
    println!("State: {:?}", run.state);
    println!("Created: {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(closed) = run.closed_at {
        println!("Closed: {}", closed.format("%Y-%m-%d %H:%M:%S"));
    }

    if !run.properties.is_empty() {
        println!("\nProperties:");
        for (key, value) in &run.properties {
            println!("  {key} = {value}");
        }
    }
    if !run.metrics.is_empty() {
        println!("\nMetrics (last value, points):");
        for (key, points) in &run.metrics {
            if let Some(last) = points.last() {
                println!("  {key:<28} {:>12.6}  ({})", last.value, points.len());
            }
        }
    }
    if !run.texts.is_empty() {
        println!("\nText:");
        for (key, points) in &run.texts {
            if let Some(last) = points.last() {
                println!("  {key:<28} {}  ({})", last.value, points.len());
            }
        }
    }
    if !run.artifacts.is_empty() {
        println!("\nArtifacts:");
        for artifact in &run.artifacts {
            println!(
                "  {:<24} {:>10} bytes  sha256:{}",
                artifact.name,
                artifact.size_bytes,
                artifact.sha256.get(..12).unwrap_or(&artifact.sha256)
            );
        }
    }
}

fn handle_config(action: ConfigAction, workspace: &Path, project: Option<&str>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".trackfit");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = TrackerConfig {
                project: project.map(str::to_string),
                ..Default::default()
            };
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = effective_config(workspace, project)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
