use clap::{Parser, Subcommand};
use glucobridge_core::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "glucobridge")]
#[command(about = "Bridge diabetes device data into a monitoring log", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all enabled loops until Ctrl-C
    Run,

    /// Run a single cycle of each enabled pipeline and exit
    Once,

    /// Validate configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    glucobridge_core::logging::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    match cli.command {
        Commands::Run => cmd_run(&config).await,
        Commands::Once => cmd_once(&config).await,
        Commands::CheckConfig => cmd_check_config(&config),
    }
}

fn file_collaborators(data_dir: &Path) -> Collaborators {
    Collaborators::new(
        Arc::new(FileSource::new(data_dir)),
        Arc::new(FileSink::new(data_dir)),
        Arc::new(SystemClock),
    )
}

struct Pipelines {
    entries: EntriesPipeline,
    treatments: TreatmentsPipeline,
    pump_settings: Option<PumpSettingsPipeline>,
}

fn build_pipelines(config: &Config) -> Result<Pipelines> {
    config.validate()?;
    std::fs::create_dir_all(&config.data.data_dir)?;

    let collaborators = file_collaborators(&config.data.data_dir);
    let profile_name = config.sink.profile_name.clone();

    Ok(Pipelines {
        entries: EntriesPipeline::new(collaborators.clone()),
        treatments: TreatmentsPipeline::new(
            collaborators.clone(),
            profile_name.clone(),
            config.identifier.policy(),
            config.sink.utc_offset()?,
        ),
        pump_settings: config.pump_settings.enabled.then(|| {
            PumpSettingsPipeline::new(collaborators, profile_name, config.pump_settings.import())
        }),
    })
}

async fn cmd_once(config: &Config) -> Result<()> {
    let pipelines = build_pipelines(config)?;
    let date_from = config.loops.initial_date_from(SystemClock.now());

    let (_, summary) = pipelines
        .entries
        .run_cycle(EntriesState { date_from })
        .await?;
    println!("entries:       {}", summary);

    let (state, summary) = pipelines
        .treatments
        .run_cycle(TreatmentsState::starting_at(date_from))
        .await?;
    println!("treatments:    {}", summary);
    for record in &state.previous_records {
        println!("  unresolved:  {}", record.id());
    }

    if let Some(pump_settings) = &pipelines.pump_settings {
        let summary = pump_settings.run_cycle().await?;
        println!("pump settings: {}", summary);
    }

    Ok(())
}

async fn cmd_run(config: &Config) -> Result<()> {
    let pipelines = build_pipelines(config)?;
    let date_from = config.loops.initial_date_from(SystemClock.now());
    let stop = StopHandle::new();

    let entries = pipelines.entries;
    let entries_loop = Looper::new(
        "entries",
        config.loops.entries_interval(),
        move |state: EntriesState| {
            let entries = entries.clone();
            async move { entries.step(state).await }
        },
    )
    .with_stop_handle(stop.clone());

    let treatments = pipelines.treatments;
    let treatments_loop = Looper::new(
        "treatments",
        config.loops.treatments_interval(),
        move |state: TreatmentsState| {
            let treatments = treatments.clone();
            async move { treatments.step(state).await }
        },
    )
    .with_stop_handle(stop.clone());

    let entries_task = tokio::spawn(entries_loop.run(EntriesState { date_from }));
    let treatments_task =
        tokio::spawn(treatments_loop.run(TreatmentsState::starting_at(date_from)));

    let pump_task = pipelines.pump_settings.map(|pump_settings| {
        let pump_loop = Looper::new(
            "pump_settings",
            config.loops.pump_settings_interval(),
            move |state: ()| {
                let pump_settings = pump_settings.clone();
                async move { pump_settings.step(state).await }
            },
        )
        .with_stop_handle(stop.clone());
        tokio::spawn(pump_loop.run(()))
    });

    println!("Running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    stop.stop();

    let entries = entries_task.await.map_err(join_error)?;
    println!(
        "entries:       {} iterations, {} failed",
        entries.iterations, entries.failures
    );

    let treatments = treatments_task.await.map_err(join_error)?;
    println!(
        "treatments:    {} iterations, {} failed, {} unresolved",
        treatments.iterations,
        treatments.failures,
        treatments.state.previous_records.len()
    );

    if let Some(task) = pump_task {
        let pump = task.await.map_err(join_error)?;
        println!(
            "pump settings: {} iterations, {} failed",
            pump.iterations, pump.failures
        );
    }

    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Other(format!("Loop task failed: {}", e))
}

fn cmd_check_config(config: &Config) -> Result<()> {
    config.validate()?;

    println!("Configuration OK");
    println!();
    print!("{}", config.redacted().to_toml()?);
    Ok(())
}
