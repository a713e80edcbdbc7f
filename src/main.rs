//! ARLA - Entry Point
//!
//! Runs the sandbox world with the full cognitive stack and prints a short
//! report when the run ends.

use arla::core::config::{ArlaConfig, LlmProvider};
use arla::core::error::Result;
use arla::llm::{HttpLanguageModel, InteractionLog, LanguageModel, LlmClient, OfflineLanguageModel};
use arla::providers::Exporter;
use arla::sandbox::{build_simulation, SandboxOptions};
use arla::simulation::FileStateStore;
use arla::systems::{JsonlExporter, TracingExporter};

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::rc::Rc;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LlmChoice {
    Offline,
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "arla", version, about = "Run the ARLA sandbox simulation")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override simulation.steps
    #[arg(long)]
    steps: Option<u64>,

    /// Number of sandbox agents
    #[arg(long, default_value_t = 4)]
    agents: usize,

    /// Override simulation.random_seed
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory for snapshots, metrics and the interaction log
    #[arg(long)]
    out: Option<PathBuf>,

    /// Language model backend; overrides llm.provider
    #[arg(long, value_enum)]
    llm: Option<LlmChoice>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("arla=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ArlaConfig::load(path)?,
        None => ArlaConfig::new(),
    };
    if let Some(steps) = cli.steps {
        config.simulation.steps = steps;
    }
    if let Some(seed) = cli.seed {
        config.simulation.random_seed = seed;
    }
    if let Some(out) = &cli.out {
        config.simulation.log_directory = out.display().to_string();
    }
    match cli.llm {
        Some(LlmChoice::Offline) => config.llm.provider = LlmProvider::Offline,
        Some(LlmChoice::Http) => config.llm.provider = LlmProvider::Http,
        None => {}
    }

    // Runtime for LLM calls and the interaction log writer
    let rt = Runtime::new()?;
    let out_dir = PathBuf::from(&config.simulation.log_directory);

    let model: Box<dyn LanguageModel> = match config.llm.provider {
        LlmProvider::Offline => Box::new(OfflineLanguageModel::new()),
        LlmProvider::Http => Box::new(HttpLanguageModel::new(
            LlmClient::from_env(&config.llm)?,
            rt.handle().clone(),
        )),
    };
    let interaction_log = config
        .llm
        .interaction_log
        .as_ref()
        .map(|path| InteractionLog::spawn_jsonl(rt.handle(), out_dir.join(path)));

    let metrics_path = out_dir.join("metrics.jsonl");
    let exporters: Vec<Rc<dyn Exporter>> = vec![
        Rc::new(TracingExporter),
        Rc::new(JsonlExporter::create(&metrics_path)?),
    ];

    let options = SandboxOptions {
        agents: cli.agents,
        ..SandboxOptions::default()
    };
    let mut sim = build_simulation(
        config,
        options,
        model,
        interaction_log,
        exporters,
        Box::new(FileStateStore::new(&out_dir)),
    )?;
    let summary = sim.manager.run()?;

    let (queries, tokens) = sim.scaffold.usage();
    println!();
    println!("=== ARLA RUN {} ===", summary.simulation_id);
    println!("Ticks run: {} (final tick {})", summary.ticks_run, summary.final_tick);
    if summary.stopped_early {
        println!("Stopped early: no agent had time left");
    }
    println!("LLM queries: {}, tokens: {}", queries, tokens);
    for (name, value) in sim.metrics.latest() {
        println!("  {:<22} {:.3}", name, value);
    }
    println!("Output: {}", out_dir.display());

    // Let the interaction log drain before the runtime goes away
    drop(sim);
    rt.shutdown_timeout(std::time::Duration::from_secs(2));
    Ok(())
}
