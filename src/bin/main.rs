use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use llm_latency_bench::report::generate_output_filename;
use llm_latency_bench::{
    load_scenario_from_file, print_summary, publish_results, run_scenario, save_summary_to_file,
    PacingConfig, PacingScope, PersistConfig, ProviderConfig, RunSummary, Scenario,
};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "llm-latency-bench")]
#[command(about = "Latency benchmark for LLM inference APIs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    // Direct benchmark options (when no subcommand)
    /// Base URL of the vLLM / OpenAI-compatible server
    #[arg(long, env = "VLLM_BASE_URL", global = true)]
    base_url: Option<String>,

    /// API key for authentication
    #[arg(long, env = "VLLM_API_KEY", default_value = "", global = true)]
    api_key: String,

    /// Provider name used in results
    #[arg(long, default_value = "vLLM", global = true)]
    provider_name: String,

    /// Model id to benchmark (repeatable)
    #[arg(long, short, default_value = "facebook/opt-125m", global = true)]
    model: Vec<String>,

    /// Requests per model
    #[arg(long, short, default_value = "10", global = true)]
    num_requests: usize,

    /// Maximum tokens to generate per request
    #[arg(long, default_value = "100", global = true)]
    max_output: u32,

    /// Prompt sent with every request
    #[arg(long, default_value = "Explain the theory of relativity.", global = true)]
    prompt: String,

    /// Time responses token by token
    #[arg(long, global = true)]
    streaming: bool,

    /// Request timeout in seconds
    #[arg(long, default_value = "1800", global = true)]
    timeout: u64,

    /// Pause after this many calls (0 = never)
    #[arg(long, default_value = "30", global = true)]
    pace_every: usize,

    /// Pause length in seconds
    #[arg(long, default_value = "120", global = true)]
    pause_secs: u64,

    /// Which calls count toward the pacing interval
    #[arg(long, value_enum, default_value = "per-model", global = true)]
    pace_scope: PaceScopeArg,

    /// Root directory for CDF artifacts
    #[arg(long, default_value = "benchmark_graph", global = true)]
    graph_dir: String,

    /// Append stored items to this JSON-lines file
    #[arg(long, global = true)]
    persist: Option<String>,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a benchmark from a YAML scenario file
    Scenario {
        /// Path to the YAML scenario file
        #[arg(required = true)]
        file: String,

        /// Output directory for the text summary (default: ./output)
        #[arg(long, short, default_value = "output")]
        output_dir: String,

        /// Skip saving the text summary to file
        #[arg(long)]
        no_save: bool,
    },
    /// Run a single benchmark (default behavior)
    Run,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PaceScopeArg {
    PerModel,
    Run,
}

impl From<PaceScopeArg> for PacingScope {
    fn from(arg: PaceScopeArg) -> Self {
        match arg {
            PaceScopeArg::PerModel => PacingScope::PerModel,
            PaceScopeArg::Run => PacingScope::Run,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    // Use RUST_LOG env var if set, otherwise use --verbose flag or default to "warn"
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if args.verbose {
            "debug".to_string()
        } else {
            "warn".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(&filter).init();

    match &args.command {
        Some(Commands::Scenario {
            file,
            output_dir,
            no_save,
        }) => run_scenario_command(file, output_dir, *no_save).await,
        Some(Commands::Run) | None => run_single_benchmark(&args).await,
    }
}

async fn run_scenario_command(file: &str, output_dir: &str, no_save: bool) -> Result<()> {
    info!("Loading scenario from: {}", file);
    let scenario = load_scenario_from_file(file)?;

    let summary = run_scenario(&scenario, true).await?;
    finish(&scenario, &summary)?;

    if !no_save {
        let output_path = generate_output_filename(&scenario.name, output_dir);
        save_summary_to_file(&summary, &scenario.name, &output_path)?;
    }

    Ok(())
}

async fn run_single_benchmark(args: &Args) -> Result<()> {
    let base_url = args
        .base_url
        .clone()
        .ok_or_else(|| anyhow!("--base-url is required (or set VLLM_BASE_URL)"))?;

    // Each --model is benchmarked under its own id
    let models: HashMap<String, String> = args
        .model
        .iter()
        .map(|m| (m.clone(), m.clone()))
        .collect();

    let scenario = Scenario {
        name: "cli".to_string(),
        description: None,
        prompt: args.prompt.clone(),
        models: args.model.clone(),
        providers: vec![ProviderConfig {
            name: args.provider_name.clone(),
            base_url,
            api_key: args.api_key.clone(),
            models,
            default_model: args
                .model
                .first()
                .cloned()
                .unwrap_or_else(|| "facebook/opt-125m".to_string()),
        }],
        num_requests: args.num_requests,
        max_output: args.max_output,
        streaming: args.streaming,
        verbose: args.verbose,
        timeout_secs: args.timeout,
        pacing: PacingConfig {
            every: args.pace_every,
            pause_secs: args.pause_secs,
            scope: args.pace_scope.into(),
        },
        output_dir: args.graph_dir.clone(),
        persist: args.persist.clone().map(|path| PersistConfig { path }),
    };
    scenario.validate()?;

    info!("LLM Latency Bench");
    info!(
        "Target: {} (models: {})",
        scenario.providers[0].base_url,
        scenario.models.join(", ")
    );
    info!(
        "Requests per model: {}, streaming: {}",
        scenario.num_requests, scenario.streaming
    );

    let summary = run_scenario(&scenario, true).await?;
    finish(&scenario, &summary)
}

fn finish(scenario: &Scenario, summary: &RunSummary) -> Result<()> {
    print_summary(summary)?;

    let outcome = publish_results(scenario, summary);
    for path in &outcome.artifacts {
        println!("Saved CDF data: {}", path.display());
    }
    if outcome.stored_items > 0 {
        println!("Stored {} result items", outcome.stored_items);
    }
    for error in &outcome.errors {
        warn!("Output error: {}", error);
    }

    if summary.successful_requests() == 0 {
        warn!("All {} requests failed", summary.failed_requests());
    }
    Ok(())
}
