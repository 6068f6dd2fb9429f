use callflow_core::call_graph::{stats, StrategyKind};
use callflow_core::config::{AnalysisConfig, CliOverrides};
use callflow_core::di::Container;
use callflow_core::program::Program;
use callflow_core::type_analysis::{AnalysisReport, GlobalTypeAnalysisResult};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "callflow.json";

/// callflow - call graphs and whole-program type analysis for bytecode programs
#[derive(Parser, Debug, Clone)]
#[command(name = "callflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Program description (YAML or JSON)
    #[arg(value_name = "PROGRAM", required_unless_present = "init")]
    program: Option<PathBuf>,

    /// Path to a callflow.json / callflow.yaml configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Call graph strategy (single-callee, complete, multiple-callee)
    #[arg(short, long, value_name = "KIND")]
    strategy: Option<StrategyKind>,

    /// Overrider count above which a virtual method becomes a root
    #[arg(long, value_name = "N")]
    big_override_threshold: Option<u32>,

    /// Maximum number of refinement iterations
    #[arg(long, value_name = "N")]
    max_iterations: Option<usize>,

    /// Only print call graph statistics
    #[arg(long)]
    stats: bool,

    /// Print the analysis report as JSON
    #[arg(long)]
    json: bool,

    /// List call graph methods whose name contains TERM
    #[arg(long, value_name = "TERM")]
    search: Option<String>,

    /// Describe the callers and callees of METHOD
    #[arg(long, value_name = "METHOD")]
    query: Option<String>,

    /// Write a default callflow.json and exit
    #[arg(long)]
    init: bool,

    /// Plain diagnostics without terminal styling
    #[arg(long)]
    no_pretty: bool,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `--json` output stays parseable.
    // Set RUST_LOG=debug for detailed logs.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.init {
        AnalysisConfig::init_file(Path::new(DEFAULT_CONFIG))?;
        println!("Created {}", DEFAULT_CONFIG);
        return Ok(());
    }

    let config = load_config(&cli)?;
    let Some(path) = cli.program.as_deref() else {
        anyhow::bail!("No program specified. Use --help for usage information.");
    };
    let program = Program::from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
    info!(
        "Loaded {} with {} methods",
        path.display(),
        program.method_count()
    );
    debug!("Configuration: {:?}", config);

    let container = Container::new(config);

    if cli.stats || cli.search.is_some() || cli.query.is_some() {
        return explore(&cli, &container, &program);
    }

    let result = container.analyze(&program)?;
    if cli.json {
        let report = AnalysisReport::new(&program, &result)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&program, &result)?;
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<AnalysisConfig> {
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config file: {}", e))?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG);
            if default_path.exists() {
                AnalysisConfig::from_file(&default_path)
                    .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", DEFAULT_CONFIG, e))?
            } else {
                AnalysisConfig::default()
            }
        }
    };

    config.merge_with_cli(CliOverrides {
        strategy: cli.strategy,
        big_override_threshold: cli.big_override_threshold,
        max_global_analysis_iteration: cli.max_iterations,
        pretty: cli.no_pretty.then_some(false),
    });
    Ok(config)
}

/// Call graph only: statistics, name search and node description
fn explore(cli: &Cli, container: &Container, program: &Program) -> anyhow::Result<()> {
    let graph = container.build_call_graph(program)?;

    if cli.stats {
        let counts = stats(&graph);
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&counts)?);
        } else {
            println!("strategy:  {}", container.config().call_graph.strategy);
            println!("roots:     {}", graph.roots().len());
            println!("nodes:     {}", counts.nodes);
            println!("edges:     {}", counts.edges);
            println!("callsites: {}", counts.callsites);
        }
    }

    if let Some(term) = &cli.search {
        let found = graph.find_methods(program, term);
        if found.is_empty() {
            println!("no methods matching '{}'", term);
        }
        for node in found {
            println!("{}", graph.node_name(program, node));
        }
    }

    if let Some(name) = &cli.query {
        let method = program
            .method_by_name(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown method {}", name))?;
        let node = graph.node(program, method)?;
        print!("{}", graph.describe(program, node));
    }
    Ok(())
}

fn print_summary(program: &Program, result: &GlobalTypeAnalysisResult<'_>) -> anyhow::Result<()> {
    let counts = stats(result.graph());
    println!(
        "{} call graph: {} nodes, {} edges, {} callsites",
        result.strategy, counts.nodes, counts.edges, counts.callsites
    );
    println!(
        "global analysis: {} of {} iterations{}",
        result.iterations,
        result.max_iterations,
        if result.converged { "" } else { " (not converged)" }
    );
    println!();
    print!("{}", result.whole_program_state().display(program));
    println!();

    println!("summaries:");
    for summary in result.analyzer.summaries()? {
        let mut flags = Vec::new();
        if !summary.reachable {
            flags.push("unreachable");
        }
        if summary.any_init_reachable {
            flags.push("any-init");
        }
        let returns = summary
            .return_type
            .map(|value| format!(" -> {}", value.display(program)))
            .unwrap_or_default();
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("  {}{}{}", program.method_name(summary.method), returns, flags);
    }
    Ok(())
}
