use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use breakwatch::alert::{AlertChannelConfig, AlertDispatcher, TestSendResult};
use breakwatch::classify::classify;
use breakwatch::config::{Config, ConfigOverrides};
use breakwatch::diff::{compare, textual_diff};
use breakwatch::document::{parse_content, ApiDocument};
use breakwatch::output::csv::{changes_to_csv, outcomes_to_csv, reports_to_csv};
use breakwatch::output::json::render_json;
use breakwatch::output::table::{
    render_changes_table, render_health_table, render_outcomes_table, render_reports_table,
};
use breakwatch::pipeline::RunReport;
use breakwatch::server::{build_orchestrator, run_server};
use breakwatch::store::{MemoryStore, PipelineStore, SqliteStore};
use breakwatch::types::{AnalysisResult, AnalyzeRequest};
use breakwatch::validate::{validate, GateStatus, ValidateRequest};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "breakwatch",
    about = "Detect, classify and alert on breaking API description changes"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// SQLite database path, overriding `[storage] db_path`.
    #[arg(long)]
    db: Option<String>,
    /// Keep all state in memory for this invocation.
    #[arg(long)]
    memory: bool,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compare two documents without touching the store.
    Diff {
        old: PathBuf,
        new: PathBuf,
        #[arg(long)]
        text: bool,
    },
    /// Run the pipeline once for a source.
    Analyze {
        #[arg(long)]
        source: String,
        #[arg(long)]
        project: String,
        file: PathBuf,
        #[arg(long)]
        commit: Option<String>,
    },
    /// CI gate. Exits with status 1 when the candidate is blocked.
    Validate {
        #[arg(long)]
        project: String,
        file: PathBuf,
        #[arg(long)]
        environment: Option<String>,
    },
    TestChannel {
        channel: PathBuf,
        #[arg(long, default_value = "test")]
        project: String,
    },
    Health {
        #[arg(long)]
        project: String,
    },
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    let (host, port) = match &cli.command {
        Commands::Serve { host, port } => (host.clone(), *port),
        _ => (None, None),
    };
    config.apply_overrides(ConfigOverrides {
        db_path: cli.db.clone(),
        host,
        port,
    });

    if matches!(cli.command, Commands::Config { .. }) {
        return handle_config_command(&cli.command, &config, &config_path);
    }
    if let Commands::Diff { old, new, text } = &cli.command {
        return run_diff(old, new, *text, cli.output);
    }

    let store = open_store(&config, cli.memory)?;
    if let Commands::Serve { .. } = &cli.command {
        let bind = format!("{}:{}", config.server.host, config.server.port);
        let addr: SocketAddr = bind
            .parse()
            .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
        return run_server(config, store, addr).await;
    }

    match &cli.command {
        Commands::Analyze {
            source,
            project,
            file,
            commit,
        } => {
            let orchestrator = build_orchestrator(&config, store).await?;
            let request = AnalyzeRequest {
                source_id: source.clone(),
                project_id: project.clone(),
                raw_content: read_file(file)?,
                commit_ref: commit.clone(),
            };
            let report = orchestrator.handle(&request).await;
            print_reports(std::slice::from_ref(&report), cli.output)?;
            if let Some(error) = &report.error {
                return Err(anyhow!("analysis of {source} failed: {error}"));
            }
        }
        Commands::Validate {
            project,
            file,
            environment,
        } => {
            let request = ValidateRequest {
                project_id: project.clone(),
                new_schema: parse_content(&read_file(file)?)?,
                environment: environment.clone(),
            };
            let response = validate(store.as_ref(), &request).await?;
            match cli.output {
                OutputFormat::Table => {
                    println!("{}", response.message);
                    if response.analysis.total_changes() > 0 {
                        println!("{}", render_changes_table(&response.analysis));
                    }
                }
                OutputFormat::Json => println!("{}", render_json(&response)?),
                OutputFormat::Csv => print!("{}", changes_to_csv(&response.analysis)?),
            }
            if response.status == GateStatus::Blocked {
                std::process::exit(1);
            }
        }
        Commands::TestChannel {
            channel: channel_path,
            project,
        } => {
            let raw = read_file(channel_path)?;
            let channel: AlertChannelConfig = serde_json::from_str(&raw).with_context(|| {
                format!("invalid channel definition in {}", channel_path.display())
            })?;
            let dispatcher = AlertDispatcher::new(config.channel_context()?);
            let result = dispatcher.test_send(project, &channel).await;
            print_test_result(&channel, &result, cli.output)?;
        }
        Commands::Health { project } => {
            let sources = store.project_sources(project).await?;
            match cli.output {
                OutputFormat::Table => {
                    let state = store
                        .project_health(project)
                        .await?
                        .map(|s| s.as_str())
                        .unwrap_or("unknown");
                    println!("Project {project}: {state}");
                    println!("{}", render_health_table(&sources));
                }
                OutputFormat::Json => println!("{}", render_json(&sources)?),
                OutputFormat::Csv => {
                    warn!("CSV output for health not implemented, using JSON");
                    println!("{}", render_json(&sources)?);
                }
            }
        }
        Commands::Diff { .. } | Commands::Config { .. } => {}
        Commands::Serve { .. } => unreachable!("serve command handled before dispatch"),
    }

    Ok(())
}

fn handle_config_command(command: &Commands, config: &Config, config_path: &Path) -> Result<()> {
    let Commands::Config { init, show } = command else {
        return Ok(());
    };
    if *init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if *show || !*init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn open_store(config: &Config, memory: bool) -> Result<Arc<dyn PipelineStore>> {
    if memory {
        info!("using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let db_path = config.resolved_db_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed opening database {}", db_path.display()))?;
    Ok(Arc::new(store))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))
}

fn run_diff(old: &Path, new: &Path, text: bool, format: OutputFormat) -> Result<()> {
    let old_value = parse_content(&read_file(old)?)?;
    let new_value = parse_content(&read_file(new)?)?;
    let comparison = compare(
        &ApiDocument::from_value(&old_value)?,
        &ApiDocument::from_value(&new_value)?,
    )?;
    let analysis = classify(&comparison).into_analysis(None, None);
    if text {
        println!("{}", textual_diff(&old_value, &new_value));
    }
    print_changes(&analysis, format)
}

fn print_changes(analysis: &AnalysisResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_changes_table(analysis));
            println!("{} (overall: {})", analysis.summary, analysis.overall_severity);
        }
        OutputFormat::Json => println!("{}", render_json(analysis)?),
        OutputFormat::Csv => print!("{}", changes_to_csv(analysis)?),
    }
    Ok(())
}

fn print_reports(reports: &[RunReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_reports_table(reports));
            for report in reports {
                if let Some(analysis) = &report.analysis {
                    if analysis.total_changes() > 0 {
                        println!("{}", render_changes_table(analysis));
                    }
                }
                if !report.alerts.is_empty() {
                    println!("{}", render_outcomes_table(&report.alerts));
                }
            }
        }
        OutputFormat::Json => println!("{}", render_json(reports)?),
        OutputFormat::Csv => print!("{}", reports_to_csv(reports)?),
    }
    Ok(())
}

fn print_test_result(
    channel: &AlertChannelConfig,
    result: &TestSendResult,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", render_json(result)?),
        OutputFormat::Table | OutputFormat::Csv => {
            let outcome = breakwatch::alert::AlertDispatchOutcome {
                channel_type: channel.channel_type,
                success: result.success,
                message: result.message.clone(),
                retriable: result
                    .details
                    .as_ref()
                    .and_then(|d| d.get("retriable"))
                    .and_then(|r| r.as_bool()),
            };
            match format {
                OutputFormat::Csv => print!("{}", outcomes_to_csv(&[outcome])?),
                _ => println!("{}", render_outcomes_table(&[outcome])),
            }
        }
    }
    Ok(())
}
