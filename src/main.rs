// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hookwise main entry point - configuration validation and hook planning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use hookwise::config::{self, SettingsFormat};
use hookwise::hook::{HookSet, TypeState};
use hookwise::instrumentation::{self, Phase};
use hookwise::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};
use hookwise::{Engine, RecordingBackend, TypeDescription};

/// Hookwise version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hookwise - instrumentation configuration tooling.
#[derive(Parser)]
#[command(name = "hookwise")]
#[command(author, version, about = "Validate instrumentation configurations and plan hooks", long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Show trace output
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Subcommands for hookwise.
#[derive(Subcommand)]
enum Commands {
    /// Validate a settings file and print every violation
    Validate {
        /// Settings file (JSON or YAML)
        file: PathBuf,
    },

    /// Show which hooks a settings file produces for a set of types
    Plan {
        /// Settings file (JSON or YAML)
        file: PathBuf,

        /// File with a list of type descriptions (JSON or YAML)
        #[arg(short, long, env = "HOOKWISE_TYPES")]
        types: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Print health counters and operation timings afterwards
        #[arg(long)]
        metrics: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_telemetry(&TelemetryConfig::from_flags(cli.debug, cli.trace))?;

    match cli.command {
        Commands::Validate { file } => {
            let ok = validate(&file)?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Plan {
            file,
            types,
            format,
            metrics,
        } => {
            plan(&file, &types, format).await?;
            if metrics {
                eprintln!("{}", GLOBAL_METRICS.snapshot().format_report());
            }
        }
        Commands::Version => {
            println!("hookwise {}", VERSION);
        }
    }
    Ok(())
}

/// Returns whether the file is valid.
fn validate(file: &Path) -> anyhow::Result<bool> {
    let settings = config::load_settings_file(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let violations = instrumentation::validate(&settings);

    if violations.is_empty() {
        println!("{} {}", "✓".green(), format!("{} is valid", file.display()).bright_white());
        return Ok(true);
    }

    println!(
        "{} {}",
        "✗".red(),
        format!("{} violation(s) in {}", violations.len(), file.display()).bright_white()
    );
    for violation in &violations {
        println!("  {} {}", "-".red(), violation);
    }
    Ok(false)
}

fn load_types(path: &Path) -> anyhow::Result<Vec<TypeDescription>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let types = match SettingsFormat::from_path(path) {
        SettingsFormat::Yaml => serde_yaml::from_str(&content)?,
        SettingsFormat::Json => serde_json::from_str(&content)?,
    };
    Ok(types)
}

async fn plan(file: &Path, types_file: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let settings = config::load_settings_file(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let types = load_types(types_file)?;

    let backend = Arc::new(RecordingBackend::new());
    let engine = Engine::new(backend.clone());
    if let Err(err) = engine.apply_settings(settings) {
        for violation in err.violations() {
            eprintln!("  {} {}", "-".red(), violation);
        }
        return Err(err.into());
    }
    for ty in &types {
        engine.discover_type(ty.clone());
    }
    let report = engine.reconcile().await;

    match format {
        OutputFormat::Json => {
            let plan: Vec<_> = types
                .iter()
                .map(|ty| {
                    let hooks = backend.applied(&ty.name);
                    serde_json::json!({
                        "type": ty.name,
                        "state": state_name(engine.manager().state_of(&ty.name)),
                        "methods": hooks.as_deref().map(methods_json).unwrap_or_default(),
                        "sensors": hooks.as_deref().map(|h| h.sensors.clone()).unwrap_or_default(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        OutputFormat::Text => {
            for ty in &types {
                let state = engine.manager().state_of(&ty.name);
                println!("{} {}", ty.name.bright_cyan().bold(), format!("[{}]", state_name(state)).dimmed());
                let Some(hooks) = backend.applied(&ty.name) else {
                    continue;
                };
                for (sensor, methods) in &hooks.sensors {
                    println!("  {} {} {}", "◆".yellow(), sensor, methods.join(", ").dimmed());
                }
                for method in &ty.methods {
                    let signature = method.signature();
                    match hooks.hook(&signature) {
                        Some(hook) => {
                            println!("  {} {} ({})", "✓".green(), signature.bright_white(), hook.rules.join(", "));
                            for phase in Phase::ALL {
                                for call in hook.calls(phase) {
                                    println!("      {:<10} {} = {}", phase.name(), call.data_key, call.action.name);
                                }
                            }
                            if let Some((rule, _)) = &hook.tracing {
                                println!("      {:<10} span from {}", "tracing", rule);
                            }
                            for metric in &hook.metrics {
                                println!("      {:<10} {}", "metric", metric.name);
                            }
                        }
                        None => println!("  {} {}", "·".dimmed(), signature.dimmed()),
                    }
                }
            }
            println!(
                "\n{} checked, {} hooked, {} failed",
                report.checked, report.instrumented, report.failed
            );
        }
    }
    Ok(())
}

fn methods_json(hooks: &HookSet) -> serde_json::Value {
    hooks
        .methods
        .iter()
        .map(|(signature, hook)| {
            let phases: serde_json::Map<String, serde_json::Value> = hook
                .phases
                .iter()
                .map(|(phase, calls)| {
                    let calls: Vec<_> = calls
                        .iter()
                        .map(|c| serde_json::json!({ "key": c.data_key, "action": c.action.name }))
                        .collect();
                    (phase.name().to_string(), serde_json::Value::from(calls))
                })
                .collect();
            (
                signature.clone(),
                serde_json::json!({
                    "rules": hook.rules,
                    "phases": phases,
                    "span": hook.tracing.as_ref().map(|(rule, _)| rule),
                    "metrics": hook.metrics.iter().map(|m| &m.name).collect::<Vec<_>>(),
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn state_name(state: Option<TypeState>) -> &'static str {
    match state {
        Some(TypeState::Pending) => "pending",
        Some(TypeState::Hooked) => "hooked",
        Some(TypeState::NoInstrumentation) => "no instrumentation",
        None => "unseen",
    }
}
