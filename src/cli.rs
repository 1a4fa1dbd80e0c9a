//! Command-line interface.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::channel::{SandboxController, SandboxWorker};
use crate::config::types::{ExecutionResult, Language, SandboxConfig};
use crate::engine::ExecutionEngine;
use crate::netcheck::NetworkAuditor;
use crate::validator::CodeValidator;

#[derive(Parser)]
#[command(name = "sealbox", version, about = "Isolated code execution sandbox")]
pub struct Cli {
    /// Append JSON security events to this file
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    /// Load an extra validation rule set from this JSON file
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically validate a code file without running it
    Validate {
        /// Source file, or - for stdin
        file: PathBuf,
        #[arg(short, long, default_value = "python")]
        language: Language,
    },
    /// Validate and execute a code file locally
    Run {
        /// Source file, or - for stdin
        file: PathBuf,
        #[arg(short, long, default_value = "python")]
        language: Language,
        /// Wall-clock timeout in seconds
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,
    },
    /// Watch the command directory and execute queued commands
    Worker,
    /// Submit a code file through the command channel and wait
    Submit {
        file: PathBuf,
        #[arg(short, long, default_value = "python")]
        language: Language,
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,
    },
    /// Check that a worker is alive on the channel
    Health {
        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },
    /// Remove stale command and result files from the channel
    Cleanup {
        /// Age in seconds beyond which a channel file is stale
        #[arg(long, default_value_t = 300)]
        max_age: u64,
    },
    /// Audit a container's network isolation
    Netcheck {
        /// Container name or id
        container: String,
        /// Drop outbound traffic if the container is not isolated
        #[arg(long)]
        lockdown: bool,
    },
}

impl clap::builder::ValueParserFactory for Language {
    type Parser = clap::builder::ValueParser;
    fn value_parser() -> Self::Parser {
        clap::builder::ValueParser::new(|s: &str| s.parse::<Language>().map_err(|e| e.to_string()))
    }
}

fn read_source(path: &PathBuf) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        use std::io::Read;
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("reading stdin")?;
        Ok(code)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn print_result(result: &ExecutionResult) {
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
        if !result.stdout.ends_with('\n') {
            println!();
        }
    }
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }
    log::info!(
        "exit {} in {:.3}s (mem {} bytes, cpu {:.3}s)",
        result.exit_code,
        result.execution_time,
        result.memory_usage,
        result.cpu_usage
    );
}

/// Process exit code for a finished execution: pass the child's code
/// through, map sentinels and rejections onto 1.
fn exit_code_for(result: &ExecutionResult) -> i32 {
    if result.security_error || result.exit_code < 0 {
        1
    } else {
        result.exit_code
    }
}

pub fn run() -> anyhow::Result<i32> {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(path) = &cli.audit_log {
        crate::audit::init(path);
    }

    let mut config = SandboxConfig::from_env();
    if cli.rules.is_some() {
        config.rules_file = cli.rules;
    }

    match cli.command {
        Commands::Validate { file, language } => {
            let code = read_source(&file)?;
            let validation = CodeValidator::from_config(&config)?.validate(&code, language);
            for violation in &validation.violations {
                println!("{}", violation);
            }
            if validation.is_accepted() {
                println!("ACCEPTED");
                Ok(0)
            } else {
                println!("REJECTED");
                Ok(1)
            }
        }
        Commands::Run {
            file,
            language,
            timeout,
        } => {
            let code = read_source(&file)?;
            // one-shot runs never touch the channel directories
            config.ensure_workspace()?;
            let engine = ExecutionEngine::new(config)?;
            let command =
                crate::config::types::ExecutionCommand::new(code, language, timeout);
            let result = engine.execute(&command);
            print_result(&result);
            Ok(exit_code_for(&result))
        }
        Commands::Worker => {
            let worker = SandboxWorker::new(config)?;
            static STOP: AtomicBool = AtomicBool::new(false);
            worker.run(&STOP)?;
            Ok(0)
        }
        Commands::Submit {
            file,
            language,
            timeout,
        } => {
            let code = read_source(&file)?;
            let controller = SandboxController::new(config)?;
            let result = controller.execute(code, language, timeout)?;
            print_result(&result);
            Ok(exit_code_for(&result))
        }
        Commands::Health { wait } => {
            let controller = SandboxController::new(config)?;
            if controller.health_check(Duration::from_secs(wait))? {
                println!("worker alive");
                Ok(0)
            } else {
                eprintln!("no worker reply within {}s", wait);
                Ok(1)
            }
        }
        Commands::Cleanup { max_age } => {
            let controller = SandboxController::new(config)?;
            let removed = controller.cleanup_stale(Duration::from_secs(max_age))?;
            println!("removed {} stale channel file(s)", removed);
            Ok(0)
        }
        Commands::Netcheck {
            container,
            lockdown,
        } => {
            let auditor = NetworkAuditor::new(&container);
            let report = auditor.run_audit()?;
            for outcome in &report.outcomes {
                println!(
                    "{:<16} {}  {}",
                    outcome.name,
                    if outcome.isolated { "isolated" } else { "OPEN" },
                    outcome.detail
                );
            }
            if report.isolated() {
                println!("container {} is network isolated", container);
                return Ok(0);
            }
            eprintln!(
                "container {} has {} open path(s)",
                container,
                report.failures().count()
            );
            if lockdown {
                if auditor.apply_lockdown()? {
                    println!("outbound lockdown applied");
                } else {
                    bail!("lockdown could not be fully applied");
                }
            }
            Ok(1)
        }
    }
}
