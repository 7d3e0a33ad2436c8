//! Builder CLI entry point (spec §6 "Run CLI").
//!
//! `run <requirements_path> --project-dir <dir> [--pregnancy-depth N
//! --pregnancy-signatures JSON]`. Exit code 0 iff the run's TestResult has
//! `all_passed`, 1 otherwise (including a failed child delegation).

use anyhow::{Context, Result};
use builder_orchestrator::config::Config;
use builder_orchestrator::mcp::bridge;
use builder_orchestrator::orchestrator::Orchestrator;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "builder")]
#[command(author = "Builder Contributors")]
#[command(version)]
#[command(about = "Automated code-generation pipeline: design tests, generate code, test, refine, persist", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline end to end against a requirements document.
    Run {
        /// Path to the requirements Markdown file.
        requirements_path: PathBuf,

        /// Directory the output `src/` and `tests/` trees are written under.
        #[arg(long = "project-dir")]
        project_dir: PathBuf,

        /// Pregnancy recursion depth of this invocation (set by a parent
        /// Builder delegating to a child; 0 for a top-level run).
        #[arg(long = "pregnancy-depth", default_value_t = 0)]
        pregnancy_depth: u32,

        /// JSON array of capability signatures already seen in this
        /// pregnancy chain (set by a parent Builder delegating to a child).
        #[arg(long = "pregnancy-signatures", default_value = "[]")]
        pregnancy_signatures: String,
    },

    /// Internal: run the stdio-to-HTTP sidecar bridge (spec §4.4). Spawned
    /// by `SidecarManager`'s bridge launch mode, never invoked by hand.
    #[command(name = "mcp-sidecar-bridge", hide = true)]
    McpSidecarBridge {
        #[arg(long)]
        name: String,

        #[arg(long)]
        host: String,

        #[arg(long)]
        port: u16,

        #[arg(long = "timeout-seconds")]
        timeout_seconds: u64,

        #[arg(long)]
        cwd: PathBuf,

        /// The wrapped stdio MCP server's launch command, e.g.
        /// `-- npx -y @modelcontextprotocol/server-filesystem /tmp`.
        #[arg(last = true, required = true)]
        wrapped_command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            requirements_path,
            project_dir,
            pregnancy_depth,
            pregnancy_signatures,
        } => {
            let seen_signatures: Vec<String> = serde_json::from_str(&pregnancy_signatures)
                .context("--pregnancy-signatures must be a JSON array of strings")?;

            let config = Config::load().context("failed to load configuration")?;

            tracing::info!(
                requirements = %requirements_path.display(),
                project_dir = %project_dir.display(),
                depth = pregnancy_depth,
                "builder run starting"
            );

            let orchestrator = Orchestrator::new(config);
            let outcome = orchestrator
                .run(&requirements_path, &project_dir, pregnancy_depth, seen_signatures)
                .await
                .context("orchestrator run failed")?;

            let result = &outcome.result;
            if let Some(summary) = &outcome.mcp_bootstrap {
                if let Some(sidecar_summary) = summary.get("sidecar_summary") {
                    tracing::info!(
                        "mcp summary: available={} unavailable={} sidecars={}",
                        summary.get("available_count").cloned().unwrap_or_default(),
                        summary.get("unavailable_count").cloned().unwrap_or_default(),
                        sidecar_summary,
                    );
                }
            }
            if let Some(decision) = &outcome.capability_decision {
                tracing::info!(capable = decision.capable, confidence = decision.confidence, "capability gate decision");
            }
            if let Some(delegation) = &outcome.delegated_to_child {
                tracing::info!(delegation = %delegation, "run delegated to child builder");
            }

            tracing::info!(
                "run complete: {}/{} tests passed (all_passed={})",
                result.passed,
                result.total_tests,
                result.all_passed,
            );
            tracing::info!(run_log = %outcome.run_log_file.display(), "run log written");

            if result.all_passed {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Commands::McpSidecarBridge {
            name,
            host,
            port,
            timeout_seconds,
            cwd,
            wrapped_command,
        } => {
            bridge::serve(
                name,
                host,
                port,
                wrapped_command,
                cwd,
                Duration::from_secs(timeout_seconds),
            )
            .await
            .context("sidecar bridge exited with an error")?;
            Ok(())
        }
    }
}
