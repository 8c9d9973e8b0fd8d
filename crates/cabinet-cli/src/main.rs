//! Cabinet CLI - autonomous analysis and self-improvement loop
//!
//! Usage:
//!   cabinet                          Run indefinitely
//!   cabinet --max-cycles 3           Three cycles, then stop
//!   cabinet --dry-run --max-cycles 1 Plan only; skip every mutating action
//!   cabinet --skip-improve           Analysis only
//!
//! Exit codes: 0 on a normal stop, non-zero on an engine crash (an external
//! supervisor is expected to restart the process).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use cabinet_agent::SubprocessRunner;
use cabinet_core::{CabinetError, CycleTelemetry, EngineConfig, ErrorEntry, YieldKind};
use cabinet_engine::{
    append_error_entry, append_telemetry, commit_output_data, pull_latest, reexec, run_cycle,
    Engine,
};
use cabinet_tracker::GhCli;
use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cabinet")]
#[command(author, version, about = "Autonomous analysis and self-improvement loop")]
struct Cli {
    /// Maximum cycles to run; 0 = unlimited
    #[arg(long, default_value_t = 0)]
    max_cycles: u64,

    /// Seconds between cycles when the conductor does not override
    #[arg(long, default_value_t = EngineConfig::DEFAULT_COOLDOWN_SECONDS)]
    cooldown: u64,

    /// Model id passed through to agents
    #[arg(long, default_value = EngineConfig::DEFAULT_MODEL)]
    model: String,

    /// Maximum coder-reviewer rounds per PR
    #[arg(long, default_value_t = EngineConfig::DEFAULT_MAX_PR_ROUNDS)]
    max_pr_rounds: u32,

    /// Run the project director every N productive cycles; 0 = disabled
    #[arg(long, default_value_t = EngineConfig::DEFAULT_DIRECTOR_INTERVAL)]
    director_interval: u64,

    /// Log planned actions but skip everything that mutates state
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Skip self-improvement (propose + debate)
    #[arg(long)]
    skip_improve: bool,

    /// Skip news intake and analysis
    #[arg(long)]
    skip_analysis: bool,

    /// Skip the research scout
    #[arg(long)]
    skip_research: bool,

    /// Disable the self-restart sequence between cycles
    #[arg(long)]
    no_reexec: bool,

    /// Workspace root (defaults to the current directory)
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    // Internal: carried across re-execs
    #[arg(long, hide = true, default_value_t = 0)]
    cycle_offset: u64,
    #[arg(long, hide = true, default_value_t = 0)]
    productive_offset: u64,
}

impl Cli {
    fn to_config(&self) -> EngineConfig {
        EngineConfig {
            workspace_root: self.workspace.clone(),
            model: self.model.clone(),
            agent_bin: std::env::var("CABINET_AGENT_BIN").unwrap_or_else(|_| "claude".to_string()),
            cooldown_seconds: self.cooldown,
            max_cycles: self.max_cycles,
            max_pr_rounds: self.max_pr_rounds,
            director_interval: self.director_interval,
            strategic_director_interval: self.director_interval * 2,
            debate_threshold: std::env::var("CABINET_DEBATE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(EngineConfig::DEFAULT_DEBATE_THRESHOLD),
            dry_run: self.dry_run,
            skip_improve: self.skip_improve,
            skip_analysis: self.skip_analysis,
            skip_research: self.skip_research,
            // Posting is silently disabled without credentials; never fatal
            social_posting_enabled: std::env::var("SOCIAL_API_TOKEN")
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false),
            no_reexec: self.no_reexec,
            ..Default::default()
        }
    }

    /// Rebuild argv for the re-exec, with updated cycle offsets.
    fn reexec_argv(&self, cycle_offset: u64, productive_offset: u64) -> Vec<String> {
        let mut argv = vec![
            format!("--cycle-offset={}", cycle_offset),
            format!("--productive-offset={}", productive_offset),
            format!("--max-cycles={}", self.max_cycles),
            format!("--cooldown={}", self.cooldown),
            format!("--model={}", self.model),
            format!("--max-pr-rounds={}", self.max_pr_rounds),
            format!("--director-interval={}", self.director_interval),
            format!("--workspace={}", self.workspace.display()),
        ];
        for (flag, set) in [
            ("--dry-run", self.dry_run),
            ("--verbose", self.verbose),
            ("--skip-improve", self.skip_improve),
            ("--skip-analysis", self.skip_analysis),
            ("--skip-research", self.skip_research),
            ("--no-reexec", self.no_reexec),
        ] {
            if set {
                argv.push(flag.to_string());
            }
        }
        argv
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("set tracing subscriber");

    let runtime = tokio::runtime::Runtime::new().expect("build tokio runtime");
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let config = cli.to_config();
    let executor = GhCli::new(&config.workspace_root);
    let runner = SubprocessRunner::new(&config.agent_bin, &config.workspace_root);
    let engine = Engine::new(config, executor, runner);

    let mut cycle = cli.cycle_offset;
    let mut productive = cli.productive_offset;

    loop {
        cycle += 1;
        if cli.max_cycles > 0 && cycle > cli.max_cycles {
            info!("Reached max cycles ({}); stopping", cli.max_cycles);
            return ExitCode::SUCCESS;
        }

        let outcome = tokio::select! {
            outcome = run_cycle(&engine, cycle, productive) => outcome,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; exiting after completing telemetry");
                return ExitCode::SUCCESS;
            }
        };

        let cooldown = match outcome {
            Ok(outcome) => {
                if outcome.telemetry.productive {
                    productive += 1;
                }
                info!(
                    "Cycle {} done (yield: {:?}, productive total: {})",
                    cycle, outcome.telemetry.yield_kind, productive,
                );
                if outcome.halted {
                    info!("Conductor halted the loop");
                    return ExitCode::SUCCESS;
                }
                if outcome.suggested_cooldown_seconds > 0 {
                    outcome.suggested_cooldown_seconds
                } else {
                    engine.config.cooldown_seconds
                }
            }
            Err(err) => {
                // Engine crash: write a partial record and exit non-zero so
                // the supervisor restarts us
                error!("Cycle {} crashed: {}", cycle, err);
                write_crash_record(&engine.config, cycle, &err);
                return ExitCode::FAILURE;
            }
        };

        let keep_going = cli.max_cycles == 0 || cycle < cli.max_cycles;
        if !keep_going {
            continue;
        }

        info!("Cooling down for {}s", cooldown);
        tokio::time::sleep(Duration::from_secs(cooldown)).await;

        if !engine.config.no_reexec {
            if let Err(err) = commit_output_data(&engine.executor(), &engine.config).await {
                warn!("Journal commit failed (non-fatal): {}", err);
            }
            match pull_latest(&engine.executor()).await {
                Ok(true) => {
                    let argv = cli.reexec_argv(cycle, productive);
                    let err = reexec(&engine.config, &argv);
                    // exec only returns on failure; keep looping in-process
                    warn!("Re-exec failed, continuing in-process: {}", err);
                }
                Ok(false) => info!("Skipping re-exec (pull not fast-forwardable)"),
                Err(err) => warn!("Pull before re-exec failed: {}", err),
            }
        }
    }
}

/// Top-level crash guard: persist a partial telemetry record and the
/// structured error before exiting.
fn write_crash_record(config: &EngineConfig, cycle: u64, err: &CabinetError) {
    let mut telemetry = CycleTelemetry::new(cycle, config.dry_run);
    telemetry.finish(YieldKind::None);
    if let Err(write_err) = append_telemetry(&config.telemetry_path(), &telemetry) {
        error!("Could not write crash telemetry: {}", write_err);
    }
    let entry = ErrorEntry::from_error("engine_crash", err);
    if let Err(write_err) = append_error_entry(&config.errors_path(), &entry) {
        error!("Could not write crash error entry: {}", write_err);
    }
}
