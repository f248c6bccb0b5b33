//! Agent binary for the Quartermaster scheduling engine.
//!
//! Wires the frame scheduler to a seeded simulated engine and the sample
//! policy set, runs a bounded session, and prints the run summary as JSON
//! on stdout.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing) and route panic reports
//!    through it
//! 2. Load configuration from `quartermaster.yaml` (or `QUARTERMASTER_CONFIG`)
//! 3. Build the scheduler context and register the sample policies
//! 4. Create the simulated engine from the `simulation` section
//! 5. Run until the tick limit or the end of the session
//! 6. Print the summary

mod error;
mod policies;
mod sim;

use std::path::{Path, PathBuf};

use quartermaster_core::config::AgentConfig;
use quartermaster_core::runner::{self, RunBounds};
use quartermaster_core::scheduler::{FrameScheduler, SchedulerContext};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::AgentError;
use crate::sim::{SimulatedEngine, SimulationConfig};

/// Environment variable naming the config file.
const CONFIG_PATH_ENV: &str = "QUARTERMASTER_CONFIG";

/// Config file read when `QUARTERMASTER_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "quartermaster.yaml";

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    install_panic_hook();

    info!("quartermaster-agent starting");

    // 2. Load configuration.
    let path = config_path();
    let config = load_config(&path)?;
    let sim_config = load_sim_config(&path)?;
    info!(
        path = %path.display(),
        error_mode = ?config.scheduler.error_mode,
        max_ticks = config.run.max_ticks,
        seed = config.run.seed,
        "Configuration loaded"
    );

    // 3. Scheduler and policies.
    let mut scheduler = FrameScheduler::new(config.scheduler.clone());
    for policy in policies::sample_policies() {
        scheduler.register(policy)?;
    }
    let mut ctx = SchedulerContext::from_config(&config);

    // 4. Simulated engine.
    let mut engine = SimulatedEngine::new(sim_config, config.run.seed, config.economy.starting);

    // 5. Run.
    let summary = runner::run_agent(
        &mut scheduler,
        &mut ctx,
        &mut engine,
        RunBounds::from(&config.run),
    )
    .await?;
    info!(
        lost_commands = engine.lost_commands(),
        research = engine.research().len(),
        abandoned = ctx.retry.abandoned(),
        "Engine totals"
    );

    // 6. Report.
    let json = serde_json::to_string_pretty(&summary)?;
    println!("{json}");
    Ok(())
}

/// Replace the default panic hook with a debug-level tracing event.
///
/// The scheduler catches subsystem panics and reports them itself, rate
/// limited per subsystem in resilient mode. The default hook would print
/// every one of them to stderr regardless of that limit.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()));
        debug!(
            location = location.as_deref().unwrap_or("unknown"),
            message = %panic_summary(info.payload()),
            "Panic caught"
        );
    }));
}

/// The panic payload as text, when it is a string.
fn panic_summary(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load the agent configuration, falling back to defaults when the file
/// does not exist.
fn load_config(path: &Path) -> Result<AgentConfig, AgentError> {
    if path.exists() {
        Ok(AgentConfig::from_file(path)?)
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Ok(AgentConfig::parse("")?)
    }
}

/// Load the `simulation` section of the config file.
///
/// The agent config ignores unknown sections, so the simulated engine's
/// parameters live in the same file without the core knowing about them.
fn load_sim_config(path: &Path) -> Result<SimulationConfig, AgentError> {
    if !path.exists() {
        return Ok(SimulationConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| AgentError::Simulation {
        message: format!("failed to read config file: {e}"),
    })?;
    let raw: serde_yml::Value =
        serde_yml::from_str(&contents).map_err(|e| AgentError::Simulation {
            message: format!("failed to parse config YAML: {e}"),
        })?;

    let config = raw.get("simulation").map_or_else(
        || Ok(SimulationConfig::default()),
        |section| {
            serde_yml::from_value(section.clone()).map_err(|e| AgentError::Simulation {
                message: format!("failed to parse simulation config: {e}"),
            })
        },
    )?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use quartermaster_core::runner::RunEndReason;
    use rust_decimal::Decimal;

    use super::*;

    #[tokio::test]
    async fn sample_session_runs_to_completion() {
        let mut config = AgentConfig::default();
        config.run.max_ticks = 600;

        let mut scheduler = FrameScheduler::new(config.scheduler.clone());
        for policy in policies::sample_policies() {
            scheduler.register(policy).unwrap();
        }
        let mut ctx = SchedulerContext::from_config(&config);
        let mut engine = SimulatedEngine::new(
            SimulationConfig::default(),
            config.run.seed,
            config.economy.starting,
        );

        let summary = runner::run_agent(
            &mut scheduler,
            &mut ctx,
            &mut engine,
            RunBounds::from(&config.run),
        )
        .await
        .unwrap();

        assert_eq!(summary.end_reason, RunEndReason::MaxTicksReached);
        assert_eq!(summary.total_ticks, 600);
        assert_eq!(summary.errors, 0);
        assert!(summary.commands_issued > 0);
        assert!(summary.final_balances.fast >= Decimal::ZERO);
        assert!(summary.final_balances.slow >= Decimal::ZERO);
        assert!(
            summary
                .final_report
                .subsystems
                .iter()
                .any(|s| s.name == "emergency_defense")
        );
        assert!(serde_json::to_string(&summary).is_ok());
    }

    #[test]
    fn panic_payloads_are_summarized() {
        let literal = std::panic::catch_unwind(|| {
            std::panic::panic_any("boom");
        })
        .unwrap_err();
        assert_eq!(panic_summary(literal.as_ref()), "boom");

        let formatted = std::panic::catch_unwind(|| {
            std::panic::panic_any(format!("code {}", 7));
        })
        .unwrap_err();
        assert_eq!(panic_summary(formatted.as_ref()), "code 7");

        let other = std::panic::catch_unwind(|| {
            std::panic::panic_any(7_u32);
        })
        .unwrap_err();
        assert_eq!(panic_summary(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn caught_panics_survive_the_quiet_hook() {
        use quartermaster_core::actuation::RecordingSink;
        use quartermaster_core::config::ErrorMode;
        use quartermaster_core::subsystem::{Subsystem, SubsystemError, TickContext};
        use quartermaster_types::{SubsystemRole, WorldSnapshot};

        struct Volatile;

        impl Subsystem for Volatile {
            fn name(&self) -> &str {
                "volatile"
            }

            fn role(&self) -> SubsystemRole {
                SubsystemRole::Support
            }

            #[allow(clippy::panic)]
            fn run(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
                panic!("handler exploded");
            }
        }

        let mut config = AgentConfig::default();
        config.scheduler.error_mode = ErrorMode::Resilient;
        config.scheduler.max_error_logs = 2;
        let mut scheduler = FrameScheduler::new(config.scheduler.clone());
        scheduler.register(Box::new(Volatile)).unwrap();
        let mut ctx = SchedulerContext::from_config(&config);
        let mut sink = RecordingSink::new();

        let previous = std::panic::take_hook();
        install_panic_hook();
        let steps: Vec<_> = (1..=10)
            .map(|tick| scheduler.step(&mut ctx, tick, &WorldSnapshot::at(tick), &mut sink))
            .collect();
        std::panic::set_hook(previous);

        assert!(steps.iter().all(|step| step.as_ref().is_ok_and(|r| r.errors == 1)));
        let descriptor = scheduler.registry().get("volatile").unwrap();
        assert_eq!(descriptor.total_errors(), 10);
        let report = ctx.activity.report(10);
        let line = report.subsystems.iter().find(|s| s.name == "volatile").unwrap();
        assert_eq!(line.suppressed_errors, 8);
    }

    #[test]
    fn nan_rate_in_simulation_section_is_rejected() {
        let path = std::env::temp_dir().join("quartermaster-agent-nan-rate.yaml");
        std::fs::write(&path, "simulation:\n  lost_command_rate: .nan\n").unwrap();
        let result = load_sim_config(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(AgentError::Simulation { .. })));
    }

    #[test]
    fn simulation_section_is_optional() {
        let path = std::env::temp_dir().join("quartermaster-agent-missing.yaml");
        let config = load_sim_config(&path).unwrap();
        assert_eq!(config, SimulationConfig::default());
    }
}
