//! container-bootstrap - Main entry point
//!
//! Provisions the container user from the environment, then hands off to the
//! container command and exits with its status.

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use container_bootstrap::cli::{Cli, Commands};
use container_bootstrap::command_runner::{ProcessExecutor, RecordingExecutor};
use container_bootstrap::{
    Bootstrap, BootstrapConfig, BootstrapError, BootstrapSettings, HandoffCommand, ProcessGuard,
    SetupOutcome, process_guard, sanity,
};

/// Initialize logging.
///
/// Logs go to stderr so the container command keeps stdout to itself.
/// `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);
    debug!(?cli, "CLI arguments parsed");

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            e.downcast_ref::<BootstrapError>()
                .map(BootstrapError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

fn load_settings(cli: &Cli) -> Result<BootstrapSettings> {
    let mut settings = match cli.config {
        Some(ref path) => {
            info!("Loading settings from {:?}", path);
            BootstrapSettings::load_from_file(path)?
        }
        None => BootstrapSettings::default(),
    };
    cli.apply_overrides(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn run(cli: Cli) -> Result<i32> {
    let settings = load_settings(&cli)?;
    let config = BootstrapConfig::from_env().map_err(BootstrapError::from)?;
    let bootstrap = Bootstrap::new(config, settings, cli.variant).dry_run(cli.dry_run);

    match cli.command {
        Commands::Validate => {
            println!(
                "✓ Configuration is valid: user={} email={} variant={}",
                bootstrap.config().user,
                bootstrap.config().email.as_deref().unwrap_or("<unset>"),
                bootstrap.variant()
            );
            Ok(0)
        }
        Commands::Plan => {
            print_plan(&bootstrap)?;
            Ok(0)
        }
        Commands::Run { command } => provision_and_handoff(&bootstrap, command, cli.dry_run),
    }
}

/// Print the commands a run would execute
fn print_plan(bootstrap: &Bootstrap) -> Result<()> {
    let mut recorder = RecordingExecutor::new();
    let report = bootstrap.clone().dry_run(true).run(&mut recorder)?;

    println!("Bootstrap plan ({} variant):", bootstrap.variant());
    for (i, cmd) in recorder.commands().iter().enumerate() {
        match cmd.workdir {
            Some(ref dir) => println!("  {}. (cd {}) {}", i + 1, dir.display(), cmd.display),
            None => println!("  {}. {}", i + 1, cmd.display),
        }
    }
    if let Some(lines) = report.exports {
        let profile = bootstrap
            .settings()
            .profile_path(&bootstrap.config().user);
        println!("  append to {}:", profile.display());
        for line in lines {
            println!("      {}", line);
        }
    }
    match report.handoff_workdir {
        Some(dir) => println!("  hand off to the container command in {}", dir.display()),
        None => println!("  hand off to the container command"),
    }
    Ok(())
}

fn provision_and_handoff(bootstrap: &Bootstrap, command: Vec<String>, dry_run: bool) -> Result<i32> {
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    if !dry_run {
        sanity::verify_environment(bootstrap.variant()).into_result()?;
    }

    let report = {
        let _guard = ProcessGuard::new();
        let mut executor = ProcessExecutor::new(dry_run).stream_output_of("su");
        bootstrap.run(&mut executor)?
    };

    if let SetupOutcome::IgnoredFailure(ref reason) = report.setup {
        warn!("Continuing despite setup failure: {}", reason);
    }

    let mut handoff = HandoffCommand::new(command);
    if let Some(dir) = report.handoff_workdir {
        handoff = handoff.in_dir(dir);
    }

    if dry_run {
        info!("[DRY RUN] Would hand off to {:?}", handoff.argv);
        return Ok(0);
    }

    Ok(handoff.launch(bootstrap.settings().handoff)?)
}
