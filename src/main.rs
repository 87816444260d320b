// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use distcompose::compose::{ComposeOptions, ComposeType, create_compose_dir};
use distcompose::config::checks::missing_tools;
use distcompose::phases::{PHASE_NAMES, SharedPkgset, all_phases};
use distcompose::pipeline::{ComposeRequest, prepare_compose, run_compose, validate_phases};
use distcompose::variants::{describe, parse_variants};
use distcompose::{Compose, ComposeConf};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "distcompose")]
#[command(author, version, about = "Compose distribution trees, repositories and install media", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a compose
    Run {
        /// Compose configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory the compose directory is created in
        #[arg(long, default_value = ".")]
        target_dir: PathBuf,

        /// Resume an existing compose directory instead of creating one
        #[arg(long)]
        compose_dir: Option<PathBuf>,

        /// Compose label, e.g. RC-1.0 or Beta-1.0
        #[arg(long)]
        label: Option<String>,

        /// production, test, nightly or ci
        #[arg(long, default_value = "production")]
        compose_type: ComposeType,

        /// Reuse outputs of earlier runs where possible
        #[arg(long)]
        debug: bool,

        /// Mark the compose as supported
        #[arg(long)]
        supported: bool,

        /// Skip a phase (repeatable)
        #[arg(long = "skip-phase")]
        skip_phases: Vec<String>,

        /// Run only the given phases (repeatable)
        #[arg(long = "just-phase")]
        just_phases: Vec<String>,

        /// Directory searched for older composes (repeatable)
        #[arg(long)]
        old_composes: Vec<PathBuf>,

        /// Build-system event to pin the package set to
        #[arg(long)]
        koji_event: Option<u64>,
    },

    /// Check a configuration file against every phase
    Validate {
        /// Compose configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the variant tree of a variants document
    Variants {
        /// Variants XML file
        file: PathBuf,

        /// Keep only these arches (repeatable)
        #[arg(long = "tree-arch")]
        tree_arches: Vec<String>,
    },

    /// Report external programs missing from PATH
    CheckTools,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stderr and, when given, append to `log_file` as well
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn check_phase_names(names: &[String]) -> Result<()> {
    for name in names {
        if !PHASE_NAMES.contains(&name.as_str()) {
            bail!("Unknown phase: {} (known phases: {})", name, PHASE_NAMES.join(", "));
        }
    }
    Ok(())
}

fn cmd_run(request: ComposeRequest) -> Result<()> {
    check_phase_names(&request.options.skip_phases)?;
    check_phase_names(&request.options.just_phases)?;

    // the compose log only exists once the compose directory does
    let startup = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .finish();
    let compose = tracing::subscriber::with_default(startup, || prepare_compose(&request))
        .context("Failed to prepare compose")?;
    let log_file = compose
        .log_file(None, "compose")
        .context("Failed to create log directory")?;
    init_logging(Some(&log_file))?;

    info!("Compose id: {}", compose.compose_id());
    run_compose(Arc::new(compose)).context("Compose failed")?;
    Ok(())
}

fn cmd_validate(config: &Path) -> Result<()> {
    init_logging(None)?;
    let conf = ComposeConf::load(config)
        .with_context(|| format!("Failed to load {}", config.display()))?;
    let scratch = tempfile::tempdir()?;
    let topdir = create_compose_dir(scratch.path(), &conf, ComposeType::Test, None, None)?;
    let compose = Compose::open(conf, &topdir, ComposeOptions::default())?;

    let pkgset = SharedPkgset::default();
    let errors = validate_phases(&compose, &all_phases(&pkgset));
    if errors.is_empty() {
        println!("{}: OK", config.display());
        return Ok(());
    }
    for error in &errors {
        eprintln!("{}", error);
    }
    bail!("{} configuration error(s) in {}", errors.len(), config.display())
}

fn cmd_variants(file: &Path, tree_arches: &[String]) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let tree_arches = (!tree_arches.is_empty()).then_some(tree_arches);
    let forest = parse_variants(&content, tree_arches)?;
    print!("{}", describe(&forest));
    Ok(())
}

fn cmd_check_tools() -> Result<()> {
    let missing = missing_tools();
    if missing.is_empty() {
        println!("All required tools are installed");
        return Ok(());
    }
    for (program, package) in &missing {
        println!("{} (package: {})", program, package);
    }
    bail!("{} tool(s) missing", missing.len())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            target_dir,
            compose_dir,
            label,
            compose_type,
            debug,
            supported,
            skip_phases,
            just_phases,
            old_composes,
            koji_event,
        } => cmd_run(ComposeRequest {
            config,
            target_dir,
            compose_dir,
            compose_type,
            label,
            options: ComposeOptions {
                debug,
                supported,
                skip_phases,
                just_phases,
                old_composes,
                koji_event,
            },
        }),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Variants { file, tree_arches } => cmd_variants(&file, &tree_arches),
        Commands::CheckTools => cmd_check_tools(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "distcompose", &mut std::io::stdout());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "distcompose",
            "run",
            "--config",
            "fedora.toml",
            "--compose-type",
            "nightly",
            "--skip-phase",
            "createiso",
            "--skip-phase",
            "live_images",
        ]);
        let Commands::Run { compose_type, skip_phases, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(compose_type, ComposeType::Nightly);
        assert_eq!(skip_phases, vec!["createiso", "live_images"]);
    }

    #[test]
    fn test_unknown_phase_rejected() {
        assert!(check_phase_names(&["gather".to_string()]).is_ok());
        assert!(check_phase_names(&["buildroot".to_string()]).is_err());
    }
}
