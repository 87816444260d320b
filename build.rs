// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: compose configuration file
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .required(true)
        .help("Compose configuration file")
}

fn build_cli() -> Command {
    Command::new("distcompose")
        .version(env!("CARGO_PKG_VERSION"))
        .author("distcompose Contributors")
        .about("Compose distribution trees, repositories and install media")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run a compose")
                .arg(config_arg())
                .arg(
                    Arg::new("target_dir")
                        .long("target-dir")
                        .default_value(".")
                        .help("Directory the compose directory is created in"),
                )
                .arg(
                    Arg::new("compose_dir")
                        .long("compose-dir")
                        .help("Resume an existing compose directory instead of creating one"),
                )
                .arg(Arg::new("label").long("label").help("Compose label, e.g. RC-1.0 or Beta-1.0"))
                .arg(
                    Arg::new("compose_type")
                        .long("compose-type")
                        .default_value("production")
                        .help("production, test, nightly or ci"),
                )
                .arg(
                    Arg::new("debug")
                        .long("debug")
                        .action(ArgAction::SetTrue)
                        .help("Reuse outputs of earlier runs where possible"),
                )
                .arg(
                    Arg::new("supported")
                        .long("supported")
                        .action(ArgAction::SetTrue)
                        .help("Mark the compose as supported"),
                )
                .arg(
                    Arg::new("skip_phases")
                        .long("skip-phase")
                        .action(ArgAction::Append)
                        .help("Skip a phase (repeatable)"),
                )
                .arg(
                    Arg::new("just_phases")
                        .long("just-phase")
                        .action(ArgAction::Append)
                        .help("Run only the given phases (repeatable)"),
                )
                .arg(
                    Arg::new("old_composes")
                        .long("old-composes")
                        .action(ArgAction::Append)
                        .help("Directory searched for older composes (repeatable)"),
                )
                .arg(
                    Arg::new("koji_event")
                        .long("koji-event")
                        .help("Build-system event to pin the package set to"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Check a configuration file against every phase")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("variants")
                .about("Print the variant tree of a variants document")
                .arg(Arg::new("file").required(true).help("Variants XML file"))
                .arg(
                    Arg::new("tree_arches")
                        .long("tree-arch")
                        .action(ArgAction::Append)
                        .help("Keep only these arches (repeatable)"),
                ),
        )
        .subcommand(Command::new("check-tools").about("Report external programs missing from PATH"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(Arg::new("shell").required(true).help("Shell to generate completions for")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("distcompose.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
