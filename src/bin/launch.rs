//! Resolve an application name, path, or bundle and run it, watching the
//! first seconds for failures worth explaining.

use anyhow::Result;
use clap::Parser;

use launchkit::discovery;
use launchkit::launcher::{self, Collaborators};
use launchkit::registry::Registry;
use launchkit::ui::{
    FirstCandidateChooser, NoNotifier, NoWindowSystem, PkgDatabase, TerminalConfirmer,
};

/// Launch an application and report early failures clearly.
#[derive(Parser)]
#[command(name = "launch", version)]
struct Cli {
    /// Path to an executable or bundle, a command name on the $PATH, or
    /// the name of a registered application.
    target: String,
    /// Arguments forwarded to the application.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    env_logger::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut registry = Registry::open()?;
    discovery::discover(&discovery::well_known_roots(), &mut registry)?;

    let collaborators = Collaborators {
        confirmer: &TerminalConfirmer,
        chooser: &FirstCandidateChooser,
        windows: &NoWindowSystem,
        notifier: &NoNotifier,
        packages: &PkgDatabase,
    };
    launcher::launch(&mut registry, &collaborators, &cli.target, &cli.args)
}
