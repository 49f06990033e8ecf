//! Resolve a document or URL to the application that should open it, then
//! hand off to the launch pipeline.

use anyhow::Result;
use clap::Parser;

use launchkit::discovery;
use launchkit::launcher::Collaborators;
use launchkit::opener;
use launchkit::registry::Registry;
use launchkit::ui::{
    FirstCandidateChooser, NoNotifier, NoWindowSystem, PkgDatabase, TerminalConfirmer,
};

/// Open a document or URL with the right application.
#[derive(Parser)]
#[command(name = "open", version)]
struct Cli {
    /// Always present the application chooser, even with one candidate.
    #[arg(long)]
    chooser: bool,
    /// Document path or URL to open.
    target: String,
    /// Extra arguments forwarded to the application.
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
    opener::open(
        &mut registry,
        &collaborators,
        &cli.target,
        &cli.args,
        cli.chooser,
    )
}
