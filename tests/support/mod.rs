//! Shared fixtures for the binary-driving integration tests. Every test
//! gets an isolated registry storage root and discovery root via the env
//! override seams, so nothing touches the real user data.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use tempfile::TempDir;

pub struct Sandbox {
    temp: TempDir,
}

impl Sandbox {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new().context("creating the sandbox")?;
        fs::create_dir(temp.path().join("apps")).context("creating apps dir")?;
        fs::create_dir(temp.path().join("docs")).context("creating docs dir")?;
        Ok(Sandbox { temp })
    }

    pub fn apps(&self) -> PathBuf {
        self.temp.path().join("apps")
    }

    pub fn docs(&self) -> PathBuf {
        self.temp.path().join("docs")
    }

    /// A `.app` bundle whose entry point runs `body` as a shell script.
    pub fn make_app(&self, name: &str, body: &str) -> Result<PathBuf> {
        let bundle = self.apps().join(name);
        fs::create_dir_all(&bundle)?;
        let stem = name.strip_suffix(".app").unwrap_or(name);
        let entry = bundle.join(stem);
        fs::write(&entry, format!("#!/bin/sh\n{body}\n"))?;
        fs::set_permissions(&entry, fs::Permissions::from_mode(0o755))?;
        Ok(bundle)
    }

    pub fn make_descriptor(&self, name: &str, exec: &str, mime_types: &str) -> Result<PathBuf> {
        let descriptor = self.apps().join(name);
        fs::write(
            &descriptor,
            format!("[Desktop Entry]\nName={name}\nExec={exec}\nMimeType={mime_types}\n"),
        )?;
        Ok(descriptor)
    }

    pub fn launch(&self) -> Command {
        self.command(env!("CARGO_BIN_EXE_launch"))
    }

    pub fn open(&self) -> Command {
        self.command(env!("CARGO_BIN_EXE_open"))
    }

    fn command(&self, binary: &str) -> Command {
        let mut command = Command::new(binary);
        command.current_dir(self.docs());
        command.env("LAUNCHKIT_DATA_DIR", self.temp.path().join("data"));
        command.env("LAUNCHKIT_APP_DIRS", self.apps());
        // A leaked parent bundle identity would confuse the overlay
        // assertions.
        command.env_remove("LAUNCHED_BUNDLE");
        command
    }
}

pub fn run(mut command: Command) -> Result<Output> {
    command.output().context("running the binary")
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
