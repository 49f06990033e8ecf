//! Process startup and the supervised failure window.
//!
//! The parent stays attached for a short window after spawning so early
//! failures (missing libraries, missing interpreters) can be captured and
//! translated. Once the window elapses the child is assumed healthy:
//! stderr is forwarded instead of interpreted, and the parent blocks on
//! the child's exit so its streams are never disrupted by a detach.

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use log::debug;

/// How long early failures are watched for and translated.
pub const SUPERVISION_WINDOW: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const LAUNCHED_EXECUTABLE_VAR: &str = "LAUNCHED_EXECUTABLE";
pub const LAUNCHED_BUNDLE_VAR: &str = "LAUNCHED_BUNDLE";

/// Environment overlay handed to the child. `bundle` is present only when
/// the resolved program lives inside a bundle; the variable is explicitly
/// removed otherwise so nested launches cannot leak a parent bundle
/// identity into an unbundled child.
#[derive(Clone, Debug)]
pub struct LaunchEnv {
    pub executable: PathBuf,
    pub bundle: Option<PathBuf>,
}

impl LaunchEnv {
    pub fn apply(&self, command: &mut Command) {
        command.env(LAUNCHED_EXECUTABLE_VAR, &self.executable);
        match &self.bundle {
            Some(bundle) => {
                command.env(LAUNCHED_BUNDLE_VAR, bundle);
            }
            None => {
                command.env_remove(LAUNCHED_BUNDLE_VAR);
            }
        }
    }
}

/// What became of a supervised launch.
#[derive(Debug)]
pub enum Outcome {
    /// Non-zero exit inside the window; stderr was captured (possibly
    /// empty).
    EarlyFailure { code: i32, stderr: String },
    /// The launch took: clean early exit, or the window elapsed and the
    /// child eventually exited with this code.
    Completed { code: i32 },
}

/// Spawn `program` and supervise it. `on_survive` runs exactly once, as
/// soon as the launch is considered successful (clean exit or window
/// elapsed) and before the unbounded wait.
pub fn run(
    program: &Path,
    args: &[String],
    launch_env: &LaunchEnv,
    on_survive: impl FnOnce(),
) -> Result<Outcome> {
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(Stdio::inherit());
    command.stdout(Stdio::inherit());
    command.stderr(Stdio::piped());
    launch_env.apply(&mut command);

    debug!("spawning {} {:?}", program.display(), args);
    let mut child = command
        .spawn()
        .with_context(|| format!("cannot launch {}", program.display()))?;
    let mut stderr = child.stderr.take().context("child stderr was not piped")?;
    set_nonblocking(&stderr, true)?;

    let mut captured: Vec<u8> = Vec::new();
    let deadline = Instant::now() + SUPERVISION_WINDOW;
    let early_status: Option<ExitStatus> = loop {
        drain_nonblocking(&mut stderr, &mut captured);
        match child.try_wait().context("waiting for the child")? {
            Some(status) => break Some(status),
            None if Instant::now() >= deadline => break None,
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    if let Some(status) = early_status {
        drain_nonblocking(&mut stderr, &mut captured);
        let code = exit_code(status);
        if code != 0 {
            debug!("child failed inside the supervision window with {code}");
            return Ok(Outcome::EarlyFailure {
                code,
                stderr: String::from_utf8_lossy(&captured).into_owned(),
            });
        }
        forward(&captured);
        on_survive();
        return Ok(Outcome::Completed { code: 0 });
    }

    // Past the window: no more interpretation, but stay attached and keep
    // the pipe moving so the child never blocks on a full buffer.
    forward(&captured);
    on_survive();
    set_nonblocking(&stderr, false)?;
    let mut sink = io::stderr();
    let mut buffer = [0u8; 8192];
    loop {
        match stderr.read(&mut buffer) {
            Ok(0) => break,
            Ok(len) => {
                let _ = sink.write_all(&buffer[..len]);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    let status = child.wait().context("waiting for the child")?;
    Ok(Outcome::Completed {
        code: exit_code(status),
    })
}

/// Exit code with the shell convention for signal deaths.
fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

fn forward(captured: &[u8]) {
    if !captured.is_empty() {
        let _ = io::stderr().write_all(captured);
    }
}

fn drain_nonblocking(stderr: &mut ChildStderr, captured: &mut Vec<u8>) {
    let mut buffer = [0u8; 8192];
    loop {
        match stderr.read(&mut buffer) {
            Ok(0) => break,
            Ok(len) => captured.extend_from_slice(&buffer[..len]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

fn set_nonblocking(stderr: &ChildStderr, nonblocking: bool) -> Result<()> {
    let fd = stderr.as_raw_fd();
    // SAFETY: fcntl on a descriptor we own; no memory is passed.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        bail!("cannot read the stderr pipe flags");
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    // SAFETY: same descriptor, flag-only operation.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        bail!("cannot set the stderr pipe flags");
    }
    Ok(())
}

/// uid owning the process behind `pid`, from `/proc` ownership. `None`
/// when the process is gone or unreadable.
pub fn process_owner_uid(pid: u32) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(format!("/proc/{pid}")).ok().map(|m| m.uid())
}

pub fn current_uid() -> u32 {
    // SAFETY: getuid never fails.
    unsafe { libc::getuid() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_env(program: &str) -> LaunchEnv {
        LaunchEnv {
            executable: PathBuf::from(program),
            bundle: None,
        }
    }

    #[test]
    fn clean_exit_completes_and_fires_the_survival_hook() {
        let mut survived = false;
        let outcome = run(
            Path::new("/bin/true"),
            &[],
            &plain_env("/bin/true"),
            || survived = true,
        )
        .unwrap();
        assert!(survived);
        match outcome {
            Outcome::Completed { code } => assert_eq!(code, 0),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn early_failure_captures_stderr_and_the_code() {
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let mut survived = false;
        let outcome = run(
            Path::new("/bin/sh"),
            &args,
            &plain_env("/bin/sh"),
            || survived = true,
        )
        .unwrap();
        assert!(!survived);
        match outcome {
            Outcome::EarlyFailure { code, stderr } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let result = run(
            Path::new("/no/such/program"),
            &[],
            &plain_env("/no/such/program"),
            || {},
        );
        assert!(result.is_err());
    }

    #[test]
    fn overlay_sets_and_removes_the_bundle_variable() {
        let env_with = LaunchEnv {
            executable: PathBuf::from("/bin/sh"),
            bundle: Some(PathBuf::from("/Applications/Editor.app")),
        };
        let args = vec![
            "-c".to_string(),
            "test \"$LAUNCHED_BUNDLE\" = /Applications/Editor.app && test \"$LAUNCHED_EXECUTABLE\" = /bin/sh"
                .to_string(),
        ];
        match run(Path::new("/bin/sh"), &args, &env_with, || {}).unwrap() {
            Outcome::Completed { code } => assert_eq!(code, 0),
            other => panic!("unexpected outcome {other:?}"),
        }

        let env_without = plain_env("/bin/sh");
        let args = vec!["-c".to_string(), "test -z \"$LAUNCHED_BUNDLE\"".to_string()];
        match run(Path::new("/bin/sh"), &args, &env_without, || {}).unwrap() {
            Outcome::Completed { code } => assert_eq!(code, 0),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn current_process_owner_matches_current_uid() {
        assert_eq!(process_owner_uid(std::process::id()), Some(current_uid()));
    }
}
