#![cfg(unix)]

// End-to-end guard rails for the open binary: content typing, candidate
// selection, and the handoff to launch.

mod support;

use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use support::{run, stderr_of, stdout_of, Sandbox};

#[test]
fn zero_size_files_open_like_plain_text() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.make_descriptor("editor.desktop", "/bin/echo opened %f", "text/plain;")?;
    let doc = sandbox.docs().join("empty.bin");
    fs::write(&doc, b"")?;

    let mut cmd = sandbox.open();
    cmd.arg(&doc);
    let output = run(cmd)?;

    assert!(
        output.status.success(),
        "stderr was: {}",
        stderr_of(&output)
    );
    assert!(stdout_of(&output).contains(&format!("opened {}", doc.display())));
    Ok(())
}

#[test]
fn family_fallback_reaches_a_related_application() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.make_descriptor("editor.desktop", "/bin/echo opened %f", "text/plain;")?;
    let doc = sandbox.docs().join("notes.md");
    fs::write(&doc, "# notes\n")?;

    let mut cmd = sandbox.open();
    cmd.arg(&doc);
    let output = run(cmd)?;

    assert!(
        output.status.success(),
        "text/markdown should fall back to the text family; stderr was: {}",
        stderr_of(&output)
    );
    assert!(stdout_of(&output).contains("opened"));
    Ok(())
}

#[test]
fn untyped_binary_content_is_refused() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.make_descriptor("editor.desktop", "/bin/echo opened %f", "text/plain;")?;
    let doc = sandbox.docs().join("blob");
    fs::write(&doc, b"\x00\x01\x02\x03")?;

    let mut cmd = sandbox.open();
    cmd.arg(&doc);
    let output = run(cmd)?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Cannot open"));
    Ok(())
}

#[test]
fn missing_documents_are_reported() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut cmd = sandbox.open();
    cmd.arg("/no/such/notes.txt");
    let output = run(cmd)?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("can't be found"));
    Ok(())
}

#[test]
fn unclaimed_schemes_find_no_application() -> Result<()> {
    let sandbox = Sandbox::new()?;
    // The https handler must not be offered for another scheme.
    sandbox.make_descriptor("browser.desktop", "/bin/echo surfed %u", "x-scheme-handler/https;")?;

    let mut cmd = sandbox.open();
    cmd.arg("someproto://target");
    let output = run(cmd)?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Found no application"));
    Ok(())
}

#[test]
fn claimed_schemes_open_with_their_handler() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.make_descriptor("browser.desktop", "/bin/echo surfed %u", "x-scheme-handler/https;")?;

    let mut cmd = sandbox.open();
    cmd.arg("https://example.org/page");
    let output = run(cmd)?;

    assert!(
        output.status.success(),
        "stderr was: {}",
        stderr_of(&output)
    );
    assert!(stdout_of(&output).contains("surfed https://example.org/page"));
    Ok(())
}

#[test]
fn executable_documents_are_launched_not_opened() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.make_descriptor("editor.desktop", "/bin/echo opened %f", "text/plain;")?;
    let script = sandbox.docs().join("tool.sh");
    fs::write(&script, "#!/bin/sh\necho ran-directly\n")?;
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

    let mut cmd = sandbox.open();
    cmd.arg(&script);
    let output = run(cmd)?;

    assert!(output.status.success());
    assert!(stdout_of(&output).contains("ran-directly"));
    Ok(())
}

#[test]
fn descriptor_documents_reenter_the_launch_pipeline() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let descriptor = sandbox.make_descriptor("tool.desktop", "/bin/echo launched-descriptor", "")?;

    let mut cmd = sandbox.open();
    cmd.arg(&descriptor);
    let output = run(cmd)?;

    assert!(output.status.success());
    assert!(stdout_of(&output).contains("launched-descriptor"));
    Ok(())
}

#[test]
fn legacy_file_uris_are_normalized() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.make_descriptor("editor.desktop", "/bin/echo opened %f", "text/plain;")?;
    let doc = sandbox.docs().join("with space.txt");
    fs::write(&doc, "hello")?;

    let mut cmd = sandbox.open();
    cmd.arg(format!("file://{}", doc.display()).replace(' ', "%20"));
    let output = run(cmd)?;

    assert!(
        output.status.success(),
        "stderr was: {}",
        stderr_of(&output)
    );
    assert!(stdout_of(&output).contains(&format!("opened {}", doc.display())));
    Ok(())
}
