//! Runs a command line through the platform shell, capturing its output.

use std::process::Stdio;
use std::time::Duration;

#[derive(Debug, PartialEq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
    TimedOut,
}

pub struct ProcessOutput {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
}

/// Output as reported to users: lossily decoded, surrounding whitespace trimmed.
fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_owned()
}

#[cfg(unix)]
fn shell_command(cmdline: &str) -> anyhow::Result<(tokio::process::Command, ScriptGuard)> {
    let mut cmd = tokio::process::Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    Ok((cmd, ScriptGuard))
}

#[cfg(unix)]
struct ScriptGuard;

#[cfg(windows)]
fn shell_command(cmdline: &str) -> anyhow::Result<(tokio::process::Command, ScriptGuard)> {
    use std::io::Write;
    // cmd.exe can't take multi-line commands, those go through a batch file.
    if cmdline.contains('\n') || cmdline.contains('\r') {
        let mut script = tempfile::Builder::new().suffix(".bat").tempfile()?;
        script.write_all(cmdline.as_bytes())?;
        script.flush()?;
        let mut cmd = tokio::process::Command::new("cmd.exe");
        cmd.arg("/Q").arg("/C").arg(script.path());
        Ok((cmd, ScriptGuard(Some(script))))
    } else {
        let mut cmd = tokio::process::Command::new("cmd.exe");
        cmd.arg("/C").raw_arg(cmdline);
        Ok((cmd, ScriptGuard(None)))
    }
}

/// Keeps a generated batch file alive until the command finished.
#[cfg(windows)]
struct ScriptGuard(Option<tempfile::NamedTempFile>);

#[cfg(unix)]
fn signal_note(status: &std::process::ExitStatus) -> Option<(Termination, String)> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| match sig {
        libc::SIGINT => (Termination::Interrupted, "interrupted".to_owned()),
        _ => (Termination::Failure, format!("signal {}", sig)),
    })
}

#[cfg(windows)]
fn signal_note(_status: &std::process::ExitStatus) -> Option<(Termination, String)> {
    None
}

/// Run `cmdline`, waiting at most `timeout`.  A timed out process is killed
/// and reported with empty output.
/// Returns an Err() if we failed outside of the process itself.
pub async fn run_command(
    cmdline: &str,
    timeout: Option<Duration>,
) -> anyhow::Result<ProcessOutput> {
    let (mut cmd, _script) = shell_command(cmdline)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd.spawn()?;

    let output = match timeout {
        None => child.wait_with_output().await?,
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            // Dropping the wait future drops the child, which kills it.
            Err(_) => {
                return Ok(ProcessOutput {
                    termination: Termination::TimedOut,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        },
    };

    let stdout = decode(&output.stdout);
    let mut stderr = decode(&output.stderr);
    let termination = if output.status.success() {
        Termination::Success
    } else {
        match signal_note(&output.status) {
            Some((termination, note)) => {
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str(&note);
                termination
            }
            None => Termination::Failure,
        }
    };

    Ok(ProcessOutput {
        termination,
        stdout,
        stderr,
    })
}
