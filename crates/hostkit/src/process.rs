use anyhow::{Context, Result, bail};
use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished command
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run a shell command line, feeding `stdin` and capturing output
///
/// The child is killed if it has not exited after `timeout`.
pub fn run_shell(
    command_line: &str,
    env: &[(&str, &str)],
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<Captured> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command_line);
    for (key, value) in env {
        cmd.env(key, value);
    }
    run_with_timeout(cmd, stdin, timeout)
        .with_context(|| format!("Failed to execute: {}", command_line))
}

/// Run a command with captured output and a deadline
///
/// The deadline covers the whole run, including output held open by
/// background processes the command leaves behind. On timeout the child's
/// whole process group is killed.
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<Captured> {
    let deadline = Instant::now() + timeout;
    let mut child = cmd
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .context("Failed to spawn process")?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_vec();
        thread::spawn(move || {
            // A child that exits without reading its input is not an error
            let _ = pipe.write_all(&input);
        });
    }

    // Drain both pipes while polling for exit
    let (tx, rx) = mpsc::channel();
    drain(Stream::Stdout, child.stdout.take(), tx.clone());
    drain(Stream::Stderr, child.stderr.take(), tx);

    let Some(status) = wait_until(&mut child, deadline)? else {
        kill_group(&mut child);
        bail!("timed out after {}s", timeout.as_secs_f32());
    };

    let mut stdout = None;
    let mut stderr = None;
    while stdout.is_none() || stderr.is_none() {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok((Stream::Stdout, text)) => stdout = Some(text),
            Ok((Stream::Stderr, text)) => stderr = Some(text),
            Err(RecvTimeoutError::Timeout) => {
                kill_group(&mut child);
                bail!(
                    "timed out after {}s waiting for background processes",
                    timeout.as_secs_f32()
                );
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(Captured {
        status,
        stdout: stdout.unwrap_or_default(),
        stderr: stderr.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn drain<R: Read + Send + 'static>(stream: Stream, pipe: Option<R>, tx: Sender<(Stream, String)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait().context("Failed to wait for process")? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the child and everything left in its process group
fn kill_group(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: killpg only takes plain integers; the group was created
        // for this child by `process_group(0)`
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Fail unless the command exited successfully
pub fn check(captured: &Captured) -> Result<()> {
    if captured.status.success() {
        Ok(())
    } else {
        let detail = captured.stderr.trim();
        match captured.status.code() {
            Some(code) if detail.is_empty() => bail!("Command failed with exit code {}", code),
            Some(code) => bail!("Command failed with exit code {}: {}", code, detail),
            None => bail!("Command terminated by signal"),
        }
    }
}
