use anyhow::{Result, anyhow};
use ollamacode_core::CancellationToken;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellRunResult {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

pub trait ShellRunner: Send + Sync {
    fn run(
        &self,
        cmd: &str,
        cwd: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ShellRunResult>;
}

#[derive(Debug, Default)]
pub struct PlatformShellRunner;

impl ShellRunner for PlatformShellRunner {
    fn run(
        &self,
        cmd: &str,
        cwd: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ShellRunResult> {
        let started = Instant::now();
        let mut child = spawn_command(cmd, cwd)?;
        // Drain pipes concurrently so a chatty child cannot fill them and stall.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut timed_out = false;
        let mut cancelled = false;
        let status = loop {
            if let Some(status) = child.wait_timeout(WAIT_SLICE)? {
                break status;
            }
            if cancel.is_cancelled() {
                cancelled = true;
            } else if started.elapsed() >= timeout {
                timed_out = true;
            } else {
                continue;
            }
            kill_tree(&mut child);
            break child.wait()?;
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        Ok(ShellRunResult {
            status: status.code(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            timed_out,
            cancelled,
            duration_ms,
        })
    }
}

/// Kills the shell and everything it started, so grandchildren cannot keep
/// the output pipes open.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        unsafe {
            if libc::killpg(pid, libc::SIGKILL) == 0 {
                return;
            }
        }
    }
    let _ = child.kill();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

fn spawn_command(cmd: &str, cwd: &Path) -> Result<Child> {
    let cwd = if cwd.exists() {
        std::fs::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf())
    } else {
        cwd.to_path_buf()
    };
    let mut errors = Vec::new();
    for mut command in candidate_commands(cmd) {
        command.current_dir(&cwd);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let program = command.get_program().to_string_lossy().to_string();
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(err) => errors.push(format!("{program}: {err}")),
        }
    }
    Err(anyhow!(
        "failed to spawn command '{cmd}' in '{}': {}",
        cwd.display(),
        errors.join(" | ")
    ))
}

#[cfg(target_os = "windows")]
fn candidate_commands(cmd: &str) -> Vec<Command> {
    let mut cmd_shell = Command::new("cmd");
    cmd_shell.arg("/C").arg(cmd);
    let mut ps_shell = Command::new("powershell");
    ps_shell
        .arg("-NoLogo")
        .arg("-NoProfile")
        .arg("-Command")
        .arg(cmd);
    vec![cmd_shell, ps_shell]
}

#[cfg(not(target_os = "windows"))]
fn candidate_commands(cmd: &str) -> Vec<Command> {
    let mut sh_shell = Command::new("sh");
    sh_shell.arg("-c").arg(cmd);
    let mut bash_shell = Command::new("bash");
    bash_shell.arg("-c").arg(cmd);
    vec![sh_shell, bash_shell]
}
