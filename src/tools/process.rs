use super::{Step, Tool, ToolRunner};
use crate::config::Config;
use crate::error::ToolError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const STDERR_TAIL_BYTES: usize = 2000;

/// Runs tool chains as external processes.
pub struct ProcessRunner {
    cfg: Config,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(cfg: &Config) -> Self {
        let timeout = if cfg.tools.timeout_seconds > 0 {
            Some(Duration::from_secs(cfg.tools.timeout_seconds))
        } else {
            None
        };
        Self {
            cfg: cfg.clone(),
            timeout,
        }
    }

    fn run_step(&self, tool: Tool, step: Step, input: &Path, output: &Path) -> Result<(), ToolError> {
        let program = step.program(&self.cfg);
        debug!(%tool, ?step, program, input = %input.display(), output = %output.display(), "run step");

        let mut cmd = Command::new(program);
        cmd.args(step.args(&self.cfg, input, output));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        own_process_group(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::execution(tool, format!("cannot start {program}: {e}")))?;

        let output_res = match self.timeout {
            Some(t) => wait_with_timeout(&mut child, t),
            None => child.wait_with_output().map(Waited::Exited),
        }
        .map_err(|e| ToolError::execution(tool, format!("waiting for {program}: {e}")))?;

        match output_res {
            Waited::Exited(out) if step.succeeded(out.status) => Ok(()),
            Waited::Exited(out) => Err(ToolError::execution(
                tool,
                format!(
                    "{program} exited with {}: {}",
                    out.status,
                    stderr_tail(&out.stderr)
                ),
            )),
            Waited::TimedOut(out) => Err(ToolError::execution(
                tool,
                format!(
                    "{program} exceeded timeout ({:?}) and was killed: {}",
                    self.timeout.unwrap_or_default(),
                    stderr_tail(&out.stderr)
                ),
            )),
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, tool: Tool, input: &Path, output: &Path) -> Result<u64, ToolError> {
        let steps = tool.steps();
        let mut intermediates: Vec<PathBuf> = Vec::new();
        let mut current = input.to_path_buf();

        let result = (|| {
            for (i, &step) in steps.iter().enumerate() {
                let target = if i + 1 == steps.len() {
                    output.to_path_buf()
                } else {
                    let p = intermediate_path(output, i);
                    intermediates.push(p.clone());
                    p
                };
                self.run_step(tool, step, &current, &target)?;
                if !target.is_file() {
                    return Err(ToolError::OutputMissing { tool, path: target });
                }
                current = target;
            }
            std::fs::metadata(output)
                .map(|m| m.len())
                .map_err(|_| ToolError::OutputMissing {
                    tool,
                    path: output.to_path_buf(),
                })
        })();

        for p in &intermediates {
            let _ = std::fs::remove_file(p);
        }
        result
    }
}

fn intermediate_path(output: &Path, step: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    output.with_file_name(format!("{stem}.step{step}.pdf"))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let s = String::from_utf8_lossy(stderr);
    let s = s.trim();
    if s.len() <= STDERR_TAIL_BYTES {
        return s.to_string();
    }
    let mut start = s.len() - STDERR_TAIL_BYTES;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}

enum Waited {
    Exited(Output),
    TimedOut(Output),
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Waited> {
    // Drain pipes while waiting so a chatty tool can't block on a full pipe.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf)?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf)?;
        }
        Ok(buf)
    });

    let collect = |status| -> std::io::Result<Output> {
        let stdout = stdout_thread
            .join()
            .map_err(|_| std::io::Error::other("stdout reader thread panicked"))??;
        let stderr = stderr_thread
            .join()
            .map_err(|_| std::io::Error::other("stderr reader thread panicked"))??;
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return collect(status).map(Waited::Exited);
        }

        if start.elapsed() > timeout {
            warn!("tool process timed out after {:?}; killing pid {}", timeout, child.id());
            kill_process_group(child);
            let status = child.wait()?;
            return collect(status).map(Waited::TimedOut);
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Puts the step in a fresh process group so a timeout can reach anything it
/// forks, not only the direct child.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    match libc::pid_t::try_from(child.id()) {
        Ok(pgid) => {
            // SAFETY: plain signal delivery to the group created at spawn.
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if rc != 0 {
                debug!("killpg {pgid} failed: {}", std::io::Error::last_os_error());
            }
        }
        Err(_) => debug!("pid {} does not fit pid_t", child.id()),
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intermediate_sits_next_to_output() {
        let p = intermediate_path(Path::new("/tmp/w/qpdf-mutool.pdf"), 0);
        assert_eq!(p, PathBuf::from("/tmp/w/qpdf-mutool.step0.pdf"));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(STDERR_TAIL_BYTES) + "END";
        let t = stderr_tail(long.as_bytes());
        assert!(t.starts_with("..."));
        assert!(t.ends_with("END"));
    }

    /// Writes an executable `#!/bin/sh` script and returns its path.
    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let p = dir.join(name);
        std::fs::write(&p, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).unwrap();
        p.display().to_string()
    }

    #[cfg(unix)]
    fn scratch() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();
        let output = dir.path().join("out.pdf");
        (dir, input, output)
    }

    // Writes a stub PDF to the last argument, which is the output path for
    // both qpdf and mutool.
    #[cfg(unix)]
    const WRITE_LAST_ARG: &str = "for last; do :; done\nprintf '%%PDF-stub' > \"$last\"";

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_carries_stderr() {
        let (dir, input, output) = scratch();
        let mut cfg = Config::default();
        cfg.qpdf.executable = script(dir.path(), "fail.sh", "echo boom >&2\nexit 2");
        let err = ProcessRunner::new(&cfg).run(Tool::Qpdf, &input, &output).unwrap_err();
        let ToolError::Execution { tool, message } = err else {
            panic!("expected Execution, got {err:?}");
        };
        assert_eq!(tool, Tool::Qpdf);
        assert!(message.contains("boom"), "{message}");
    }

    #[cfg(unix)]
    #[test]
    fn success_without_output_is_output_missing() {
        let (dir, input, output) = scratch();
        let mut cfg = Config::default();
        cfg.qpdf.executable = script(dir.path(), "quiet.sh", "exit 0");
        let err = ProcessRunner::new(&cfg).run(Tool::Qpdf, &input, &output).unwrap_err();
        assert!(matches!(err, ToolError::OutputMissing { tool: Tool::Qpdf, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn qpdf_warning_exit_counts_as_success() {
        let (dir, input, output) = scratch();
        let mut cfg = Config::default();
        cfg.qpdf.executable = script(dir.path(), "warn.sh", &format!("{WRITE_LAST_ARG}\nexit 3"));
        let size = ProcessRunner::new(&cfg).run(Tool::Qpdf, &input, &output).unwrap();
        assert_eq!(size, std::fs::metadata(&output).unwrap().len());
        assert!(size > 0);
    }

    #[cfg(unix)]
    #[test]
    fn exit_three_is_a_failure_for_other_tools() {
        let (dir, input, output) = scratch();
        let mut cfg = Config::default();
        cfg.ghostscript.executable = script(dir.path(), "gs.sh", "exit 3");
        let err = ProcessRunner::new(&cfg)
            .run(Tool::Ghostscript, &input, &output)
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { tool: Tool::Ghostscript, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn chain_feeds_steps_and_removes_intermediates() {
        let (dir, input, output) = scratch();
        let mut cfg = Config::default();
        cfg.qpdf.executable = script(dir.path(), "qpdf.sh", WRITE_LAST_ARG);
        cfg.mutool.executable = script(
            dir.path(),
            "mutool.sh",
            "in=\"$4\"\ntest -f \"$in\" || exit 9\ncat \"$in\" \"$in\" > \"$5\"",
        );
        let size = ProcessRunner::new(&cfg)
            .run(Tool::QpdfMutool, &input, &output)
            .unwrap();
        assert_eq!(size, 2 * "%PDF-stub".len() as u64);
        assert!(!intermediate_path(&output, 0).exists());
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_tool_and_what_it_forked() {
        let (dir, input, output) = scratch();
        let mut cfg = Config::default();
        cfg.tools.timeout_seconds = 1;
        // `sleep` is a grandchild holding the pipes open.
        cfg.qpdf.executable = script(dir.path(), "hang.sh", "sleep 30\nexit 0");
        let started = Instant::now();
        let err = ProcessRunner::new(&cfg).run(Tool::Qpdf, &input, &output).unwrap_err();
        let took = started.elapsed();
        let ToolError::Execution { message, .. } = err else {
            panic!("expected Execution, got {err:?}");
        };
        assert!(message.contains("timeout"), "{message}");
        assert!(took < Duration::from_secs(10), "took {took:?}");
    }

    #[test]
    fn missing_executable_is_execution_error() {
        let mut cfg = Config::default();
        cfg.qpdf.executable = "definitely-not-a-real-binary-pdf-squeeze".into();
        let runner = ProcessRunner::new(&cfg);
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();
        let err = runner
            .run(Tool::Qpdf, &input, &dir.path().join("out.pdf"))
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { tool: Tool::Qpdf, .. }));
    }
}
