//! Child process execution for the external interpreter and linter
//!
//! Children always get an explicit working directory instead of relying on
//! (or changing) the current directory of this process.

use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for the pipes to close after a timed-out child is killed
const KILL_GRACE: Duration = Duration::from_secs(1);

/// What a finished (or killed) child left behind
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal or by the timeout
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// Standard output followed by standard error
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Run `program args...` to completion and capture its output.
///
/// Arguments are passed through as OS strings, so paths that are not valid
/// UTF-8 reach the child unchanged.
///
/// With a timeout the child runs in its own process group. Once the limit
/// expires the whole group is killed and the output is flagged as
/// `timed_out`. Spawn failures are returned as errors.
pub fn run<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> io::Result<ProcessOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if timeout.is_some() {
            command.process_group(0);
        }
    }

    tracing::debug!(
        "Running {} {:?} (cwd: {:?})",
        program.display(),
        args.iter().map(|arg| arg.as_ref()).collect::<Vec<&OsStr>>(),
        cwd
    );

    let mut child = command.spawn()?;

    // Drain both pipes while waiting
    let stdout_reader = spawn_reader(child.stdout.take(), "stdout");
    let stderr_reader = spawn_reader(child.stderr.take(), "stderr");

    let (status, timed_out) = match timeout {
        Some(limit) => wait_with_timeout(&mut child, limit)?,
        None => (Some(child.wait()?), false),
    };

    // A killed child may have left descendants that still hold the pipes
    let stdout = collect(stdout_reader, timed_out);
    let stderr = collect(stderr_reader, timed_out);

    if timed_out {
        tracing::warn!(
            "{} timed out after {:?}",
            program.display(),
            timeout.unwrap_or_default()
        );
    }

    Ok(ProcessOutput {
        code: status.and_then(|s| s.code()),
        stdout,
        stderr,
        timed_out,
    })
}

fn spawn_reader<R>(pipe: Option<R>, name: &'static str) -> mpsc::Receiver<String>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                tracing::warn!("Failed to read child {}: {}", name, e);
            }
        }
        // The receiver is gone if the caller stopped waiting
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn collect(reader: mpsc::Receiver<String>, timed_out: bool) -> String {
    let received = if timed_out {
        reader.recv_timeout(KILL_GRACE).ok()
    } else {
        reader.recv().ok()
    };
    received.unwrap_or_default()
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> io::Result<(Option<ExitStatus>, bool)> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }
        if start.elapsed() >= limit {
            kill_tree(child);
            return Ok((None, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the child and, on unix, every process in its group
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    // The child may exit between try_wait and kill
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_captures_stdout_and_stderr() {
        let out = run(
            Path::new("sh"),
            &sh("echo out; echo err 1>&2; exit 3"),
            None,
            None,
        )
        .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.combined(), "out\nerr\n");
        assert!(!out.success());
    }

    #[test]
    fn test_runs_in_given_directory() {
        let temp_dir = TempDir::new().unwrap();
        let before = std::env::current_dir().unwrap();

        let out = run(Path::new("sh"), &sh("pwd"), Some(temp_dir.path()), None).unwrap();
        let reported = PathBuf::from(out.stdout.trim());

        assert_eq!(
            reported.canonicalize().unwrap(),
            temp_dir.path().canonicalize().unwrap()
        );
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_timeout_kills_child() {
        let out = run(
            Path::new("sh"),
            &sh("exec sleep 5"),
            None,
            Some(Duration::from_millis(200)),
        )
        .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.code, None);
        assert!(!out.success());
    }

    #[test]
    fn test_timeout_kills_forked_descendants() {
        let start = Instant::now();
        let out = run(
            Path::new("sh"),
            &sh("sleep 4; echo late"),
            None,
            Some(Duration::from_millis(200)),
        )
        .unwrap();
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
        assert!(!out.stdout.contains("late"));
    }

    #[test]
    fn test_non_utf8_arguments_pass_through() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let temp_dir = TempDir::new().unwrap();
        let name = OsString::from_vec(b"caf\xE9.lua".to_vec());
        let args = vec![
            OsString::from("-c"),
            OsString::from("echo x > \"$1\""),
            OsString::from("sh"),
            name.clone(),
        ];

        let out = run(Path::new("sh"), &args, Some(temp_dir.path()), None).unwrap();
        assert!(out.success());

        let entries: Vec<OsString> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![name]);
    }

    #[test]
    fn test_fast_child_beats_timeout() {
        let out = run(
            Path::new("sh"),
            &sh("echo done"),
            None,
            Some(Duration::from_secs(10)),
        )
        .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "done\n");
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let no_args: [&str; 0] = [];
        let err = run(Path::new("hercules-no-such-binary"), &no_args, None, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
