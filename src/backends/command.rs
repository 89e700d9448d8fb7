//! External program backend
//!
//! Pipes the upload into a command such as `rembg i - -` and reads the
//! processed image from its standard output.

use crate::config::RemoverConfig;
use crate::error::{Result, ServerError};
use crate::inference::BackgroundRemover;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Interval between exit checks while waiting on the child
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Longest stderr excerpt carried into an error message
const MAX_STDERR_CHARS: usize = 2048;

/// Runs an external program per request
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    /// # Errors
    /// - `ServerError::InvalidConfig` when no program is configured
    pub fn new(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ServerError::invalid_config("The command backend requires a program to run"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    /// # Errors
    /// - `ServerError::InvalidConfig` when no program is configured
    pub fn from_config(config: &RemoverConfig) -> Result<Self> {
        Self::new(
            &config.command,
            Duration::from_secs(config.command_timeout_secs),
        )
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ServerError::processing(format!("Failed to start '{}': {}", self.program, e)))
    }

    /// Wait for `child` to exit, killing it once the timeout elapses
    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill '{}': {}", self.program, e);
                    }
                    let _ = child.wait();
                    return Err(ServerError::processing(format!(
                        "'{}' did not finish within {}s",
                        self.program,
                        self.timeout.as_secs()
                    )));
                },
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(ServerError::processing(format!(
                        "Failed to wait for '{}': {}",
                        self.program, e
                    )))
                },
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.chars().count() > MAX_STDERR_CHARS {
        format!("{}...", text.chars().take(MAX_STDERR_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

impl BackgroundRemover for CommandBackend {
    fn remove_background(&self, input: &[u8]) -> Result<Vec<u8>> {
        let started = Instant::now();
        let mut child = self.spawn()?;

        // Both pipes are drained while stdin is still being written
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let stdin = child.stdin.take();
        let payload = input.to_vec();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload)?;
            }
            Ok(())
        });

        // On timeout the pipe threads are left to finish once the pipes close
        let status = self.wait(&mut child)?;
        let write_result = writer.join();
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let detail = excerpt(&stderr);
            return Err(ServerError::processing(if detail.is_empty() {
                format!("'{}' exited with {}", self.program, status)
            } else {
                detail
            }));
        }
        if let Ok(Err(e)) = write_result {
            log::debug!("'{}' closed stdin early: {}", self.program, e);
        }
        if stdout.is_empty() {
            return Err(ServerError::processing(format!(
                "'{}' produced no output",
                self.program
            )));
        }

        log::debug!(
            "'{}' finished in {:.0}ms with {} bytes",
            self.program,
            started.elapsed().as_secs_f64() * 1000.0,
            stdout.len()
        );
        Ok(stdout)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> CommandBackend {
        CommandBackend::new(
            &["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout,
        )
        .unwrap()
    }

    #[test]
    fn test_stdout_is_returned() {
        let backend = sh("cat", Duration::from_secs(10));
        assert_eq!(backend.remove_background(b"image bytes").unwrap(), b"image bytes");
    }

    #[test]
    fn test_failure_carries_stderr() {
        let backend = sh("echo 'unsupported image' >&2; exit 3", Duration::from_secs(10));
        let err = backend.remove_background(b"x").unwrap_err();
        assert!(matches!(err, ServerError::Processing(ref msg) if msg == "unsupported image"));
    }

    #[test]
    fn test_silent_failure_reports_exit_status() {
        let backend = sh("exit 1", Duration::from_secs(10));
        let err = backend.remove_background(b"x").unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[test]
    fn test_timeout_kills_child() {
        let backend = sh("exec sleep 5", Duration::from_millis(200));
        let started = Instant::now();
        let err = backend.remove_background(b"x").unwrap_err();
        assert!(err.to_string().contains("did not finish"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program() {
        let backend = CommandBackend::new(
            &["/nonexistent/bgremove-tool".to_string()],
            Duration::from_secs(1),
        )
        .unwrap();
        let err = backend.remove_background(b"x").unwrap_err();
        assert!(err.to_string().contains("Failed to start"));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            CommandBackend::new(&[], Duration::from_secs(1)),
            Err(ServerError::InvalidConfig(_))
        ));
    }
}
