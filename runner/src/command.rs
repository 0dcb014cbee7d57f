use crate::error::RunnerError;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

/// External command invocation with captured or inherited stdio and
/// structured failure reporting. Stderr is always captured on the
/// captured-output paths so failures can be logged verbatim.
pub struct Command {
    program: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Command {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().to_string_lossy().into_owned());
        self
    }

    fn tokio_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    fn check(&self, status: std::process::ExitStatus, stderr: Vec<u8>) -> Result<(), RunnerError> {
        if status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&stderr).trim_end().to_string();
        match status.code() {
            Some(code) => Err(RunnerError::Failed {
                command: self.to_string(),
                status: code,
                stderr,
            }),
            None => Err(RunnerError::Terminated {
                command: self.to_string(),
                stderr,
            }),
        }
    }

    /// Run with inherited stdio. Used for interactive invocations (jail
    /// attach) where output should stream straight to the operator.
    pub async fn run(&self) -> Result<(), RunnerError> {
        tracing::debug!(command = %self, "running");
        let status = self
            .tokio_command()
            .status()
            .await
            .map_err(|source| RunnerError::Spawn {
                command: self.to_string(),
                source,
            })?;
        self.check(status, Vec::new())
    }

    /// Run with captured stdout and stderr; returns stdout on success.
    pub async fn output(&self) -> Result<Vec<u8>, RunnerError> {
        tracing::debug!(command = %self, "running (captured)");
        let output = self
            .tokio_command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RunnerError::Spawn {
                command: self.to_string(),
                source,
            })?;
        self.check(output.status, output.stderr)?;
        Ok(output.stdout)
    }

    pub async fn output_string(&self) -> Result<String, RunnerError> {
        let out = self.output().await?;
        let mut s = String::from_utf8_lossy(&out).into_owned();
        if s.ends_with('\n') {
            s.pop();
        }
        Ok(s)
    }

    pub async fn output_lines(&self) -> Result<Vec<String>, RunnerError> {
        let out = self.output_string().await?;
        if out.is_empty() {
            return Ok(Vec::new());
        }
        Ok(out.lines().map(String::from).collect())
    }

    /// Feed `input` to the command's stdin, discarding stdout.
    pub async fn run_with_input(&self, input: &[u8]) -> Result<(), RunnerError> {
        tracing::debug!(command = %self, bytes = input.len(), "running (stdin fed)");
        let mut child = self
            .tokio_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: self.to_string(),
                source,
            })?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(input).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        self.check(output.status, output.stderr)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"')
            {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_lines() {
        let lines = Command::new("/bin/sh")
            .arg("-c")
            .arg("printf 'one\\ntwo\\n'")
            .output_lines()
            .await
            .unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_empty_output() {
        let lines = Command::new("/bin/sh")
            .arg("-c")
            .arg("true")
            .output_lines()
            .await
            .unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_failure_captures_status_and_stderr() {
        let err = Command::new("/bin/sh")
            .arg("-c")
            .arg("echo nope >&2; exit 3")
            .output()
            .await
            .unwrap_err();
        match err {
            RunnerError::Failed { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let err = Command::new("/nonexistent/program").run().await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_run_with_input() {
        Command::new("/bin/sh")
            .arg("-c")
            .arg("grep -q needle")
            .run_with_input(b"hay\nneedle\n")
            .await
            .unwrap();
    }

    #[test]
    fn test_display_quotes_awkward_args() {
        let cmd = Command::new("tar").arg("-C").arg("/tmp/with space").arg("-x");
        assert_eq!(cmd.to_string(), "tar -C \"/tmp/with space\" -x");
    }
}
