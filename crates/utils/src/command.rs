//! Helpers intended for [`std::process::Command`].

use std::io;
use std::process::{Command, Output};

/// Failure to run an external program to successful completion.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be found.
    #[error("{program}: command not found")]
    NotFound {
        /// The program we tried to run
        program: String,
    },
    /// The program exists but could not be started (e.g. permission denied).
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        /// The program we tried to run
        program: String,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// The program ran and exited unsuccessfully. The display form is its
    /// stderr, unmodified apart from the final line terminator.
    #[error("{}", failure_message(.program, .code, .stderr))]
    Failed {
        /// The program we ran
        program: String,
        /// Exit code; `None` when killed by a signal
        code: Option<i32>,
        /// Everything the program wrote to stderr
        stderr: String,
    },
    /// The program wrote something to stdout that is not UTF-8.
    #[error("{program}: output is not valid UTF-8")]
    NonUtf8 {
        /// The program we ran
        program: String,
    },
}

fn failure_message(program: &str, code: &Option<i32>, stderr: &str) -> String {
    let stderr = stderr.strip_suffix('\n').unwrap_or(stderr);
    if !stderr.trim().is_empty() {
        return stderr.to_owned();
    }
    match code {
        Some(code) => format!("{program} failed with exit code {code}"),
        None => format!("{program} was terminated by a signal"),
    }
}

impl CommandError {
    /// The raw stderr of a program that exited unsuccessfully.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// The program this error is about.
    pub fn program(&self) -> &str {
        match self {
            CommandError::NotFound { program }
            | CommandError::Spawn { program, .. }
            | CommandError::Failed { program, .. }
            | CommandError::NonUtf8 { program } => program,
        }
    }
}

/// Quote and join arguments into a single line that a POSIX shell
/// would split back into the same arguments.
pub fn shell_join<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_owned()).collect();
    // Only fails for arguments containing NUL, which could never be passed
    // to exec anyway.
    shlex::try_join(args.iter().map(String::as_str)).unwrap_or_else(|_| args.join(" "))
}

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Log (at debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// The program and arguments as a shell-quoted string.
    fn to_shell_string(&self) -> String;

    /// Execute the child process to completion, capturing stdout and stderr.
    /// A non-zero exit is turned into [`CommandError::Failed`] carrying stderr.
    fn run_get_output(&mut self) -> Result<Output, CommandError>;

    /// Execute the child process and return its stdout as a string.
    fn run_get_string(&mut self) -> Result<String, CommandError>;

    /// Execute the child process, discarding stdout.
    fn run_capture_stderr(&mut self) -> Result<(), CommandError>;
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", self.to_shell_string());
        self
    }

    fn to_shell_string(&self) -> String {
        let program = self.get_program().to_string_lossy();
        let args = self.get_args().map(|a| a.to_string_lossy());
        shell_join(std::iter::once(program).chain(args))
    }

    fn run_get_output(&mut self) -> Result<Output, CommandError> {
        let program = self.get_program().to_string_lossy().into_owned();
        // `output()` waits for the child on every path, so there is
        // nothing left to reap here.
        let output = self.output().map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => CommandError::NotFound {
                program: program.clone(),
            },
            _ => CommandError::Spawn {
                program: program.clone(),
                source,
            },
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            tracing::debug!("{program} exited with {}: {stderr}", output.status);
            return Err(CommandError::Failed {
                program,
                code: output.status.code(),
                stderr,
            });
        }
        Ok(output)
    }

    fn run_get_string(&mut self) -> Result<String, CommandError> {
        let output = self.run_get_output()?;
        String::from_utf8(output.stdout).map_err(|_| CommandError::NonUtf8 {
            program: self.get_program().to_string_lossy().into_owned(),
        })
    }

    fn run_capture_stderr(&mut self) -> Result<(), CommandError> {
        self.run_get_output().map(|_| ())
    }
}
