//! `ProcessInfo`: the process-to-launch builder. Uses a `&mut self -> &mut
//! Self` chaining shape, consumed by a final `build()`, which surfaces
//! the one precondition worth enforcing explicitly: a command
//! line over the platform length cap is rejected before a child is ever
//! spawned, not discovered as a spawn failure afterward.

use crate::{cmdline_limits, error::Error};
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Stdio {
    Inherit,
    Null,
    Piped,
}

impl Default for Stdio {
    fn default() -> Self {
        Stdio::Null
    }
}

/// A fully validated description of the process to launch. Produced only
/// by [`ProcessInfoBuilder::build`], so any `ProcessInfo` in hand has
/// already passed the command-line length check.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub path: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<OsString>,
    pub current_dir: PathBuf,
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

impl ProcessInfo {
    /// Renders `path` plus `args` the way the platform spawn call sees
    /// them, for the sole purpose of measuring length against
    /// [`cmdline_limits::MAX`] -- this is not how argv is actually passed
    /// to `CreateProcessW`/`execve`, which take the vector directly.
    fn rendered_length(path: &Path, args: &[OsString]) -> usize {
        let mut len = path.as_os_str().len();
        for a in args {
            len += 1 + a.len();
        }
        len
    }
}

#[derive(Debug, Default)]
pub struct ProcessInfoBuilder {
    path: Option<PathBuf>,
    args: Vec<OsString>,
    env: Vec<OsString>,
    current_dir: Option<PathBuf>,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
}

impl ProcessInfoBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn path<S: AsRef<Path>>(&mut self, path: S) -> &mut Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, a: S) -> &mut Self {
        self.args.push(a.as_ref().to_os_string());
        self
    }

    pub fn args(&mut self, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> &mut Self {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(&mut self, var: impl AsRef<OsStr>) -> &mut Self {
        self.env.push(var.as_ref().to_os_string());
        self
    }

    pub fn envs(&mut self, vars: impl IntoIterator<Item = impl AsRef<OsStr>>) -> &mut Self {
        self.env.extend(vars.into_iter().map(|v| v.as_ref().to_os_string()));
        self
    }

    pub fn current_dir<S: AsRef<Path>>(&mut self, dir: S) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdin(&mut self, stdin: Stdio) -> &mut Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(&mut self, stdout: Stdio) -> &mut Self {
        self.stdout = stdout;
        self
    }

    pub fn stderr(&mut self, stderr: Stdio) -> &mut Self {
        self.stderr = stderr;
        self
    }

    pub fn build(&self) -> Result<ProcessInfo, Error> {
        let path = self.path.clone().ok_or(Error::InvalidState)?;
        let len = ProcessInfo::rendered_length(&path, &self.args);
        if len > cmdline_limits::MAX {
            return Err(Error::CommandLineTooLong {
                len,
                limit: cmdline_limits::MAX,
            });
        }
        Ok(ProcessInfo {
            path,
            args: self.args.clone(),
            env: self.env.clone(),
            current_dir: self.current_dir.clone().unwrap_or_else(|| ".".into()),
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_oversized_command_line() {
        let mut b = ProcessInfoBuilder::new();
        b.path("/bin/true");
        b.arg("x".repeat(cmdline_limits::MAX + 1));
        match b.build() {
            Err(Error::CommandLineTooLong { .. }) => {}
            other => panic!("expected CommandLineTooLong, got {:?}", other),
        }
    }

    #[test]
    fn build_requires_path() {
        let b = ProcessInfoBuilder::new();
        assert!(matches!(b.build(), Err(Error::InvalidState)));
    }
}
