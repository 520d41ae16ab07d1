// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared scaffolding for the black-box specs: a disposable data
//! directory plus a small builder over `assert_cmd` so individual spec
//! files read as a sequence of `prepcache ...` invocations and
//! assertions, not process-plumbing boilerplate.

use assert_cmd::Command;

/// A throwaway `--data-dir` for one test, torn down on drop.
pub struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    pub fn empty() -> Self {
        Self { dir: tempfile::tempdir().expect("tempdir for project data dir") }
    }

    /// A `prepcache` invocation pre-scoped to this project's data dir.
    pub fn prepcache(&self) -> Cmd {
        let mut cmd = Command::cargo_bin("prepcache").expect("prepcache binary built");
        cmd.arg("--data-dir").arg(self.dir.path().join("data"));
        Cmd(cmd)
    }
}

/// `prepcache` with no data dir pinned — for invocations (`--help`,
/// `--version`, missing-argument errors) that never touch one.
pub fn cli() -> Cmd {
    Cmd(Command::cargo_bin("prepcache").expect("prepcache binary built"))
}

pub struct Cmd(Command);

impl Cmd {
    pub fn args(mut self, args: &[&str]) -> Self {
        self.0.args(args);
        self
    }

    pub fn passes(mut self) -> Checked {
        Checked(self.0.assert().success())
    }

    pub fn fails(mut self) -> Checked {
        Checked(self.0.assert().failure())
    }
}

pub struct Checked(assert_cmd::assert::Assert);

impl Checked {
    pub fn stdout_has(self, needle: &str) -> Self {
        let text = self.stdout();
        assert!(text.contains(needle), "expected stdout to contain {needle:?}, got:\n{text}");
        self
    }

    pub fn stderr_has(self, needle: &str) -> Self {
        let text = self.stderr();
        assert!(text.contains(needle), "expected stderr to contain {needle:?}, got:\n{text}");
        self
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.0.get_output().stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.0.get_output().stderr).into_owned()
    }
}
