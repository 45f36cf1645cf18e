#![allow(dead_code)]

use mini_reldb::{Catalog, QueryResult, SqlExec, Store};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// An executor over a fresh on-disk database that lives as long as the guard.
pub struct TestDb {
    pub exec: SqlExec<Store>,
    pub store: Store,
    pub dir: tempfile::TempDir,
}

impl TestDb {
    pub fn run(&mut self, sql: &str) -> anyhow::Result<QueryResult> {
        self.exec
            .run(sql)
            .map_err(|e| anyhow::anyhow!("{sql}: {e}"))
    }

    pub fn rows(&mut self, sql: &str) -> anyhow::Result<usize> {
        Ok(self.run(sql)?.row_count())
    }

    /// Starts a new session over the same store. The old executor and its
    /// caches are dropped, so everything is re-read from the catalog.
    /// Reopening the directory itself is covered by the shell tests, which
    /// run one process per session.
    pub fn reopen(self) -> anyhow::Result<TestDb> {
        let TestDb { exec, store, dir } = self;
        drop(exec);
        let exec = SqlExec::new(Catalog::open(store.clone())?);
        Ok(TestDb { exec, store, dir })
    }
}

pub fn open_db() -> anyhow::Result<TestDb> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(dir.path())?;
    let exec = SqlExec::new(Catalog::open(store.clone())?);
    Ok(TestDb { exec, store, dir })
}

/// Feeds `input` to the shell binary on stdin and returns what it printed.
pub fn run_cli(data_dir: &Path, input: &str) -> anyhow::Result<String> {
    let bin = env!("CARGO_BIN_EXE_mini-reldb");
    let mut child = Command::new(bin)
        .args([
            "--data",
            data_dir.to_str().unwrap_or("./data"),
            "--log-level",
            "off",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    child
        .stdin
        .take()
        .ok_or_else(|| anyhow::anyhow!("failed to open shell stdin"))?
        .write_all(input.as_bytes())?;

    let output = child.wait_with_output()?;
    if !output.status.success() {
        anyhow::bail!("shell exited with {}", output.status);
    }
    Ok(String::from_utf8(output.stdout)?)
}
