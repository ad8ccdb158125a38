#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use fragview::{
    application::{
        Session, SessionConfig,
        render::{Compiler, CompilerConfig},
    },
    domain::DollarMath,
};
use tempfile::TempDir;

pub const PREAMBLE: &str = "#set page(width: auto)\n";

/// A scratch workspace holding a fake compiler script, a cache and a scratch dir.
pub struct Workspace {
    pub dir: TempDir,
    pub program: PathBuf,
    pub log: PathBuf,
}

impl Workspace {
    /// Compiler that appends to `calls.log`, sleeps `delay` and copies its input to its output.
    pub fn copying(delay: Duration) -> Self {
        Self::with_body(|log| {
            format!(
                "echo \"$2\" >> \"{}\"\nsleep {}\ncp \"$2\" \"$3\"",
                log.display(),
                delay.as_secs_f64()
            )
        })
    }

    pub fn with_body(body: impl FnOnce(&Path) -> String) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let log = dir.path().join("calls.log");
        let program = dir.path().join("fake-typst");
        fs::write(&program, format!("#!/bin/sh\n{}\n", body(&log))).expect("write script");
        let mut perms = fs::metadata(&program).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&program, perms).expect("set perms");
        Self { dir, program, log }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn compiler_config(&self) -> CompilerConfig {
        CompilerConfig {
            program: self.program.clone(),
            preamble: PREAMBLE.to_string(),
            cache_dir: self.cache_dir(),
            format: "svg".to_string(),
            scratch_dir: Some(self.scratch_dir()),
            timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn compiler(&self) -> Arc<Compiler> {
        Arc::new(Compiler::activate(self.compiler_config()).expect("activate"))
    }

    pub fn session(&self) -> Session {
        self.session_with(SessionConfig {
            debounce: Duration::from_millis(20),
            ..SessionConfig::default()
        })
    }

    pub fn session_with(&self, config: SessionConfig) -> Session {
        Session::new(self.compiler(), Arc::new(DollarMath), config)
    }

    /// Number of times the fake compiler ran.
    pub fn runs(&self) -> usize {
        fs::read_to_string(&self.log)
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    /// Entries left in `dir`, treating a missing directory as empty.
    pub fn entries(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .map(|entries| entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()).collect())
            .unwrap_or_default()
    }
}
