use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::counter;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::{
    io::AsyncReadExt,
    process::{ChildStderr, Command},
    sync::{Semaphore, mpsc},
};
use tracing::{debug, info, warn};

use crate::application::context::GlobalContext;
use crate::domain::Fragment;

use super::{
    METRIC_COMPILE_CACHE_HIT, METRIC_COMPILE_CACHE_MISS,
    cache::ArtifactCache,
    jobs::JobRegistry,
    types::{
        CacheKey, CompileError, CompileFailure, CompileOutcome, JobEvent, JobId, assemble_source,
    },
};

pub const DEFAULT_PREAMBLE: &str =
    "#set page(width: auto, height: auto, margin: (x: 0pt, y: 2pt), fill: none)\n#set text(size: 12pt)\n";

/// Activation failed; the feature cannot start.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("compiler `{program}` not found: {source}")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to prepare cache directory {path}: {source}")]
    CacheInit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub program: PathBuf,
    pub preamble: String,
    pub cache_dir: PathBuf,
    /// Artifact extension, also selects the compiler's output format.
    pub format: String,
    /// Where temporary inputs are written; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

/// Result of asking the dispatcher for a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Artifact already on disk; no process was spawned.
    Cached(PathBuf),
    /// A compile job was started and will report on the session channel.
    Spawned(JobId),
}

/// Shared front end to the external compiler.
#[derive(Debug)]
pub struct Compiler {
    program: PathBuf,
    preamble: String,
    cache: ArtifactCache,
    scratch_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Compiler {
    /// Resolve the compiler executable and prepare the cache directory.
    pub fn activate(config: CompilerConfig) -> Result<Self, SetupError> {
        let program = which::which(&config.program).map_err(|source| SetupError::NotFound {
            program: config.program.display().to_string(),
            source,
        })?;

        let cache = ArtifactCache::new(config.cache_dir, config.format);
        cache.ensure_dir().map_err(|source| SetupError::CacheInit {
            path: cache.dir().to_path_buf(),
            source,
        })?;

        info!(
            target = "application::render::compiler",
            op = "compiler::activate",
            program = %program.display(),
            cache_dir = %cache.dir().display(),
            "Compiler activated"
        );

        Ok(Self {
            program,
            preamble: config.preamble,
            cache,
            scratch_dir: config.scratch_dir,
            timeout: config.timeout,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn key_for(&self, fragment: &Fragment, context: &GlobalContext) -> CacheKey {
        self.cache
            .key_for(&self.preamble, &context.text, &fragment.source)
    }

    /// Resolve `fragment` from the cache or start a compile job for it.
    pub fn dispatch(
        self: &Arc<Self>,
        fragment: &Fragment,
        context: &GlobalContext,
        jobs: &mut JobRegistry,
    ) -> Dispatch {
        let full_source = assemble_source(&self.preamble, &context.text, &fragment.source);
        let key = CacheKey::of_source(&full_source);

        if let Some(path) = self.cache.lookup(&key) {
            counter!(METRIC_COMPILE_CACHE_HIT).increment(1);
            debug!(
                target = "application::render::compiler",
                op = "compiler::dispatch",
                result = "cache_hit",
                span = %fragment.span,
                cache_path = %path.display(),
                "Fragment served from cache"
            );
            return Dispatch::Cached(path);
        }

        counter!(METRIC_COMPILE_CACHE_MISS).increment(1);
        let id = JobId::new();
        let handle = tokio::spawn(run_job(
            Arc::clone(self),
            id,
            fragment.clone(),
            key.clone(),
            full_source,
            jobs.permits(),
            jobs.events(),
        ));
        debug!(
            target = "application::render::compiler",
            op = "compiler::dispatch",
            result = "cache_miss",
            job_id = %id,
            span = %fragment.span,
            key = %key,
            "Compile job queued"
        );
        jobs.register(id, fragment.clone(), key, handle);
        Dispatch::Spawned(id)
    }

    /// Run the external compiler once for `full_source`, persisting its artifact under `key`.
    pub async fn compile(
        &self,
        key: &CacheKey,
        full_source: &str,
    ) -> Result<PathBuf, CompileFailure> {
        let fail = |error: CompileError, diagnostics: String| CompileFailure {
            error,
            source_text: full_source.to_string(),
            diagnostics,
        };

        let input = self
            .write_input(full_source)
            .map_err(|err| fail(CompileError::Io(err), String::new()))?;
        let output = self
            .cache
            .scratch_output(key)
            .map_err(|err| fail(CompileError::Io(err), String::new()))?;

        let started_at = Instant::now();
        let mut child = Command::new(&self.program)
            .arg("compile")
            .arg(input.path())
            .arg(&*output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                warn!(
                    target = "application::render::compiler",
                    op = "compiler::compile",
                    result = "error",
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn compiler"
                );
                fail(CompileError::Spawn(err), String::new())
            })?;

        let mut stderr = child.stderr.take();
        let mut captured = Vec::new();
        let run = async {
            let (status, drained) =
                tokio::join!(child.wait(), drain(stderr.as_mut(), &mut captured));
            drained.and(status)
        };

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| limit),
            None => Ok(run.await),
        };
        let status = match waited {
            Ok(status) => status,
            Err(limit) => {
                let _ = child.kill().await;
                warn!(
                    target = "application::render::compiler",
                    op = "compiler::compile",
                    result = "error",
                    error_code = "timeout",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Compiler timed out; process killed"
                );
                let mut diagnostics = String::from_utf8_lossy(&captured).into_owned();
                if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
                    diagnostics.push('\n');
                }
                diagnostics.push_str(&format!(
                    "(process killed after {}s; any further output was discarded)",
                    limit.as_secs_f64()
                ));
                return Err(fail(CompileError::Timeout(limit), diagnostics));
            }
        };
        let status = status.map_err(|err| fail(CompileError::Io(err), String::new()))?;
        let diagnostics = String::from_utf8_lossy(&captured).into_owned();

        let exited = status.code().is_some();
        let produced = fs::metadata(&*output).map(|meta| meta.len() > 0).unwrap_or(false);
        if !(exited && produced) {
            warn!(
                target = "application::render::compiler",
                op = "compiler::compile",
                result = "error",
                error_code = "no_artifact",
                exit_code = status.code().map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %diagnostics,
                "Compiler produced no artifact"
            );
            return Err(fail(
                CompileError::NoArtifact {
                    status: status.to_string(),
                },
                diagnostics,
            ));
        }

        let path = self
            .cache
            .persist(output, key)
            .map_err(|err| fail(CompileError::Io(err), diagnostics.clone()))?;

        info!(
            target = "application::render::compiler",
            op = "compiler::compile",
            result = "cache_miss",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            cache_path = %path.display(),
            "Fragment rendered via compiler"
        );
        Ok(path)
    }

    fn write_input(&self, full_source: &str) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("fragview-").suffix(".typ");
        let mut input = match &self.scratch_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        input.write_all(full_source.as_bytes())?;
        input.flush()?;
        Ok(input)
    }
}

/// Append everything the child writes on stderr to `sink`, one read at a time so
/// a cancelled drain keeps what it already collected.
async fn drain(stderr: Option<&mut ChildStderr>, sink: &mut Vec<u8>) -> io::Result<()> {
    let Some(stderr) = stderr else {
        return Ok(());
    };
    let mut chunk = [0u8; 4096];
    loop {
        let read = stderr.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        sink.extend_from_slice(&chunk[..read]);
    }
}

async fn run_job(
    compiler: Arc<Compiler>,
    id: JobId,
    fragment: Fragment,
    key: CacheKey,
    full_source: String,
    permits: Arc<Semaphore>,
    events: mpsc::UnboundedSender<JobEvent>,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        return;
    };
    let _ = events.send(JobEvent::Started(id));

    let result = compiler.compile(&key, &full_source).await;
    let _ = events.send(JobEvent::Finished(CompileOutcome {
        job_id: id,
        fragment,
        key,
        result,
    }));
}
