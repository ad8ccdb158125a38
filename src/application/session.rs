//! Per-document rendering session.
//!
//! A [`Session`] owns everything tied to one open document: the harvested
//! context, in-flight jobs, annotations, the idle timer and the last reported
//! failure. It is driven from a single control loop. The host feeds it edits,
//! activity and scan requests. It then awaits [`Session::next_event`] and hands
//! each event back to [`Session::handle`] together with the live document.

use std::{path::PathBuf, sync::Arc, time::Duration};

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::{DocumentHost, EditEvent, Fragment, FragmentSyntax, Span};

use super::{
    annotations::{AnnotationSet, ApplyOutcome},
    context::{ContextHarvester, HarvestRules},
    render::{
        CacheKey, CompileOutcome, Compiler, Dispatch, JobEvent, JobRegistry, JobState,
        METRIC_ANNOTATION_ATTACHED, METRIC_ANNOTATION_STALE, METRIC_COMPILE_FAILURE,
    },
    report::ErrorReporter,
    scan::{Debouncer, ScanMode, ScanReport},
};

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub debounce: Duration,
    pub mode: ScanMode,
    pub max_concurrent_jobs: usize,
    pub harvest: HarvestRules,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            mode: ScanMode::Automatic,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            harvest: HarvestRules::default(),
        }
    }
}

/// Something the session's loop must react to.
#[derive(Debug)]
pub enum SessionEvent {
    Job(JobEvent),
    /// The document has been quiet for the debounce delay.
    IdleScan,
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Scanned(ScanReport),
    Started,
    /// A compile finished. Its artifact was offered to the job's span and to
    /// every span parked on the same key; `stale` lists those whose text or
    /// context changed meanwhile.
    Rendered {
        artifact: PathBuf,
        attached: Vec<Span>,
        stale: Vec<Span>,
    },
    Failed { span: Span, notice: String },
    /// Completion for a job that was cancelled meanwhile.
    Ignored,
}

/// Totals gathered by [`Session::settle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleSummary {
    pub attached: usize,
    pub stale: usize,
    pub failed: usize,
    pub scans: usize,
}

pub struct Session {
    compiler: Arc<Compiler>,
    syntax: Arc<dyn FragmentSyntax>,
    mode: ScanMode,
    harvester: ContextHarvester,
    annotations: AnnotationSet,
    jobs: JobRegistry,
    events: mpsc::UnboundedReceiver<JobEvent>,
    debounce: Debouncer,
    reporter: ErrorReporter,
    enabled: bool,
}

impl Session {
    pub fn new(
        compiler: Arc<Compiler>,
        syntax: Arc<dyn FragmentSyntax>,
        config: SessionConfig,
    ) -> Self {
        let (jobs, events) = JobRegistry::new(config.max_concurrent_jobs);
        Self {
            compiler,
            syntax,
            mode: config.mode,
            harvester: ContextHarvester::new(config.harvest),
            annotations: AnnotationSet::new(),
            jobs,
            events,
            debounce: Debouncer::new(config.debounce),
            reporter: ErrorReporter::new(),
            enabled: true,
        }
    }

    /// Compile every fragment in `region` that is not already rendered.
    pub fn scan(&mut self, doc: &dyn DocumentHost, region: Span) -> ScanReport {
        let mut report = ScanReport::default();
        if !self.enabled {
            return report;
        }
        let Some(text) = doc.text(doc.full_span()) else {
            return report;
        };

        let fragments = self.syntax.fragments(text, region);
        let context = self.harvester.harvest(doc).clone();
        let cursor = doc.cursor();

        for fragment in fragments {
            report.found += 1;
            if cursor.is_some_and(|offset| fragment.span.touches(offset)) {
                report.editing += 1;
                continue;
            }
            let key = self.compiler.key_for(&fragment, &context);
            if self.annotations.covers(doc, &fragment, &key) {
                report.annotated += 1;
                continue;
            }
            if self
                .annotations
                .get(fragment.span)
                .is_some_and(|item| item.original_text == fragment.source)
            {
                report.outdated += 1;
            }
            if let Some(id) = self.jobs.in_flight(&key) {
                self.jobs.park(id, &fragment);
                report.in_flight += 1;
                continue;
            }

            match self.compiler.dispatch(&fragment, &context, &mut self.jobs) {
                Dispatch::Cached(path) => {
                    report.cached += 1;
                    self.attach(doc, &fragment, key, path);
                }
                Dispatch::Spawned(_) => report.spawned += 1,
            }
        }

        debug!(
            target = "application::session",
            op = "session::scan",
            region = %region,
            found = report.found,
            cached = report.cached,
            outdated = report.outdated,
            spawned = report.spawned,
            "Scan pass finished"
        );
        report
    }

    pub fn scan_visible(&mut self, doc: &dyn DocumentHost) -> ScanReport {
        self.scan(doc, doc.visible_region())
    }

    pub fn scan_all(&mut self, doc: &dyn DocumentHost) -> ScanReport {
        self.scan(doc, doc.full_span())
    }

    /// React to a text mutation: drop touched annotations and schedule a rescan.
    pub fn on_edit(&mut self, edit: &EditEvent) {
        let removed = self.annotations.on_edit(edit);
        if removed > 0 {
            debug!(
                target = "application::session",
                op = "session::on_edit",
                removed,
                span = %edit.span,
                "Edit invalidated annotations"
            );
        }
        self.on_activity();
    }

    /// Any user activity re-arms the idle timer in automatic mode.
    pub fn on_activity(&mut self) {
        if self.enabled && self.mode == ScanMode::Automatic {
            self.debounce.arm();
        }
    }

    /// Reveal the source under the cursor in automatic mode.
    pub fn on_cursor_moved(&mut self, doc: &dyn DocumentHost) {
        if self.mode == ScanMode::Automatic
            && let Some(offset) = doc.cursor()
        {
            self.annotations.reveal_at(offset);
        }
        self.on_activity();
    }

    /// Remove annotations over `span` so the user can edit the text beneath.
    pub fn clear(&mut self, span: Span) -> usize {
        self.annotations.clear(span)
    }

    /// True when no job is in flight and no idle scan is pending.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty() && !self.debounce.is_armed()
    }

    /// Wait for the next job event or idle deadline. Pends forever while idle.
    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::select! {
            Some(event) = self.events.recv() => SessionEvent::Job(event),
            _ = self.debounce.elapsed() => SessionEvent::IdleScan,
        }
    }

    pub fn handle(&mut self, doc: &dyn DocumentHost, event: SessionEvent) -> Progress {
        match event {
            SessionEvent::IdleScan => {
                self.debounce.disarm();
                Progress::Scanned(self.scan_visible(doc))
            }
            SessionEvent::Job(JobEvent::Started(id)) => {
                self.jobs.mark_running(id);
                if let Some(job) = self.jobs.get(id) {
                    debug!(
                        target = "application::session",
                        op = "session::handle",
                        job_id = %id,
                        span = %job.fragment.span,
                        queued_ms = job.started_at.elapsed().as_millis() as u64,
                        "Compile job running"
                    );
                }
                Progress::Started
            }
            SessionEvent::Job(JobEvent::Finished(outcome)) => self.complete(doc, outcome),
        }
    }

    /// Drive events until the session is idle.
    pub async fn settle(&mut self, doc: &dyn DocumentHost) -> SettleSummary {
        let mut summary = SettleSummary::default();
        while !self.is_idle() {
            let event = self.next_event().await;
            match self.handle(doc, event) {
                Progress::Rendered {
                    attached, stale, ..
                } => {
                    summary.attached += attached.len();
                    summary.stale += stale.len();
                }
                Progress::Failed { .. } => summary.failed += 1,
                Progress::Scanned(_) => summary.scans += 1,
                Progress::Started | Progress::Ignored => {}
            }
        }
        summary
    }

    /// Turn the feature off: kill every job, drop annotations, the timer and the
    /// diagnostic panel.
    pub async fn disable(&mut self) -> usize {
        self.enabled = false;
        self.debounce.disarm();
        let cancelled = self.jobs.cancel_all().await.len();
        let cleared = self.annotations.clear_all();
        self.reporter.clear();
        info!(
            target = "application::session",
            op = "session::disable",
            cancelled,
            cleared,
            "Rendering disabled for document"
        );
        cancelled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn harvester(&self) -> &ContextHarvester {
        &self.harvester
    }

    pub fn compiler(&self) -> &Arc<Compiler> {
        &self.compiler
    }

    fn complete(&mut self, doc: &dyn DocumentHost, outcome: CompileOutcome) -> Progress {
        let CompileOutcome {
            job_id,
            fragment,
            key,
            result,
        } = outcome;

        let state = if result.is_ok() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        let Some(job) = self.jobs.finish(job_id, state) else {
            debug!(
                target = "application::session",
                op = "session::complete",
                job_id = %job_id,
                "Ignoring completion of cancelled job"
            );
            return Progress::Ignored;
        };

        match result {
            Ok(path) => {
                let context = self.harvester.harvest(doc).clone();
                let mut attached = Vec::new();
                let mut stale = Vec::new();
                for candidate in std::iter::once(fragment).chain(job.waiting) {
                    let span = candidate.span;
                    // A declaration edited while the job ran moves the fragment to another key.
                    let outcome = if self.compiler.key_for(&candidate, &context) == key {
                        self.attach(doc, &candidate, key.clone(), path.clone())
                    } else {
                        counter!(METRIC_ANNOTATION_STALE).increment(1);
                        ApplyOutcome::Stale
                    };
                    match outcome {
                        ApplyOutcome::Attached => attached.push(span),
                        ApplyOutcome::Stale => stale.push(span),
                    }
                }
                Progress::Rendered {
                    artifact: path,
                    attached,
                    stale,
                }
            }
            Err(failure) => {
                counter!(METRIC_COMPILE_FAILURE).increment(1);
                let diagnostic = self.reporter.report(
                    failure.error.to_string(),
                    failure.source_text,
                    failure.diagnostics,
                );
                Progress::Failed {
                    span: fragment.span,
                    notice: diagnostic.notice(),
                }
            }
        }
    }

    fn attach(
        &mut self,
        doc: &dyn DocumentHost,
        fragment: &Fragment,
        key: CacheKey,
        path: PathBuf,
    ) -> ApplyOutcome {
        let outcome = self
            .annotations
            .apply(doc, fragment.span, key, path, &fragment.source);
        match outcome {
            ApplyOutcome::Attached => counter!(METRIC_ANNOTATION_ATTACHED).increment(1),
            ApplyOutcome::Stale => counter!(METRIC_ANNOTATION_STALE).increment(1),
        }
        outcome
    }
}
