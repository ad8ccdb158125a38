use std::{
    io::{self, Write},
    process,
    sync::Arc,
    time::Duration,
};

use fragview::{
    application::{
        ContextHarvester, Progress, Session, SessionEvent,
        error::AppError,
        render::{ArtifactCache, Compiler},
    },
    config,
    domain::{DocumentHost, DollarMath},
    infra::{
        error::InfraError,
        telemetry,
        watch::{FilePoller, load_buffer},
    },
};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::Watch(args) => run_watch(settings, args).await,
        config::Command::Key(args) => run_key(settings, args).await,
    }
}

fn open_session(settings: &config::Settings) -> Result<Session, AppError> {
    let compiler = Compiler::activate(settings.compiler_config())?;
    info!(
        target = "fragview::main",
        op = "session::open",
        program = %compiler.program().display(),
        cache_dir = %compiler.cache().dir().display(),
        "Compiler activated"
    );
    Ok(Session::new(
        Arc::new(compiler),
        Arc::new(DollarMath),
        settings.session_config(),
    ))
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let buffer = load_buffer(&args.file).await?;
    let mut session = open_session(&settings)?;

    let report = session.scan_all(&buffer);
    info!(
        target = "fragview::main",
        op = "render",
        file = %args.file.display(),
        found = report.found,
        cached = report.cached,
        spawned = report.spawned,
        "Dispatched fragments"
    );

    let summary = session.settle(&buffer).await;

    let mut stdout = io::stdout().lock();
    for annotation in session.annotations().iter() {
        writeln!(
            stdout,
            "{}\t{}",
            annotation.span,
            annotation.artifact_path.display()
        )
        .map_err(InfraError::from)?;
    }
    drop(stdout);

    if let Some(diagnostic) = session.reporter().current() {
        eprintln!("{}", diagnostic.render());
    }

    info!(
        target = "fragview::main",
        op = "render",
        attached = summary.attached,
        stale = summary.stale,
        failed = summary.failed,
        "Render finished"
    );

    if summary.failed > 0 {
        return Err(AppError::Render {
            failed: summary.failed,
        });
    }
    Ok(())
}

enum Step {
    Tick,
    Session(SessionEvent),
    Shutdown,
}

async fn run_watch(settings: config::Settings, args: config::WatchArgs) -> Result<(), AppError> {
    let mut buffer = load_buffer(&args.file).await?;
    let mut session = open_session(&settings)?;
    let mut poller = FilePoller::new(&args.file, Duration::from_millis(args.poll_ms.max(1)));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    session.scan_all(&buffer);
    info!(
        target = "fragview::main",
        op = "watch",
        file = %poller.path().display(),
        poll_ms = args.poll_ms,
        "Watching document"
    );

    loop {
        let step = tokio::select! {
            _ = poller.tick() => Step::Tick,
            event = session.next_event() => Step::Session(event),
            _ = &mut shutdown => Step::Shutdown,
        };

        match step {
            Step::Tick => match poller.refresh(&mut buffer).await {
                Ok(Some(edit)) => session.on_edit(&edit),
                Ok(None) => {}
                Err(err) => warn!(
                    target = "fragview::main",
                    op = "watch::refresh",
                    error = %err,
                    "Failed to re-read document"
                ),
            },
            Step::Session(event) => match session.handle(&buffer, event) {
                Progress::Rendered {
                    artifact,
                    attached,
                    stale,
                } => {
                    for span in attached {
                        println!("{span}\t{}", artifact.display());
                    }
                    if !stale.is_empty() {
                        debug!(
                            target = "fragview::main",
                            op = "watch",
                            stale = stale.len(),
                            "Discarded stale artifact"
                        );
                    }
                }
                Progress::Failed { notice, .. } => {
                    eprintln!("{notice}");
                    if let Some(diagnostic) = session.reporter().current() {
                        eprintln!("{}", diagnostic.render());
                    }
                }
                Progress::Scanned(report) => debug!(
                    target = "fragview::main",
                    op = "watch",
                    found = report.found,
                    spawned = report.spawned,
                    "Idle rescan"
                ),
                Progress::Started | Progress::Ignored => {}
            },
            Step::Shutdown => {
                let cancelled = session.disable().await;
                info!(
                    target = "fragview::main",
                    op = "watch",
                    cancelled,
                    "Shutting down"
                );
                return Ok(());
            }
        }
    }
}

async fn run_key(settings: config::Settings, args: config::KeyArgs) -> Result<(), AppError> {
    let buffer = load_buffer(&args.file).await?;
    let mut harvester = ContextHarvester::new(settings.context.clone());
    let context = harvester.harvest(&buffer);

    let cache = ArtifactCache::new(&settings.compiler.cache_dir, &settings.compiler.format);
    let key = cache.key_for(&settings.compiler.preamble, &context.text, &args.fragment);
    let cached = cache.lookup(&key).is_some();

    debug!(
        target = "fragview::main",
        op = "key",
        document_len = buffer.len(),
        context_len = context.text.len(),
        "Computed cache key"
    );

    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "{key}\t{}\t{}",
        cache.artifact_path(&key).display(),
        if cached { "cached" } else { "missing" }
    )
    .map_err(InfraError::from)?;
    Ok(())
}
