use super::*;

#[test]
fn defaults_resolve() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.compiler.program, PathBuf::from("typst"));
    assert_eq!(settings.compiler.format, "svg");
    assert_eq!(settings.compiler.timeout, Some(Duration::from_secs(30)));
    assert_eq!(settings.compiler.max_concurrent_jobs, 4);
    assert_eq!(settings.compiler.preamble, DEFAULT_PREAMBLE);
    assert_eq!(settings.scan.debounce, Duration::from_millis(300));
    assert_eq!(settings.scan.mode, ScanMode::Automatic);
    assert_eq!(settings.context, HarvestRules::default());
    assert_eq!(settings.logging.level, LevelFilter::INFO);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.compiler.max_concurrent_jobs = Some(2);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        max_concurrent_jobs: Some(8),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.compiler.max_concurrent_jobs, 8);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn zero_timeout_disables_it() {
    let mut raw = RawSettings::default();
    raw.compiler.timeout_seconds = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.compiler.timeout, None);
}

#[test]
fn zero_debounce_is_rejected() {
    let mut raw = RawSettings::default();
    raw.scan.debounce_ms = Some(0);
    let err = Settings::from_raw(raw).expect_err("invalid");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "scan.debounce_ms",
            ..
        }
    ));
}

#[test]
fn format_is_normalised_and_validated() {
    let mut raw = RawSettings::default();
    raw.compiler.format = Some(".PNG".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.compiler.format, "png");

    let mut raw = RawSettings::default();
    raw.compiler.format = Some("svg/../x".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn empty_keywords_rejected_when_required() {
    let mut raw = RawSettings::default();
    raw.context.declaration_keywords = Some(Vec::new());
    let err = Settings::from_raw(raw).expect_err("invalid");
    assert!(err.to_string().contains("context.declaration_keywords"));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn session_config_carries_scan_and_context() {
    let mut raw = RawSettings::default();
    raw.scan.mode = Some(ScanMode::Manual);
    raw.context.directive_prefix = Some("%typst".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");

    let session = settings.session_config();
    assert_eq!(session.mode, ScanMode::Manual);
    assert_eq!(session.harvest.directive_prefix, "%typst");
    assert_eq!(session.max_concurrent_jobs, 4);
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "fragview",
        "render",
        "--compiler",
        "/opt/typst/bin/typst",
        "--max-jobs",
        "2",
        "notes.md",
    ]);

    match args.command {
        Command::Render(render) => {
            assert_eq!(
                render.overrides.compiler_program.as_deref(),
                Some(std::path::Path::new("/opt/typst/bin/typst"))
            );
            assert_eq!(render.overrides.max_concurrent_jobs, Some(2));
            assert_eq!(render.file, std::path::Path::new("notes.md"));
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}

#[test]
fn parse_watch_arguments() {
    let args = CliArgs::parse_from([
        "fragview",
        "watch",
        "--poll-ms",
        "100",
        "--debounce-ms",
        "750",
        "notes.md",
    ]);

    match args.command {
        Command::Watch(watch) => {
            assert_eq!(watch.poll_ms, 100);
            assert_eq!(watch.overrides.debounce_ms, Some(750));
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}

#[test]
fn parse_key_arguments() {
    let args = CliArgs::parse_from([
        "fragview",
        "key",
        "--fragment",
        "$x^2+y^2=z^2$",
        "notes.md",
    ]);

    match args.command {
        Command::Key(key) => {
            assert_eq!(key.fragment, "$x^2+y^2=z^2$");
            assert_eq!(key.file, std::path::Path::new("notes.md"));
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}
