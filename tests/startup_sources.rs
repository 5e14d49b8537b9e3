use std::fs;
use std::path::Path;

use pricecast::{
    load_session, ModelSource, SourceKind, SourceRef, StartupConfig, StartupError, WINDOW_SIZE,
};

fn write(dir: &Path, name: &str, body: &str) -> SourceRef {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    SourceRef::Path(path)
}

fn history_rows(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            format!(
                r#"{{"date":"2020-{:02}-{:02}","close":{}.5,"features_raw":[{}.0,2.0]}}"#,
                1 + i / 28,
                1 + i % 28,
                20 + i,
                i
            )
        })
        .collect()
}

fn config(dir: &Path, scaler: &str, history: &str) -> StartupConfig {
    StartupConfig {
        model: ModelSource::Constant(0.0),
        scaler: write(dir, "scaler.json", scaler),
        history: write(dir, "history.json", history),
        ..StartupConfig::default()
    }
}

fn expect_failure(cfg: &StartupConfig) -> StartupError {
    match load_session(cfg) {
        Err(err) => err,
        Ok(_) => panic!("startup should fail"),
    }
}

#[test]
fn loads_sorted_deduplicated_history_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut rows = history_rows(WINDOW_SIZE + 2);
    rows.reverse();
    rows.push(
        r#"{"date":"2020-01-01","close":999.0,"features_raw":[0.0,2.0],"isPrediction":false}"#
            .to_string(),
    );
    let cfg = config(
        dir.path(),
        r#"{"mean_":[1.0,2.0],"scale_":[2.0,1.0]}"#,
        &format!("[{}]", rows.join(",")),
    );

    let session = load_session(&cfg).unwrap();

    assert_eq!(session.ledger_len(), WINDOW_SIZE + 2);
    assert!(!session.engine().scaler().is_identity());
    session.with_ledger(|ledger| {
        let dates: Vec<&str> = ledger.rows().iter().map(|r| r.date.as_str()).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
        assert_eq!(ledger.rows()[0].close, 20.5);
        assert_eq!(ledger.feature_count(), Some(2));
    });

    let report = session.load_report().unwrap();
    assert_eq!(report.input_rows, (WINDOW_SIZE + 3) as u64);
    assert_eq!(report.duplicate_dates_removed, 1);

    let result = session.predict_next().unwrap();
    assert_eq!(result.date, "2020-03-07");
}

#[test]
fn empty_history_file_still_produces_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), r#"{"mean_":[0.0],"scale_":[1.0]}"#, "[]");

    let session = load_session(&cfg).unwrap();
    assert_eq!(session.ledger_len(), 0);
}

#[test]
fn scaler_without_scale_falls_back_to_identity() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        r#"{"mean_":[1.0,2.0]}"#,
        &format!("[{}]", history_rows(3).join(",")),
    );

    let session = load_session(&cfg).unwrap();
    assert!(session.engine().scaler().is_identity());
}

#[test]
fn missing_history_file_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), r#"{"mean_":[0.0],"scale_":[1.0]}"#, "[]");
    cfg.history = SourceRef::Path(dir.path().join("absent.json"));

    let err = expect_failure(&cfg);
    assert_eq!(err.source_kind(), Some(SourceKind::History));
    assert!(err.to_string().contains("absent.json"));
}

#[test]
fn malformed_scaler_json_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "{not json", "[]");

    let err = expect_failure(&cfg);
    assert_eq!(err.source_kind(), Some(SourceKind::Scaler));
}

#[test]
fn invalid_history_rows_fail_startup() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        r#"{"mean_":[0.0],"scale_":[1.0]}"#,
        r#"[{"date":"2020-01-01","close":-1.0,"features_raw":[1.0]}]"#,
    );

    let err = expect_failure(&cfg);
    assert_eq!(err.source_kind(), Some(SourceKind::History));
}

#[test]
fn non_iso_history_dates_fail_startup() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        r#"{"mean_":[0.0],"scale_":[1.0]}"#,
        r#"[{"date":"2024-01-08","close":1.0,"features_raw":[1.0]},
            {"date":"2024-1-9","close":1.1,"features_raw":[1.0]}]"#,
    );

    let err = expect_failure(&cfg);
    assert_eq!(err.source_kind(), Some(SourceKind::History));
    assert!(err.to_string().contains("2024-1-9"));
}
