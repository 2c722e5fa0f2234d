use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ledgerops_config::DatabaseConfig;
use ledgerops_db::{
    ConnectionSource, FileDatabase, MigrationError, MigrationRunner, MigrationScript,
    RunnerOptions,
};

const CREATE_TRANSACTIONS: &str = "CREATE TABLE transactions (
    id INTEGER PRIMARY KEY,
    account TEXT NOT NULL,
    amount_cents INTEGER NOT NULL CHECK (amount_cents <> 0)
);";

fn file_runner(path: &Path) -> MigrationRunner {
    MigrationRunner::new(
        FileDatabase::new(path, Duration::from_secs(5)),
        RunnerOptions::default(),
    )
    .unwrap()
}

fn count(path: &Path, sql: &str) -> i64 {
    let db = FileDatabase::new(path, Duration::from_secs(1));
    let conn = db.acquire().unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn first_apply_creates_table_and_single_record() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledger.db");
    let runner = file_runner(&db_path);
    let script = MigrationScript::new("030", "transactions", CREATE_TRANSACTIONS).unwrap();

    let applied = runner.apply(&script).unwrap();
    assert!(!applied.skipped);

    assert_eq!(
        count(
            &db_path,
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='transactions'"
        ),
        1
    );
    assert_eq!(count(&db_path, "SELECT count(*) FROM _migrations"), 1);

    let records = runner.applied().unwrap();
    assert_eq!(records[0].identifier.as_str(), "030");
    assert_eq!(records[0].checksum, script.checksum());
}

#[test]
fn reapplying_unchanged_script_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledger.db");
    let script = MigrationScript::new("030", "transactions", CREATE_TRANSACTIONS).unwrap();

    // A fresh runner per call, as separate deploys would have.
    file_runner(&db_path).apply(&script).unwrap();
    let second = file_runner(&db_path).apply(&script).unwrap();

    assert!(second.skipped);
    assert_eq!(count(&db_path, "SELECT count(*) FROM _migrations"), 1);
}

#[test]
fn modified_script_is_rejected_as_drift() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledger.db");
    let runner = file_runner(&db_path);
    runner
        .apply(&MigrationScript::new("030", "transactions", CREATE_TRANSACTIONS).unwrap())
        .unwrap();

    let modified = MigrationScript::new(
        "030",
        "transactions",
        format!("{CREATE_TRANSACTIONS}\nCREATE INDEX idx_tx_account ON transactions(account);"),
    )
    .unwrap();

    match runner.apply(&modified) {
        Err(MigrationError::Drift {
            identifier,
            recorded,
            current,
        }) => {
            assert_eq!(identifier, "030");
            assert_ne!(recorded, current);
            assert_eq!(current, modified.checksum());
        }
        other => panic!("expected drift, got {other:?}"),
    }
    assert_eq!(
        count(
            &db_path,
            "SELECT count(*) FROM sqlite_master WHERE type='index' AND name='idx_tx_account'"
        ),
        0
    );
}

#[test]
fn constraint_violation_rolls_back_every_statement() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledger.db");
    let runner = file_runner(&db_path);
    runner
        .apply(&MigrationScript::new("030", "transactions", CREATE_TRANSACTIONS).unwrap())
        .unwrap();

    let seed = MigrationScript::new(
        "031",
        "seed",
        "INSERT INTO transactions (account, amount_cents) VALUES ('cash', 1500);
         INSERT INTO transactions (account, amount_cents) VALUES ('cash', -200);
         INSERT INTO transactions (account, amount_cents) VALUES ('cash', 0);",
    )
    .unwrap();

    let err = runner.apply(&seed).unwrap_err();
    assert!(matches!(err, MigrationError::Execution { .. }), "{err}");
    assert!(err.to_string().contains("CHECK constraint failed"), "{err}");

    assert_eq!(count(&db_path, "SELECT count(*) FROM transactions"), 0);
    assert_eq!(count(&db_path, "SELECT count(*) FROM _migrations"), 1);
}

#[test]
fn missing_script_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = MigrationScript::from_file(&dir.path().join("030_transactions.sql")).unwrap_err();
    assert!(matches!(err, MigrationError::NotFound { .. }), "{err}");
}

#[test]
fn concurrent_runners_apply_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = Arc::new(dir.path().join("ledger.db"));
    let script = Arc::new(
        MigrationScript::new("030", "transactions", CREATE_TRANSACTIONS).unwrap(),
    );
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db_path = Arc::clone(&db_path);
            let script = Arc::clone(&script);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let runner = file_runner(&db_path);
                barrier.wait();
                runner.apply(&script)
            })
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("runner thread panicked").unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|a| !a.skipped).count(), 1);
    assert_eq!(outcomes.iter().filter(|a| a.skipped).count(), 3);
    assert_eq!(count(&db_path, "SELECT count(*) FROM _migrations"), 1);
}

#[test]
fn runner_built_from_config_applies_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(migrations.join("001_transactions.sql"), CREATE_TRANSACTIONS).unwrap();
    std::fs::write(
        migrations.join("002_account_index.sql"),
        "CREATE INDEX idx_tx_account ON transactions(account);",
    )
    .unwrap();

    let db_path = dir.path().join("ledger.db");
    let config = DatabaseConfig {
        url: Some(format!("sqlite://{}", db_path.display())),
        ..Default::default()
    };
    let runner = MigrationRunner::from_config(&config).unwrap();
    let scripts = MigrationScript::load_dir(&migrations).unwrap();

    let results = runner.apply_all(&scripts).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|a| !a.skipped));
    assert_eq!(count(&db_path, "SELECT count(*) FROM _migrations"), 2);

    let status = runner.status(&scripts).unwrap();
    assert!(status.iter().all(|s| s.label() == "applied"));
}
