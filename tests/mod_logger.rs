use plp_bookstore::errors::DbError;
use plp_bookstore::logger::{AUDIT_TARGET, init_console, init_for_db_in, parse_level};
use log::LevelFilter;
use tempfile::tempdir;

// log4rs can only be initialized once per process, so this file holds a single test.
#[test]
fn file_logging_splits_audit_records() {
    assert_eq!(parse_level("debug").unwrap(), LevelFilter::Debug);
    assert_eq!(parse_level("WARN").unwrap(), LevelFilter::Warn);
    let err = parse_level("debg").unwrap_err();
    assert!(matches!(&err, DbError::Config(m) if m.contains("debg")));

    let dir = tempdir().unwrap();
    // a bad level fails before anything is installed or created
    assert!(init_console("loud").is_err());
    assert!(init_for_db_in(dir.path(), "plp_bookstore", "loud").is_err());
    assert!(!dir.path().join("plp_bookstore_logs").exists());

    let log_dir = init_for_db_in(dir.path(), "plp_bookstore", "info").unwrap();
    assert_eq!(log_dir, dir.path().join("plp_bookstore_logs"));

    log::info!("app record");
    log::info!(target: AUDIT_TARGET, "audit record");
    log::logger().flush();

    let app = std::fs::read_to_string(log_dir.join("plp_bookstore.log")).unwrap();
    let audit = std::fs::read_to_string(log_dir.join("plp_bookstore_audit.log")).unwrap();
    assert!(app.contains("app record"));
    assert!(!app.contains("audit record"));
    assert!(audit.contains("audit record"));
}
