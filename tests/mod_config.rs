use plp_bookstore::config::{AppConfig, FileConfig, OutputFormat};
use plp_bookstore::errors::DbError;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

#[test]
fn defaults() {
    let cfg = AppConfig::resolve(FileConfig::default());
    assert_eq!(cfg, AppConfig::default());
    assert_eq!(cfg.db_name, "plp_bookstore");
    assert_eq!(cfg.collection, "books");
    assert_eq!(cfg.data_dir, PathBuf::from("./data"));
    assert_eq!(cfg.log_dir, None);
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.output, OutputFormat::Pretty);
}

#[test]
fn parse_toml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bookstore.toml");
    fs::write(&path, "db_name = \"shop\"\nlog_level = \"debug\"\noutput = \"json\"\n").unwrap();
    let fc = AppConfig::parse_file(&path).unwrap();
    assert_eq!(fc.db_name.as_deref(), Some("shop"));
    assert_eq!(fc.log_level.as_deref(), Some("debug"));
    assert_eq!(fc.output, Some(OutputFormat::Json));
    assert_eq!(fc.collection, None);
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bookstore.toml");
    fs::write(&path, "db_nmae = \"typo\"\n").unwrap();
    assert!(matches!(AppConfig::parse_file(&path), Err(DbError::Config(_))));
}

#[test]
fn env_layer_reads_prefixed_vars_only() {
    let layer = AppConfig::env_layer(vars(&[
        ("BOOKSTORE_DB", "from_env"),
        ("BOOKSTORE_LOG_DIR", "/tmp/logs"),
        ("HOME", "/root"),
    ]))
    .unwrap();
    assert_eq!(layer.db_name.as_deref(), Some("from_env"));
    assert_eq!(layer.log_dir, Some(PathBuf::from("/tmp/logs")));
    assert_eq!(layer.data_dir, None);
}

#[test]
fn env_layer_reads_output_format() {
    let layer = AppConfig::env_layer(vars(&[("BOOKSTORE_OUTPUT", "json")])).unwrap();
    assert_eq!(layer.output, Some(OutputFormat::Json));
    let layer = AppConfig::env_layer(vars(&[("BOOKSTORE_OUTPUT", "Pretty")])).unwrap();
    assert_eq!(layer.output, Some(OutputFormat::Pretty));

    // the environment fills in output only when the command line left it unset
    let mut cli = FileConfig::default();
    cli.fill_from(AppConfig::env_layer(vars(&[("BOOKSTORE_OUTPUT", "json")])).unwrap());
    assert_eq!(AppConfig::resolve(cli).output, OutputFormat::Json);
    let mut cli = FileConfig { output: Some(OutputFormat::Pretty), ..FileConfig::default() };
    cli.fill_from(AppConfig::env_layer(vars(&[("BOOKSTORE_OUTPUT", "json")])).unwrap());
    assert_eq!(AppConfig::resolve(cli).output, OutputFormat::Pretty);
}

#[test]
fn env_layer_rejects_unknown_output_format() {
    let err = AppConfig::env_layer(vars(&[("BOOKSTORE_OUTPUT", "yaml")])).unwrap_err();
    assert!(matches!(&err, DbError::Config(m) if m.contains("yaml")));
}

#[test]
fn precedence_cli_env_file_default() {
    let cli = FileConfig { collection: Some("cli_books".into()), ..FileConfig::default() };
    let env = AppConfig::env_layer(vars(&[("BOOKSTORE_COLLECTION", "env_books"), ("BOOKSTORE_DB", "env_db")])).unwrap();
    let file = FileConfig {
        collection: Some("file_books".into()),
        db_name: Some("file_db".into()),
        log_level: Some("warn".into()),
        ..FileConfig::default()
    };
    let mut layer = cli;
    layer.fill_from(env);
    layer.fill_from(file);
    let cfg = AppConfig::resolve(layer);
    assert_eq!(cfg.collection, "cli_books");
    assert_eq!(cfg.db_name, "env_db");
    assert_eq!(cfg.log_level, "warn");
    assert_eq!(cfg.data_dir, PathBuf::from("./data"));
}

#[test]
fn load_with_explicit_file_and_overrides() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    let data_dir = dir.path().join("db");
    fs::write(&path, format!("data_dir = {:?}\ncollection = \"file_books\"\n", data_dir.display().to_string())).unwrap();
    let overrides = FileConfig { collection: Some("cli_books".into()), ..FileConfig::default() };
    let cfg = AppConfig::load(Some(&path), overrides).unwrap();
    assert_eq!(cfg.collection, "cli_books");
    if std::env::var_os("BOOKSTORE_DATA_DIR").is_none() {
        assert_eq!(cfg.data_dir, data_dir);
    }
}

#[test]
fn load_with_missing_explicit_file_errors() {
    let dir = tempdir().unwrap();
    let err = AppConfig::load(Some(&dir.path().join("nope.toml")), FileConfig::default()).unwrap_err();
    assert!(matches!(err, DbError::Config(_)));
}
