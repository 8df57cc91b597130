use clap::{Parser, Subcommand};
use plp_bookstore::catalog::catalog;
use plp_bookstore::config::{AppConfig, FileConfig, OutputFormat};
use plp_bookstore::runner::{self, StatementResult};
use plp_bookstore::{Database, import, logger};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bookstore", version, about = "Runs the bookstore statements against an embedded document store", long_about = None)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML). If omitted, the usual locations are searched.")]
    config: Option<PathBuf>,
    #[arg(long, help = "Directory holding database snapshots. Takes precedence over config/env.")]
    data_dir: Option<PathBuf>,
    #[arg(long, help = "Database name (snapshot is {data_dir}/{db}.json)")]
    db: Option<String>,
    #[arg(long, help = "Collection the statements run against")]
    collection: Option<String>,
    #[arg(long, help = "Write logs under this directory instead of stderr")]
    log_dir: Option<PathBuf>,
    #[arg(long, help = "Log level: error, warn, info, debug, trace")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List the statements in run order")]
    List,
    #[command(about = "Run all statements, or a single one")]
    Run {
        #[arg(long, help = "Run only the statement with this name")]
        only: Option<String>,
        #[arg(long, help = "Print one JSON object per statement")]
        json: bool,
        #[arg(long, help = "Do not persist changes after the run")]
        no_flush: bool,
    },
    #[command(about = "Seed the collection from a JSON array or NDJSON file")]
    Import {
        #[arg(help = "File to import")]
        file: PathBuf,
    },
    #[command(about = "List indexes on the collection")]
    Indexes,
}

fn init_logging(cfg: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match &cfg.log_dir {
        Some(dir) => {
            let dir = logger::init_for_db_in(dir, &cfg.db_name, &cfg.log_level)?;
            log::debug!("logging to {}", dir.display());
        }
        None => logger::init_console(&cfg.log_level)?,
    }
    Ok(())
}

fn print_results(results: &[StatementResult], output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match output {
        OutputFormat::Pretty => runner::render_pretty(results, &mut out)?,
        OutputFormat::Json => {
            for r in results {
                writeln!(out, "{}", runner::render_json(r))?;
            }
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let overrides = FileConfig {
        data_dir: cli.data_dir,
        db_name: cli.db,
        collection: cli.collection,
        log_dir: cli.log_dir,
        log_level: cli.log_level,
        output: match &cli.command {
            Commands::Run { json: true, .. } => Some(OutputFormat::Json),
            _ => None,
        },
    };
    let cfg = AppConfig::load(cli.config.as_deref(), overrides)?;
    init_logging(&cfg)?;
    log::info!("opening {} in {}", cfg.db_name, cfg.data_dir.display());

    match cli.command {
        Commands::List => {
            for q in catalog() {
                let tag = if q.statement.is_mutation() { " (writes)" } else { "" };
                println!("{:<28} {}{}", q.name, q.description, tag);
            }
        }
        Commands::Run { only, no_flush, .. } => {
            let db = Database::open(&cfg)?;
            let results = match only {
                Some(name) => vec![runner::run_named(&db, &cfg.collection, &name)?],
                None => runner::run_all(&db, &cfg.collection),
            };
            print_results(&results, cfg.output)?;
            if !no_flush {
                db.flush()?;
            }
            let failed = results.iter().filter(|r| r.result.is_err()).count();
            if failed > 0 {
                return Err(format!("{failed} statement(s) failed").into());
            }
        }
        Commands::Import { file } => {
            let db = Database::open(&cfg)?;
            let col = db.create_collection(&cfg.collection);
            let report = import::import_file(&col, &file)?;
            db.flush()?;
            println!("inserted {} documents into {}.{}", report.inserted, cfg.db_name, cfg.collection);
        }
        Commands::Indexes => {
            let db = Database::open(&cfg)?;
            for spec in db.list_indexes(&cfg.collection)? {
                println!("{}", spec.name);
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
