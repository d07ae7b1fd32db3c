use clap::{Parser, Subcommand};
use docql::{Database, cli, config, logger};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "docql", version, about = "Run MongoDB-style query scripts against an in-memory store")]
struct Cli {
    /// Config file (TOML). Falls back to DOCQL_CONFIG, the user config dir, then ./docql.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory for the rolling log files. Defaults to the per-user data dir.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Log level for app.log (error|warn|info|debug|trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Pretty-print results as a JSON array.
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a script with one JSON command per line.
    Run {
        script: PathBuf,
        /// Continue with the next line after a failing command.
        #[arg(long)]
        keep_going: bool,
    },
    /// Execute a single JSON command.
    Exec { json: String },
}

fn print_docs(docs: &[docql::Document], pretty: bool) -> Result<(), docql::DbError> {
    let text = cli::render(docs, pretty)?;
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())?;
    if pretty {
        writeln!(out)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();
    let mut opts = match config::load(args.config.as_deref()) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("docql: {e}");
            return ExitCode::from(2);
        }
    };
    if let Some(dir) = &args.log_dir {
        opts.log.dir = Some(dir.clone());
    }
    if let Some(level) = &args.log_level {
        opts.log.level.clone_from(level);
    }
    if let Err(e) = logger::configure_from_env(&opts.log) {
        eprintln!("docql: logging disabled: {e}");
    }
    let db = Database::with_options(opts);

    match args.command {
        Commands::Exec { json } => match cli::parse_command_json(&json).and_then(|cmd| cli::run(&db, cmd)) {
            Ok(docs) => match print_docs(&docs, args.pretty) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("docql: {e}");
                    ExitCode::FAILURE
                }
            },
            Err(e) => {
                eprintln!("docql: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::Run { script, keep_going } => {
            let text = match std::fs::read_to_string(&script) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("docql: cannot read {}: {e}", script.display());
                    return ExitCode::from(2);
                }
            };
            let results = cli::run_script(&db, &text, keep_going);
            let mut failures = 0usize;
            for r in &results {
                match &r.output {
                    Ok(docs) => {
                        if let Err(e) = print_docs(docs, args.pretty) {
                            eprintln!("docql: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        eprintln!("docql: line {}: {e}", r.line);
                    }
                }
            }
            log::info!(
                "script {} finished: {} commands, {} documents, {failures} failures",
                script.display(),
                results.len(),
                cli::total_documents(&results)
            );
            if failures == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        }
    }
}
