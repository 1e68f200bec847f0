//! vizquery CLI - run chart queries from the command line
//!
//! Usage:
//!   vizquery query <request.json> [--role <role>] [--timezone <tz>]
//!   vizquery sql <request.json>
//!   vizquery sources
//!   vizquery serve
//!
//! Examples:
//!   vizquery --config demos/vizquery.toml query demos/requests/monthly_sales.json --role member
//!   vizquery --config demos/vizquery.toml sql demos/requests/monthly_sales.json --timezone +08:00

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vizquery::config::Settings;
use vizquery::request::{QueryRequest, RequestState};
use vizquery::service::QueryService;

#[derive(Parser)]
#[command(name = "vizquery")]
#[command(about = "vizquery - declarative chart queries over SQL data sources")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to VIZQUERY_CONFIG, ./vizquery.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Role the query runs under
    #[arg(long, global = true)]
    role: Option<String>,

    /// UTC offset such as +08:00
    #[arg(long, global = true)]
    timezone: Option<String>,

    /// Current user as JSON, for {{$user.*}} variables
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a chart query and print the result rows as JSON
    Query {
        /// Path to the request JSON file
        file: PathBuf,

        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },

    /// Print the SQL a chart query would run
    Sql {
        /// Path to the request JSON file
        file: PathBuf,
    },

    /// List configured data sources
    Sources,

    /// Serve chart queries over HTTP
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vizquery=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let state = match request_state(&cli) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Invalid --user JSON: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Query { file, compact } => cmd_query(&settings, &file, state, compact).await,
        Commands::Sql { file } => cmd_sql(&settings, &file, state).await,
        Commands::Sources => cmd_sources(&settings),
        Commands::Serve => cmd_serve(&settings).await,
    }
}

fn request_state(cli: &Cli) -> Result<RequestState, serde_json::Error> {
    let mut state = RequestState::new();
    if let Some(role) = &cli.role {
        state = state.with_role(role);
    }
    if let Some(tz) = &cli.timezone {
        state = state.with_timezone(tz);
    }
    if let Some(user) = &cli.user {
        state = state.with_user(serde_json::from_str(user)?);
    }
    Ok(state)
}

fn read_request(file: &Path) -> Result<QueryRequest, String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Error reading file '{}': {}", file.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("Invalid request in '{}': {}", file.display(), e))
}

fn service(settings: &Settings) -> Result<QueryService, ExitCode> {
    QueryService::from_settings(settings).map_err(|e| {
        eprintln!("Startup error: {}", e);
        ExitCode::FAILURE
    })
}

async fn cmd_query(settings: &Settings, file: &Path, state: RequestState, compact: bool) -> ExitCode {
    let request = match read_request(file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let service = match service(settings) {
        Ok(s) => s,
        Err(code) => return code,
    };

    match service.query(request, state).await {
        Ok(body) => {
            let out = if compact {
                serde_json::to_string(&body)
            } else {
                serde_json::to_string_pretty(&body)
            };
            match out {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error serializing result: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Err(failure) => {
            eprintln!("Query failed ({}): {}", failure.status, failure.message);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_sql(settings: &Settings, file: &Path, state: RequestState) -> ExitCode {
    let request = match read_request(file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let service = match service(settings) {
        Ok(s) => s,
        Err(code) => return code,
    };

    match service.explain(request, state).await {
        Ok(sql) => {
            println!("{}", sql);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("Query failed ({}): {}", failure.status, failure.message);
            ExitCode::FAILURE
        }
    }
}

fn cmd_sources(settings: &Settings) -> ExitCode {
    let service = match service(settings) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let mut ids: Vec<&String> = settings.data_sources.keys().collect();
    ids.sort();
    if ids.is_empty() {
        println!("No data sources configured.");
        return ExitCode::SUCCESS;
    }

    let default_id = service.registry().default_id();
    for id in ids {
        let ds = &settings.data_sources[id];
        let marker = if id == default_id { " (default)" } else { "" };
        let dialect = ds.dialect().map(|d| d.to_string()).unwrap_or_default();
        let driver = ds.driver.map(|d| d.as_str()).unwrap_or("none");
        println!("{}{}  dialect={} driver={}", id, marker, dialect, driver);
    }
    ExitCode::SUCCESS
}

#[cfg(feature = "server")]
async fn cmd_serve(settings: &Settings) -> ExitCode {
    match vizquery::web::serve(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(feature = "server"))]
async fn cmd_serve(_settings: &Settings) -> ExitCode {
    eprintln!("vizquery was built without the 'server' feature");
    ExitCode::FAILURE
}
