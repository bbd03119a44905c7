use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use irw::catalog;
use irw::config::ConfigLoader;
use irw::domain::{AggMethod, Source, WavePolicy};
use irw::error::IrwError;
use irw::fetch::{self, FetchOptions};
use irw::filter::{self, Criterion, FilterSet};
use irw::itemtext;
use irw::output::{CsvOutput, JsonOutput, OutputMode, TextOutput};
use irw::reshape::{DEFAULT_ID_DENSITY_THRESHOLD, Reshaper};
use irw::session::Session;
use irw::table::{Table, Value};

#[derive(Parser)]
#[command(name = "irw")]
#[command(about = "Client for the Item Response Warehouse")]
#[command(version)]
struct Cli {
    /// Path to an irw.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = OutputMode::Text)]
    format: OutputMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List available tables")]
    Tables(TablesArgs),
    #[command(about = "Find tables whose metadata match the given filters")]
    Filter(FilterArgs),
    #[command(about = "List filter names, or describe one filter")]
    Filters(FiltersArgs),
    #[command(about = "Show table metadata, or database totals when no table is given")]
    Info(InfoArgs),
    #[command(about = "Fetch one or more tables")]
    Fetch(FetchArgs),
    #[command(about = "Reshape a local long-format CSV into a response matrix")]
    Wide(WideArgs),
    #[command(about = "Assemble BibTeX citations for tables")]
    Bibtex(BibtexArgs),
    #[command(about = "Download a table as CSV")]
    Download(DownloadArgs),
    #[command(about = "Fetch item-level text for a table")]
    Itemtext(ItemtextArgs),
}

#[derive(Args)]
struct TablesArgs {
    #[arg(long, value_enum, default_value_t = Source::Main)]
    source: Source,

    /// Join metadata, tags and bibliography onto the listing (main source only).
    #[arg(long)]
    metadata: bool,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct FilterArgs {
    /// NAME=VALUE, where VALUE is a number, a range (`1000..`, `..50`, `10..50`),
    /// `true`/`false` or text.
    #[arg(long = "filter", short = 'f')]
    filters: Vec<String>,

    /// Filters as a JSON object, e.g. '{"n_responses": [1000, null]}'.
    #[arg(long, conflicts_with = "filters")]
    json: Option<String>,

    /// Do not add the default density range [0.5, 1].
    #[arg(long)]
    no_default_density: bool,
}

#[derive(Args)]
struct FiltersArgs {
    name: Option<String>,
}

#[derive(Args)]
struct InfoArgs {
    table: Option<String>,

    #[arg(long, value_enum, default_value_t = Source::Main)]
    source: Source,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long, value_enum, default_value_t = Source::Main)]
    source: Source,

    /// Keep the first response per (id, item[, wave]).
    #[arg(long)]
    dedup: bool,

    /// Return the respondent x item matrix.
    #[arg(long)]
    wide: bool,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct WideArgs {
    path: Utf8PathBuf,

    /// Wave to keep; parsed like a CSV cell.
    #[arg(long)]
    wave: Option<String>,

    #[arg(long, value_enum)]
    wave_policy: Option<WavePolicy>,

    #[arg(long, value_enum)]
    agg: Option<AggMethod>,

    #[arg(long)]
    threshold: Option<f64>,

    /// Drop respondents who answered less than this share of items.
    #[arg(long)]
    min_density: Option<f64>,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct BibtexArgs {
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long, short = 'o', default_value = "refs.bib")]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct DownloadArgs {
    name: String,

    #[arg(long)]
    path: Option<Utf8PathBuf>,

    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct ItemtextArgs {
    #[arg(required_unless_present = "list")]
    name: Option<String>,

    /// List the tables that have item text.
    #[arg(long)]
    list: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<IrwError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IrwError) -> u8 {
    match error {
        IrwError::NotFound(_)
        | IrwError::Schema(_)
        | IrwError::UnsupportedAggregation(_)
        | IrwError::Filter(_)
        | IrwError::InvalidTableName(_)
        | IrwError::InvalidDatasetRef(_)
        | IrwError::InvalidSource(_)
        | IrwError::InvalidCsv(_)
        | IrwError::ConfigRead(_)
        | IrwError::ConfigParse(_) => 2,
        IrwError::Authentication(_) => 3,
        IrwError::PlatformHttp(_)
        | IrwError::PlatformStatus { .. }
        | IrwError::CitationHttp(_) => 4,
        IrwError::FileExists(_) | IrwError::Filesystem(_) => 5,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = cli.format;

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let mut session = Session::new(config);
    let result = run_command(cli.command, &session, mode);
    session.close();
    result
}

fn run_command(command: Commands, session: &Session, mode: OutputMode) -> miette::Result<()> {
    match command {
        Commands::Tables(args) => {
            let table = if args.metadata {
                if args.source != Source::Main {
                    warn!("metadata is only published for the main source; ignoring --source");
                }
                catalog::list_tables_enriched(session)?
            } else {
                catalog::list_tables(session, args.source)?
            };
            print_table(&table, mode, args.limit)
        }
        Commands::Filter(args) => {
            let mut filters = match args.json {
                Some(raw) => {
                    let value = serde_json::from_str(&raw)
                        .map_err(|err| IrwError::Filter(format!("invalid JSON: {err}")))?;
                    FilterSet::from_json(&value)?
                }
                None => parse_filters(&args.filters)?,
            };
            if !args.no_default_density {
                filters = filters.with_default_density();
            }
            let names = catalog::filter_tables(session, &filters)?;
            if names.is_empty() {
                warn!("no tables match the given filters");
            }
            print_names(&names, mode)
        }
        Commands::Filters(FiltersArgs { name: Some(name) }) => {
            let description = catalog::describe_filter(session, &name)?;
            match mode {
                OutputMode::Json => JsonOutput::print_filter(&description).into_diagnostic(),
                _ => {
                    print!("{description}");
                    Ok(())
                }
            }
        }
        Commands::Filters(FiltersArgs { name: None }) => print_names(&filter::get_filters(), mode),
        Commands::Info(args) => match args.table {
            Some(name) => match catalog::table_info(session, &name)? {
                Some(info) if mode == OutputMode::Json => {
                    JsonOutput::print_table_info(&info).into_diagnostic()
                }
                Some(info) => {
                    println!("{info}");
                    Ok(())
                }
                None => {
                    Err(IrwError::NotFound(format!("no metadata found for table '{name}'")).into())
                }
            },
            None => {
                let info = catalog::database_info(session, args.source)?;
                match mode {
                    OutputMode::Json => JsonOutput::print_database_info(&info).into_diagnostic(),
                    _ => {
                        println!("{info}");
                        Ok(())
                    }
                }
            }
        },
        Commands::Fetch(args) => {
            let options = FetchOptions {
                source: args.source,
                dedup: args.dedup,
                wide: args.wide,
            };
            let batch = fetch::fetch_many(session, &args.names, &options)?;
            for (name, fetched) in &batch.tables {
                if batch.tables.len() > 1 && mode == OutputMode::Text {
                    println!("== {name} ==");
                }
                print_table(&fetched.to_table(), mode, args.limit)?;
            }
            if batch.tables.is_empty() {
                if let Some(failure) = batch.failures.into_iter().next() {
                    return Err(failure.error.into());
                }
            }
            Ok(())
        }
        Commands::Bibtex(args) => {
            let report = catalog::save_bibtex(session, &args.names)?;
            for name in &report.not_found {
                warn!("'{name}' is not an IRW table");
            }
            for name in &report.missing {
                warn!("no BibTeX available for '{name}'");
            }
            for failure in &report.failures {
                warn!("citation lookup failed for '{}': {}", failure.table, failure.reason);
            }
            if report.entries.is_empty() {
                warn!("no BibTeX entries to write");
            } else {
                report.write_to(&args.output)?;
                info!("wrote {} BibTeX entries to {}", report.entries.len(), args.output);
            }
            if mode == OutputMode::Json {
                JsonOutput::print_bibtex(&report).into_diagnostic()?;
            }
            Ok(())
        }
        Commands::Download(args) => {
            let path = fetch::download(session, &args.name, args.path.as_deref(), args.overwrite)?;
            println!("{path}");
            Ok(())
        }
        Commands::Itemtext(args) => {
            if args.list {
                return print_names(&itemtext::list_tables_with_itemtext(session)?, mode);
            }
            let Some(name) = args.name else {
                return Ok(());
            };
            let table = itemtext::itemtext(session, &name)?;
            print_table(&table, mode, None)
        }
        Commands::Wide(args) => run_wide(args, mode),
    }
}

fn run_wide(args: WideArgs, mode: OutputMode) -> miette::Result<()> {
    let table = Table::from_csv_path(args.path.as_std_path())?;
    let mut reshaper = Reshaper::new()
        .id_density_threshold(args.threshold.unwrap_or(DEFAULT_ID_DENSITY_THRESHOLD))?
        .wave(args.wave.as_deref().map(Value::parse_cell))
        .min_response_density(args.min_density);
    if let Some(agg) = args.agg {
        reshaper = reshaper.agg(agg);
    }
    if let Some(policy) = args.wave_policy {
        reshaper = reshaper.wave_policy(policy);
    }
    let reshaped = reshaper.reshape(&table)?;
    print_table(&reshaped.matrix.to_table(), mode, args.limit)?;
    if mode == OutputMode::Json {
        JsonOutput::print_diagnostics(&reshaped.diagnostics).into_diagnostic()?;
    }
    Ok(())
}

fn parse_filters(raw: &[String]) -> Result<FilterSet, IrwError> {
    let mut filters = FilterSet::new();
    for entry in raw {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| IrwError::Filter(format!("expected NAME=VALUE, got '{entry}'")))?;
        let spec = filter::lookup(name.trim())?;
        filters.insert(spec.name, Criterion::parse_for(spec, value.trim())?)?;
    }
    Ok(filters)
}

fn print_table(table: &Table, mode: OutputMode, limit: Option<usize>) -> miette::Result<()> {
    match mode {
        OutputMode::Text => TextOutput::print_table(table, limit.or(Some(20))).into_diagnostic(),
        OutputMode::Csv => Ok(CsvOutput::print_table(table)?),
        OutputMode::Json => JsonOutput::print_table(table).into_diagnostic(),
    }
}

fn print_names<S: AsRef<str>>(names: &[S], mode: OutputMode) -> miette::Result<()> {
    let names = names.iter().map(|n| n.as_ref().to_string()).collect::<Vec<_>>();
    match mode {
        OutputMode::Json => JsonOutput::print_names(&names).into_diagnostic(),
        _ => {
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
    }
}
