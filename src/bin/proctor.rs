//! Proctor CLI - Command-line interface for Proctor Flux
//!
//! Commands:
//! - replay: Drive a session from recorded input records
//! - validate: Validate input record schema
//! - config: Print or check a session configuration
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use proctor_flux::config::ProctorConfig;
use proctor_flux::encoder::SIGNAL_SCHEMA;
use proctor_flux::pipeline::ReplayProcessor;
use proctor_flux::schema::{InputAdapter, INPUT_SCHEMA};
use proctor_flux::{ProctorError, PROCTOR_VERSION, PRODUCER_NAME};

/// Proctor - On-device behavioral risk scoring for proctored assessments
#[derive(Parser)]
#[command(name = "proctor")]
#[command(author = "Synheart AI Inc")]
#[command(version = PROCTOR_VERSION)]
#[command(about = "Score proctoring signals from recorded capture data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay input records through a session
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Session configuration file (JSON, partial overrides allowed)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Session identifier stamped on every output record
        #[arg(long, default_value = "replay")]
        session_id: String,

        /// Reference embeddings file (JSON array of float arrays)
        #[arg(long)]
        enroll: Option<PathBuf>,

        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Validate input record schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration, or check and print a given one
    Config {
        /// Configuration file to check
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one signal per line)
    Ndjson,
    /// JSON array of signals
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("PROCTOR_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), ProctorCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            output_format,
            config,
            session_id,
            enroll,
            flush,
        } => cmd_replay(
            &input,
            &output,
            output_format,
            config.as_deref(),
            &session_id,
            enroll.as_deref(),
            flush,
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Config { file } => cmd_config(file.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    output_format: OutputFormat,
    config: Option<&Path>,
    session_id: &str,
    enroll: Option<&Path>,
    flush: bool,
) -> Result<(), ProctorCliError> {
    let config = load_config(config)?;
    let mut processor = ReplayProcessor::new(config, session_id)?;

    if let Some(enroll_path) = enroll {
        let embeddings: Vec<Vec<f32>> = serde_json::from_str(&fs::read_to_string(enroll_path)?)?;
        processor.enroll(&embeddings)?;
    }

    let reader: Box<dyn BufRead> = if is_stdio(input) {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(input)?))
    };
    let mut writer: Box<dyn Write> = if is_stdio(output) {
        Box::new(io::stdout())
    } else {
        Box::new(fs::File::create(output)?)
    };

    let streaming = matches!(output_format, OutputFormat::Ndjson);
    let mut collected: Vec<serde_json::Value> = Vec::new();
    let mut records = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record = InputAdapter::parse_line(trimmed, index + 1)?;
        let signals = processor.push(&record)?;
        records += 1;

        emit(&mut writer, signals, streaming, &mut collected)?;
        if streaming && flush {
            writer.flush()?;
        }
    }

    if records == 0 {
        return Err(ProctorCliError::NoRecords);
    }

    let remaining = processor.finish()?;
    emit(&mut writer, remaining, streaming, &mut collected)?;

    match output_format {
        OutputFormat::Ndjson => {}
        OutputFormat::Json => writeln!(writer, "{}", serde_json::to_string(&collected)?)?,
        OutputFormat::JsonPretty => {
            writeln!(writer, "{}", serde_json::to_string_pretty(&collected)?)?
        }
    }
    writer.flush()?;

    tracing::debug!(records, "replay finished");
    Ok(())
}

fn emit(
    writer: &mut dyn Write,
    signals: Vec<String>,
    streaming: bool,
    collected: &mut Vec<serde_json::Value>,
) -> Result<(), ProctorCliError> {
    for line in signals {
        if streaming {
            writeln!(writer, "{line}")?;
        } else {
            collected.push(serde_json::from_str(&line)?);
        }
    }
    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), ProctorCliError> {
    let input_data = read_input(input)?;

    let records = match input_format {
        InputFormat::Ndjson => InputAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => InputAdapter::parse_array(&input_data)?,
    };

    let results = InputAdapter::validate_records(&records);

    let report = ValidationReport {
        schema: INPUT_SCHEMA.to_string(),
        total_records: records.len(),
        valid_records: records.len() - results.len(),
        invalid_records: results.len(),
        ordered: InputAdapter::is_ordered(&records),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                kind: r.kind.to_string(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);
        if !report.ordered {
            println!("Warning: timestamps are not in non-decreasing order");
        }

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - {} record (index {}): {}", err.kind, err.index, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(ProctorCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_config(file: Option<&Path>) -> Result<(), ProctorCliError> {
    let config = load_config(file)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), ProctorCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "proctor_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Proctor version {PROCTOR_VERSION}"),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {INPUT_SCHEMA}, output schema: {SIGNAL_SCHEMA}"),
    });

    match config {
        Some(path) if !path.exists() => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Configuration file does not exist".to_string(),
        }),
        Some(path) => {
            let check = match load_config(Some(path)) {
                Ok(_) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: "Configuration file valid".to_string(),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: CliError::from(e).message,
                },
            };
            checks.push(check);
        }
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using default configuration".to_string(),
        }),
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PROCTOR_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Proctor Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(ProctorCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn is_stdio(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn read_input(input: &Path) -> Result<String, ProctorCliError> {
    if is_stdio(input) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<ProctorConfig, ProctorCliError> {
    let Some(path) = path else {
        return Ok(ProctorConfig::default());
    };
    let config = ProctorConfig::from_json(&fs::read_to_string(path)?)?;
    config.validate()?;
    Ok(config)
}

// Error types

#[derive(Debug)]
enum ProctorCliError {
    Io(io::Error),
    Proctor(ProctorError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for ProctorCliError {
    fn from(e: io::Error) -> Self {
        ProctorCliError::Io(e)
    }
}

impl From<ProctorError> for ProctorCliError {
    fn from(e: ProctorError) -> Self {
        ProctorCliError::Proctor(e)
    }
}

impl From<serde_json::Error> for ProctorCliError {
    fn from(e: serde_json::Error) -> Self {
        ProctorCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ProctorCliError> for CliError {
    fn from(e: ProctorCliError) -> Self {
        match e {
            ProctorCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ProctorCliError::Proctor(ProctorError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'proctor config' to see the default configuration".to_string()),
            },
            ProctorCliError::Proctor(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(format!("Ensure input matches the {INPUT_SCHEMA} schema")),
            },
            ProctorCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ProctorCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input is not empty".to_string()),
            },
            ProctorCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{count} records failed validation"),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            ProctorCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    schema: String,
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    ordered: bool,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    kind: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
