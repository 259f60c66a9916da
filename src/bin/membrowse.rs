use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};

use membrowse::{analyze, AnalyzeOptions, CancelToken};

#[derive(Debug, Parser)]
#[command(
    name = "membrowse",
    version,
    about = "Memory analysis for firmware ELF binaries",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Analyze an ELF against its linker scripts and emit a memory report.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// ELF binary to analyze.
    #[arg(value_name = "ELF")]
    elf: PathBuf,

    /// GNU linker scripts, in link order. Without scripts, synthetic
    /// Code/Data regions are derived from the section table.
    #[arg(value_name = "LD")]
    linker_scripts: Vec<PathBuf>,

    /// Define a linker variable, e.g. --def __flash_size__=4096K.
    /// Repeatable.
    #[arg(long = "def", alias = "linker-var", value_name = "VAR=VALUE")]
    defs: Vec<String>,

    /// Skip the DWARF line program (faster, slightly lower source-mapping
    /// coverage).
    #[arg(long)]
    skip_line_program: bool,

    /// Emit the JSON report (default).
    #[arg(long, conflicts_with = "human")]
    json: bool,

    /// Emit a human-readable memory layout table instead of JSON.
    #[arg(long)]
    human: bool,

    /// Write the report to a file instead of stdout.
    #[arg(short = 'o', long = "output", value_name = "OUT")]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze(args) => match run_analyze(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::from(err.exit_code())
            }
        },
    }
}

enum CliError {
    BadDef(String),
    Analysis(membrowse::AnalysisError),
    Write(PathBuf, std::io::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::BadDef(_) => 2,
            Self::Analysis(err) => err.exit_code() as u8,
            Self::Write(..) => 1,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadDef(def) => {
                write!(f, "invalid --def `{def}`: expected VAR=VALUE")
            }
            Self::Analysis(err) => write!(f, "{err}"),
            Self::Write(path, err) => write!(f, "failed to write {}: {err}", path.display()),
        }
    }
}

fn run_analyze(args: AnalyzeArgs) -> Result<(), CliError> {
    let mut var_overrides = BTreeMap::new();
    for def in &args.defs {
        let Some((name, value)) = def.split_once('=') else {
            return Err(CliError::BadDef(def.clone()));
        };
        var_overrides.insert(name.trim().to_string(), value.trim().to_string());
    }

    let opts = AnalyzeOptions {
        var_overrides,
        skip_line_program: args.skip_line_program,
        cancel: CancelToken::new(),
    };

    let report =
        analyze(&args.elf, &args.linker_scripts, &opts).map_err(CliError::Analysis)?;

    // JSON is the default; --json exists so pipelines can be explicit.
    let json_wanted = args.json || !args.human;
    let rendered = if json_wanted {
        let analyzed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        membrowse::report::to_json(&report, &analyzed_at)
    } else {
        membrowse::report::to_human(&report)
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered).map_err(|e| CliError::Write(path.clone(), e))?
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
