// NumLang compiler CLI
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use numlangc::analysis::analyze_program;
use numlangc::options::{AnalysisOptions, ErrorMethod, RangeMethod};
use numlangc::precision::Precision;
use numlangc::rational::RoundDir;
use numlangc::resolve::parse_kernels;

#[derive(Parser)]
#[command(name = "nlc")]
#[command(version = "0.1.0")]
#[command(about = "NumLang roundoff-error analyzer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the roundoff error of every kernel in a source file
    Analyze {
        /// Input NumLang source file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Range domain (interval, affine or smt)
        #[arg(long, default_value = "interval")]
        range_method: RangeMethod,

        /// Error domain (interval or affine)
        #[arg(long, default_value = "affine")]
        error_method: ErrorMethod,

        /// Uniform precision (f32, f64, dd or fixed<bits>)
        #[arg(long, default_value = "f64")]
        precision: Precision,

        /// JSON file mapping variable names to precisions
        #[arg(long, value_name = "FILE")]
        mixed_precision: Option<PathBuf>,

        /// Disable tracking of user-declared initial errors
        #[arg(long)]
        no_initial_errors: bool,

        /// Disable per-operation roundoff accounting
        #[arg(long)]
        no_roundoff: bool,

        /// Maximum input-domain bisection depth on recoverable failures
        #[arg(long, default_value_t = 2)]
        subdiv: u32,

        /// Emit results as JSON instead of one line per function
        #[arg(long)]
        json: bool,
    },

    /// Parse and resolve a source file without analyzing it
    Check {
        /// Input NumLang source file
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Check { input } => {
            let source = fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let program = parse_kernels(&source)?;
            println!(
                "{}: {} function(s) ok",
                input.display(),
                program.functions.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze {
            input,
            range_method,
            error_method,
            precision,
            mixed_precision,
            no_initial_errors,
            no_roundoff,
            subdiv,
            json,
        } => {
            let source = fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let program = parse_kernels(&source)?;

            let mixed = mixed_precision
                .map(|path| load_mixed_precision(&path))
                .transpose()?;
            let options = AnalysisOptions {
                range_method,
                error_method,
                precision,
                constants_precision: None,
                mixed_precision: mixed,
                track_initial: !no_initial_errors,
                track_roundoff: !no_roundoff,
                subdiv_depth: subdiv,
            };

            let results = analyze_program(&program, &options);
            let mut failed = false;
            if json {
                let rendered: Vec<serde_json::Value> = results
                    .iter()
                    .map(|r| match r {
                        Ok(a) => serde_json::json!({
                            "name": a.name,
                            "absError": a.abs_error.to_scientific(17, RoundDir::Ceil),
                            "range": {
                                "lo": a.range.lo.to_f64_down(),
                                "hi": a.range.hi.to_f64_up(),
                            },
                            "relError": a.rel_error.as_ref()
                                .map(|r| r.to_scientific(4, RoundDir::Ceil)),
                            "warnings": a.warnings.iter()
                                .map(|w| w.to_string()).collect::<Vec<_>>(),
                        }),
                        Err(e) => {
                            failed = true;
                            serde_json::json!({ "error": e.to_string() })
                        }
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rendered)?);
            } else {
                for result in &results {
                    match result {
                        Ok(a) => println!("{a}"),
                        Err(e) => {
                            failed = true;
                            eprintln!("error: {e}");
                        }
                    }
                }
            }
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

/// Load `{ "variable": "precision", ... }` from a JSON file.
fn load_mixed_precision(path: &Path) -> Result<HashMap<String, Precision>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let raw: HashMap<String, String> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    raw.into_iter()
        .map(|(name, p)| {
            let precision = p
                .parse::<Precision>()
                .with_context(|| format!("variable `{name}`"))?;
            Ok((name, precision))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn loads_a_mixed_precision_map() {
        let file = write_temp(r#"{ "x": "f32", "t1": "dd", "acc": "fixed16" }"#);
        let map = load_mixed_precision(file.path()).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["x"], Precision::Float32);
        assert_eq!(map["t1"], Precision::DoubleDouble);
        assert_eq!(map["acc"], Precision::Fixed(16));
    }

    #[test]
    fn rejects_an_unknown_precision_name() {
        let file = write_temp(r#"{ "x": "f16" }"#);
        let err = load_mixed_precision(file.path()).unwrap_err();
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn rejects_malformed_json() {
        let file = write_temp("not json");
        assert!(load_mixed_precision(file.path()).is_err());
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = load_mixed_precision(Path::new("/nonexistent/mixed.json")).unwrap_err();
        assert!(err.to_string().contains("mixed.json"));
    }
}
