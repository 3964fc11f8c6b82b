use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use log::{debug, error};
use rsg::{DEFAULT_START, Expander, Grammar, GrammarConfig, GrammarError, Sentence};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Sample grammar written by `rsg example`
const EXAMPLE_GRAMMAR: &str = include_str!("../grammars/poem.g");

const VERSION_RULE: &str = "---------------------------";

/// Random sentence generator
#[derive(Parser)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Path to the grammar file
    #[arg(help = "Path to the grammar text file")]
    grammar_file: Option<PathBuf>,

    /// Nonterminal to expand
    #[arg(short, long, value_name = "SYMBOL", default_value = DEFAULT_START)]
    start: String,

    /// Number of versions to generate
    #[arg(short = 'n', long, default_value_t = 3)]
    count: usize,

    /// JSON file with expansion limits
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum number of nested nonterminals
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Maximum number of nonterminal expansions per version
    #[arg(long, value_name = "N")]
    max_expansions: Option<usize>,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample grammar file
    Example {
        /// Output file path
        #[arg(help = "Output file path")]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct Report<'a> {
    file: String,
    definitions: usize,
    start: &'a str,
    versions: Vec<Version>,
}

#[derive(Serialize)]
struct Version {
    version: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens: Option<Sentence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors share exit code 1 with a missing grammar file.
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    if let Some(Commands::Example { output }) = &cli.command {
        let output = output
            .clone()
            .unwrap_or_else(|| PathBuf::from("example_grammar.g"));
        return match write_example(&output) {
            Ok(()) => {
                println!("Created example grammar at: {}", output.display());
                ExitCode::SUCCESS
            }
            Err(err) => fail(&err),
        };
    }

    let Some(grammar_file) = &cli.grammar_file else {
        eprintln!("You need to specify the name of a grammar file.");
        eprintln!("Usage: rsg <path to grammar text file>");
        return ExitCode::from(1);
    };

    match run(&cli, grammar_file) {
        Ok(code) => code,
        Err(err) => fail(&err),
    }
}

fn run(cli: &Cli, grammar_file: &Path) -> rsg::Result<ExitCode> {
    let config = load_config(cli)?;
    debug!("expansion limits: {:?}", config);

    let grammar = Grammar::from_file_with_config(grammar_file, config)?;
    let expander = Expander::new(&grammar);
    let mut failures = 0;

    if cli.json {
        let results = expander.generate_many(&cli.start, cli.count);
        failures = results.iter().filter(|result| result.is_err()).count();
        let versions = results
            .into_iter()
            .enumerate()
            .map(|(i, result)| match result {
                Ok(sentence) => Version {
                    version: i + 1,
                    tokens: Some(sentence),
                    error: None,
                },
                Err(err) => Version {
                    version: i + 1,
                    tokens: None,
                    error: Some(err.to_string()),
                },
            })
            .collect();
        let report = Report {
            file: grammar_file.display().to_string(),
            definitions: grammar.len(),
            start: &cli.start,
            versions,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "The grammar file called \"{}\" contains {} definitions.",
            grammar_file.display(),
            grammar.len()
        );
        for version in 1..=cli.count {
            match expander.generate(&cli.start) {
                Ok(sentence) => {
                    println!("Version #{}: {}", version, VERSION_RULE);
                    println!("{}", sentence);
                    println!();
                }
                Err(err) => {
                    failures += 1;
                    error!("version #{} of {} failed", version, cli.start);
                    eprintln!("Version #{}: failed: {}", version, err);
                }
            }
        }
    }

    if failures > 0 {
        Ok(ExitCode::from(4))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Config file first, then command-line overrides
fn load_config(cli: &Cli) -> rsg::Result<GrammarConfig> {
    let mut config = match &cli.config {
        Some(path) => GrammarConfig::from_json_file(path)?,
        None => GrammarConfig::default(),
    };
    if let Some(depth) = cli.max_depth {
        config.max_recursion_depth = depth;
    }
    if let Some(expansions) = cli.max_expansions {
        config.max_expansions = expansions;
    }
    config.validate()?;
    Ok(config)
}

fn write_example(path: &Path) -> rsg::Result<()> {
    fs::write(path, EXAMPLE_GRAMMAR)?;
    Ok(())
}

/// Print a diagnostic and pick the exit code for a load or setup failure
fn fail(err: &GrammarError) -> ExitCode {
    match err {
        GrammarError::GrammarSourceUnreadable { path, source } => {
            debug!("{}: {:?}", path.display(), source.kind());
            if source.kind() == io::ErrorKind::NotFound {
                eprintln!(
                    "Failed to open the file named \"{}\".  Check to ensure the file exists.",
                    path.display()
                );
            } else {
                eprintln!(
                    "Failed to read the file named \"{}\": {}",
                    path.display(),
                    source
                );
            }
            ExitCode::from(2)
        }
        GrammarError::Io(_) => {
            eprintln!("{}", err);
            ExitCode::from(2)
        }
        GrammarError::MalformedGrammar { .. } => {
            eprintln!("{}", err);
            ExitCode::from(3)
        }
        _ => {
            eprintln!("{}", err);
            ExitCode::from(1)
        }
    }
}
