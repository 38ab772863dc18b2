//! fwrule - firewall rule checker
//!
//! Command-line front end for the rule language library: parse rule text,
//! validate rules and payloads, and print their canonical forms.
//!
//! # Usage
//!
//! ```bash
//! fwrule parse 'FROM any TO all vms ALLOW tcp PORT 80'   # Parse tree as JSON
//! fwrule check 'FROM any TO tag web ALLOW tcp PORT 80'   # Serialized rule
//! fwrule check --payload rule.json                       # Validate a payload file
//! fwrule check --payload - < rule.json                   # ... or stdin
//! fwrule raw 'FROM any TO all vms BLOCK udp PORT 53'     # Structured view
//! fwrule text 'from any to all vms allow tcp port 80'    # Canonical text
//! fwrule -vv --config options.json check '...'           # Debug logging, custom options
//! ```

use clap::{Parser, Subcommand};
use fwrule::{Error, Rule, RuleOptions, RulePayload, ValidationErrors};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "fwrule")]
#[command(about = "Parse and validate SmartOS firewall rules", long_about = None)]
struct Cli {
    /// JSON file with rule options (enforce_global, max_version, enforce_subnet_mask)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the parse tree of a rule as JSON
    Parse {
        /// Rule text
        rule: String,
    },
    /// Validate a rule and print its serialized form
    Check {
        /// Rule text
        #[arg(required_unless_present = "payload", conflicts_with = "payload")]
        rule: Option<String>,
        /// JSON rule payload file, `-` for stdin
        #[arg(short, long, value_name = "FILE")]
        payload: Option<PathBuf>,
    },
    /// Print the structured view of a rule
    Raw {
        /// Rule text
        rule: String,
    },
    /// Print the canonical text of a rule
    Text {
        /// Rule text
        rule: String,
    },
}

/// Failure of a CLI command, reported one line per problem
enum Failure {
    Single(Error),
    Validation(ValidationErrors),
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::Single(error)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(error: serde_json::Error) -> Self {
        Failure::Single(error.into())
    }
}

impl From<ValidationErrors> for Failure {
    fn from(errors: ValidationErrors) -> Self {
        Failure::Validation(errors)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(Failure::Single(error)) => {
            report(&error);
            ExitCode::FAILURE
        }
        Err(Failure::Validation(errors)) => {
            for error in &errors {
                report(error);
            }
            ExitCode::FAILURE
        }
    }
}

fn report(error: &Error) {
    match error.field() {
        Some(field) => eprintln!("{field}: {error}"),
        None => eprintln!("error: {error}"),
    }
}

fn run(cli: Cli) -> Result<String, Failure> {
    let options = match &cli.config {
        Some(path) => fwrule::load_options(path)?,
        None => RuleOptions::default(),
    };

    let output = match cli.command {
        Commands::Parse { rule } => {
            let parsed = fwrule::parse(&rule, &options.parse_options())?;
            serde_json::to_string_pretty(&parsed)?
        }
        Commands::Check { rule, payload } => {
            let payload = match (rule, payload) {
                (_, Some(path)) => read_payload(&path)?,
                (Some(rule), None) => RulePayload::new(rule),
                (None, None) => RulePayload::default(),
            };
            let rule = Rule::create(&payload, &options)?;
            serde_json::to_string_pretty(&rule.serialize(None))?
        }
        Commands::Raw { rule } => {
            let rule = Rule::create(&RulePayload::new(rule), &options)?;
            serde_json::to_string_pretty(&rule.raw())?
        }
        Commands::Text { rule } => Rule::create(&RulePayload::new(rule), &options)?.text(),
    };

    Ok(output)
}

fn read_payload(path: &Path) -> Result<RulePayload, Error> {
    let json = if path == Path::new("-") {
        let mut json = String::new();
        std::io::stdin().read_to_string(&mut json)?;
        json
    } else {
        std::fs::read_to_string(path)?
    };

    Ok(serde_json::from_str(&json)?)
}
