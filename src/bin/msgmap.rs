//! msgmap CLI - extract fields from payment messages and convert them through templates
//!
//! Results are printed to stdout as JSON or rendered text; logs go to stderr.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use msgmap::runtime::{Converter, EngineConfig};
use msgmap::{extraction, MessageFormat, PlaceholderMap, Template, TransformRegistry};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "msgmap")]
#[command(version, about = "Rule-driven field extraction and template mapping for payment messages", long_about = None)]
struct Cli {
    /// Path to the engine configuration
    #[arg(short, long, global = true, env = "MSGMAP_CONFIG", default_value = "msgmap.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract fields from a message
    Extract {
        /// Message file
        input: PathBuf,

        /// Extraction profile from the configuration
        #[arg(short, long, conflicts_with_all = ["rules", "file_type"])]
        profile: Option<String>,

        /// Extraction rule set (JSON file) to use instead of a profile
        #[arg(short, long, requires = "file_type")]
        rules: Option<PathBuf>,

        /// Declared file type when using --rules (MT103, pacs.008, text, xml, ...)
        #[arg(short = 't', long)]
        file_type: Option<String>,
    },

    /// Convert a message with a configured converter
    Convert {
        /// Converter name
        converter: String,

        /// Source message file
        input: PathBuf,

        /// Write the output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the placeholders of a template file
    Placeholders {
        /// Template file
        template: PathBuf,
    },

    /// Render a template from NAME=VALUE pairs
    Render {
        /// Template file
        template: PathBuf,

        /// Placeholder value, repeatable
        #[arg(short = 's', long = "set", value_name = "NAME=VALUE")]
        values: Vec<String>,
    },

    /// Check every rule set and schema in the configuration
    ValidateConfig,
}

fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract { input, profile, rules, file_type } => {
            extract(&cli.config, &input, profile, rules, file_type)
        }
        Commands::Convert { converter, input, output } => {
            convert(&cli.config, &converter, &input, output)
        }
        Commands::Placeholders { template } => list_placeholders(&template),
        Commands::Render { template, values } => render(&template, &values),
        Commands::ValidateConfig => validate_config(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn read(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

fn load_config(path: &Path) -> Result<EngineConfig, String> {
    EngineConfig::load_from_file(path).map_err(|e| e.to_string())
}

fn print_json(value: &serde_json::Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

/// Extract fields with a profile or an ad-hoc rule file
fn extract(
    config: &Path,
    input: &Path,
    profile: Option<String>,
    rules: Option<PathBuf>,
    file_type: Option<String>,
) -> Result<(), String> {
    let raw = read(input)?;
    let filename = input.file_name().and_then(|n| n.to_str());
    let registry = TransformRegistry::with_builtins();

    let (fields, missing) = match (profile, rules, file_type) {
        (Some(name), _, _) => {
            let config = load_config(config)?;
            let profile = config.extraction(&name).map_err(|e| e.to_string())?;
            let fields = profile.extract(&raw, filename, &registry).map_err(|e| e.to_string())?;
            let missing = profile.missing_required(&fields).map_err(|e| e.to_string())?;
            (fields, missing)
        }
        (None, Some(rules), Some(file_type)) => {
            let rules_json = read(&rules)?;
            let format = MessageFormat::detect(&file_type, filename).map_err(|e| e.to_string())?;
            let fields = match format {
                MessageFormat::Text => extraction::extract_text(&raw, &rules_json, &registry),
                MessageFormat::Xml => extraction::extract_xml(&raw, &rules_json, &registry),
            }
            .map_err(|e| e.to_string())?;
            (fields, Vec::new())
        }
        _ => return Err("Either --profile or --rules with --file-type is required".to_string()),
    };

    if !missing.is_empty() {
        tracing::warn!(?missing, "required fields are empty");
    }

    print_json(&serde_json::json!({
        "fields": fields,
        "missing_required": missing,
    }))
}

/// Run a configured converter
fn convert(config: &Path, converter: &str, input: &Path, output: Option<PathBuf>) -> Result<(), String> {
    let config = load_config(config)?;
    let source = read(input)?;
    let registry = TransformRegistry::with_builtins();

    let conversion = Converter::new(&config, &registry)
        .convert(converter, &source)
        .map_err(|e| e.to_string())?;

    match output {
        Some(path) => {
            fs::write(&path, &conversion.output)
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            tracing::info!(path = %path.display(), extension = %conversion.extension, "wrote converted message");
        }
        None => print!("{}", conversion.output),
    }
    Ok(())
}

/// Print a template's placeholder names as a JSON array
fn list_placeholders(template: &Path) -> Result<(), String> {
    let text = read(template)?;
    let names: Vec<String> = msgmap::placeholders(&text).into_iter().collect();
    print_json(&serde_json::json!(names))
}

/// Render a template from NAME=VALUE pairs
fn render(template: &Path, values: &[String]) -> Result<(), String> {
    let text = read(template)?;
    let name = template
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut pairs = PlaceholderMap::new();
    for value in values {
        let (key, val) = value
            .split_once('=')
            .ok_or_else(|| format!("Expected NAME=VALUE, got '{}'", value))?;
        pairs.insert(key.to_string(), val.to_string());
    }

    let template = Template::new(name, "", text);
    print!("{}", template.render_with_values(pairs));
    Ok(())
}

/// Validate the configuration file
fn validate_config(config: &Path) -> Result<(), String> {
    let config = load_config(config)?;
    let problems = config.validate();

    if problems.is_empty() {
        println!(
            "✓ {} extraction profiles, {} file types, {} converters are valid",
            config.extractions.len(),
            config.file_types.len(),
            config.converters.len()
        );
        return Ok(());
    }

    for problem in &problems {
        eprintln!("  ✗ {}", problem);
    }
    Err(format!("{} configuration problem(s)", problems.len()))
}
