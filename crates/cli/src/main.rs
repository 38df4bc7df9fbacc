mod config;
mod serve;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use labseq_core::{Catalog, DeviceTypeResolver, SequencePreview, TestCatalogEntry};
use labseq_storage::MemoryStorage;
use tracing_subscriber::EnvFilter;

use crate::config::{FileConfig, Overrides, ServeSettings};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Lab device test sequencer.
#[derive(Parser)]
#[command(name = "labseq", version, about = "Lab device test sequencer")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log filter (e.g. `debug`, `labseq_core=trace`); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Path to a labseq.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on [env: LABSEQ_PORT] [default: 8080]
        #[arg(long)]
        port: Option<u16>,
        /// Lab-data JSON file to seed the store from [env: LABSEQ_DATA]
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Print the device type derived from each serial number
    Resolve {
        /// Serial numbers to resolve
        #[arg(required = true)]
        serials: Vec<String>,
    },

    /// Check every test sequence in a lab-data file
    Validate {
        /// Path to the lab-data JSON file
        data: PathBuf,
    },

    /// Show the enriched test sequence of a device type
    Preview {
        /// Path to the lab-data JSON file
        data: PathBuf,
        /// Device type to preview
        device_type: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let serving = matches!(cli.command, Commands::Serve { .. });
    init_tracing(cli.log_level.as_deref(), serving);

    let file_config = match cli.config.as_deref().map(FileConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            report_error(&e.to_string(), cli.output, cli.quiet);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve { port, data } => {
            cmd_serve(&file_config, Overrides { port, data }, cli.output, cli.quiet);
        }
        Commands::Resolve { serials } => {
            cmd_resolve(&file_config.resolver(), &serials, cli.output, cli.quiet);
        }
        Commands::Validate { data } => {
            cmd_validate(&data, cli.output, cli.quiet);
        }
        Commands::Preview { data, device_type } => {
            cmd_preview(&data, &device_type, cli.output, cli.quiet);
        }
    }
}

/// Install the global `tracing` subscriber, writing to stderr.
///
/// `--log-level` wins over `RUST_LOG`; without either, `serve` logs at
/// `info` and the one-shot commands at `warn`.
fn init_tracing(log_level: Option<&str>, serving: bool) {
    let default = if serving { "info" } else { "warn" };
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_serve(file_config: &FileConfig, flags: Overrides, output: OutputFormat, quiet: bool) {
    let env = match Overrides::from_env() {
        Ok(env) => env,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };
    let settings = ServeSettings::merge(file_config, env, flags);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output, quiet);
            process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(serve::start_server(settings)) {
        report_error(&format!("Server error: {}", e), output, quiet);
        process::exit(1);
    }
}

fn cmd_resolve(resolver: &DeviceTypeResolver, serials: &[String], output: OutputFormat, quiet: bool) {
    let resolved: Vec<(&str, Option<String>)> = serials
        .iter()
        .map(|s| (s.as_str(), resolver.resolve(s)))
        .collect();
    let all_resolved = resolved.iter().all(|(_, t)| t.is_some());

    match output {
        OutputFormat::Text => {
            for (serial, device_type) in &resolved {
                match device_type {
                    Some(t) => {
                        if !quiet {
                            println!("{}\t{}", serial, t)
                        }
                    }
                    None => report_error(
                        &format!("cannot determine device type from serial number: {}", serial),
                        output,
                        quiet,
                    ),
                }
            }
        }
        OutputFormat::Json => {
            let items: Vec<serde_json::Value> = resolved
                .iter()
                .map(|(serial, device_type)| {
                    serde_json::json!({
                        "serial_number": serial,
                        "device_type": device_type,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&items).unwrap_or_default()
            );
        }
    }

    if !all_resolved {
        process::exit(1);
    }
}

fn cmd_validate(data_path: &Path, output: OutputFormat, quiet: bool) {
    let data = match config::load_lab_data(data_path) {
        Ok(data) => data,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    let results: Vec<(String, Result<TestCatalogEntry, String>)> = data
        .device_test_sequences
        .iter()
        .map(|(device_type, raw)| {
            let entry = TestCatalogEntry::parse(device_type, raw).map_err(|e| e.to_string());
            (device_type.clone(), entry)
        })
        .collect();
    let errors: Vec<&String> = results.iter().filter_map(|(_, r)| r.as_ref().err()).collect();

    match output {
        OutputFormat::Text => {
            for (device_type, result) in &results {
                match result {
                    Ok(entry) => {
                        if !quiet {
                            println!(
                                "{}: {} tests ({} required)",
                                device_type,
                                entry.sequence.len(),
                                entry.required_tests().len()
                            );
                        }
                    }
                    Err(e) => {
                        if !quiet {
                            eprintln!("{}", e);
                        }
                    }
                }
            }
            if errors.is_empty() && !quiet {
                println!("valid");
            }
        }
        OutputFormat::Json => {
            let device_types: Vec<serde_json::Value> = results
                .iter()
                .map(|(device_type, result)| match result {
                    Ok(entry) => serde_json::json!({
                        "device_type": device_type,
                        "tests": entry.sequence.len(),
                        "required_tests": entry.required_tests(),
                    }),
                    Err(e) => serde_json::json!({
                        "device_type": device_type,
                        "error": e,
                    }),
                })
                .collect();
            let json = serde_json::json!({
                "valid": errors.is_empty(),
                "device_types": device_types,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&json).unwrap_or_default()
            );
        }
    }

    if !errors.is_empty() {
        process::exit(1);
    }
}

fn cmd_preview(data_path: &Path, device_type: &str, output: OutputFormat, quiet: bool) {
    let data = match config::load_lab_data(data_path) {
        Ok(data) => data,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build();
    let rt = match runtime {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output, quiet);
            process::exit(1);
        }
    };
    let catalog = Catalog::new(Arc::new(MemoryStorage::from_lab_data(data)));
    let preview = match rt.block_on(catalog.preview(device_type)) {
        Ok(preview) => preview,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&preview).unwrap_or_default()
        ),
        OutputFormat::Text => {
            if !quiet {
                print_preview(&preview);
            }
        }
    }
}

fn print_preview(preview: &SequencePreview) {
    println!("{}", preview.device_type);
    for test in &preview.tests {
        println!(
            "  {:>3}  {:<12} {:<30} {:>4} min  {}",
            test.sequence_order,
            test.test_id,
            test.test_name,
            test.estimated_duration_minutes,
            if test.is_required {
                "required"
            } else {
                "optional"
            }
        );
    }
    let s = &preview.summary;
    println!(
        "{} tests ({} required, {} optional), {} + {} min, ~{} h",
        s.total_tests,
        s.required_tests,
        s.optional_tests,
        s.total_required_time_minutes,
        s.total_optional_time_minutes,
        s.estimated_total_hours
    );
}

/// Report an error to stderr in the selected output format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
