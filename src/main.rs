use clap::{Parser, Subcommand};
use imgport::output::{self, HeaderReport};
use imgport::{config, Session};
use log::{LevelFilter, Log, Metadata, Record};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imgport")]
#[command(about = "Load and save images through a registry of format handlers")]
#[command(long_about = "\
Load and save images through a registry of format handlers

Loaders are found by sniffing the leading bytes of a file, or by suffix for
formats that cannot be sniffed. Savers are found by the suffix of the output
filename. Options for either side go in brackets after the filename:

  imgport copy 'scan.tif[access=sequential]' 'web.jpg[Q=85,keep=icc]'

Run 'imgport formats' to list every handler and 'imgport gen-config' to
generate a documented imgport.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Log debug messages to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load an image and save it in the format of the output suffix
    Copy { input: String, output: String },
    /// Print the header and metadata of images without decoding pixels
    Header {
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// List every registered loader and saver
    Formats,
    /// List the suffixes savers accept
    Suffixes,
    /// Print the loader that would open a file
    FindLoad { filename: String },
    /// Print the saver that would write a filename
    FindSave { filename: String },
    /// Check whether a named loader recognises a file
    IsA { loader: String, filename: String },
    /// Print the flags a loader reports for a file
    Flags { loader: String, filename: String },
    /// Print a stock imgport.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;
    init_thread_pool(&config.processing);
    let session = Session::new(config);
    let registry = session.registry();

    match cli.command {
        Command::Copy { input, output } => {
            let image = session.load_file(&input)?;
            session.save_file(&image, &output)?;
            println!("{input} → {output}");
        }
        Command::Header { files } => {
            let reports = files
                .iter()
                .map(|f| session.load_file(f).map(|image| HeaderReport::new(f, &image)))
                .collect::<Result<Vec<_>, _>>()?;
            if cli.json {
                output::print_json(&reports)?;
            } else {
                for report in &reports {
                    output::print_header(report);
                }
            }
        }
        Command::Formats => {
            let loaders = registry.loaders().iter().map(|e| e.descriptor.as_ref());
            let savers = registry.savers().iter().map(|e| e.descriptor.as_ref());
            if cli.json {
                let all = serde_json::json!({
                    "loaders": loaders.collect::<Vec<_>>(),
                    "savers": savers.collect::<Vec<_>>(),
                });
                output::print_json(&all)?;
            } else {
                output::print_formats(loaders, savers);
            }
        }
        Command::Suffixes => {
            let suffixes = registry.suffixes();
            if cli.json {
                output::print_json(&suffixes)?;
            } else {
                for line in output::format_suffixes(&suffixes) {
                    println!("{}", line);
                }
            }
        }
        Command::FindLoad { filename } => {
            println!("{}", registry.find_load(&filename)?.descriptor.name());
        }
        Command::FindSave { filename } => {
            println!("{}", registry.find_save(&filename)?.descriptor.name());
        }
        Command::IsA { loader, filename } => {
            println!("{}", registry.is_a(&loader, &filename)?);
        }
        Command::Flags { loader, filename } => {
            println!("{}", registry.flags(&loader, &filename)?);
        }
        // printed before the config is read
        Command::GenConfig => {}
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}: {}", record.level().as_str().to_lowercase(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logger(verbose: bool) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        });
    }
}
