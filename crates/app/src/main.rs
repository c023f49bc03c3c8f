mod config;
mod pipeline;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "xritrx")]
#[command(about = "GOES LRIT/HRIT baseband receiver and frame decoder")]
struct Cli {
    /// Print debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available radios and their SoapySDR descriptions
    Probe,
    /// Start the receive pipeline
    Tune {
        /// Read IQ from a text file of "re im" float pairs instead of a radio
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn probe() {
    #[cfg(feature = "soapysdr")]
    {
        match xrit_sdr::soapy::list_devices() {
            Ok(devices) if devices.is_empty() => eprintln!("  (no SDR devices found)"),
            Ok(devices) => {
                for dev in &devices {
                    eprintln!("  soapy-{} driver={} ({})", dev.index, dev.driver, dev.label);
                }
            }
            Err(e) => eprintln!("error listing SoapySDR devices: {}", e),
        }
    }
    #[cfg(not(feature = "soapysdr"))]
    {
        eprintln!("built without SoapySDR support; rebuild with --features soapysdr");
    }
}

fn main() {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    log::info!("starting xritrx");

    match cli.command {
        Command::Probe => probe(),
        Command::Tune { file } => {
            let config = match config::load() {
                Ok(config) => config,
                Err(e) => {
                    log::error!("could not load configuration: {}", e);
                    std::process::exit(1);
                }
            };

            if let Err(e) = pipeline::run_tune(&config, file.as_deref()) {
                log::error!("{}", e);
                std::process::exit(1);
            }
        }
    }
}
