use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use setconv_core::{
    load_repository, run, ConverterSettings, OriginModel, OutputLock, TargetModel,
};

#[derive(Debug, Parser)]
#[command(name = "setconv", version, about = "Convert KORG Pa SET archives to lower-end models")]
struct Args {
    /// SET archive (.zip) or an extracted SET directory.
    #[arg(long, required_unless_present = "list_mappings")]
    input: Option<PathBuf>,

    /// Destination archive. Defaults to NEW_SET_<TARGET>.zip next to the input.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "PA4X")]
    origin: OriginModel,

    #[arg(long, required_unless_present = "list_mappings")]
    target: Option<TargetModel>,

    /// Extra mapping dataset (JSON) overlaid on the built-in one.
    #[arg(long, value_name = "JSON")]
    mappings: Option<PathBuf>,

    /// Re-encoding worker threads (0 = one per CPU).
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Print the conversion result as JSON instead of the report.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Print every registered mapping set and exit.
    #[arg(long, default_value_t = false)]
    list_mappings: bool,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let (input, target) = match (args.input, args.target) {
        (Some(input), Some(target)) if !args.list_mappings => (input, target),
        _ => {
            let mut settings = ConverterSettings::new(
                args.origin,
                TargetModel::Pa3x,
                PathBuf::new(),
                PathBuf::new(),
            );
            settings.mappings_path = args.mappings;
            match load_repository(&settings) {
                Ok(repository) => print!("{}", repository.describe()),
                Err(err) => {
                    eprintln!("Error: {err}");
                    std::process::exit(1);
                }
            }
            return;
        }
    };

    let output = args
        .output
        .unwrap_or_else(|| ConverterSettings::default_output_path(&input, target));

    let mut settings = ConverterSettings::new(args.origin, target, input, output);
    settings.mappings_path = args.mappings;
    settings.reencode_threads = args.threads;
    settings.debug = args.debug;

    let _lock = match OutputLock::try_acquire(&settings.output_path) {
        Ok(lock) => lock,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    match run(settings) {
        Ok(result) => {
            if args.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("Error: {err}");
                        std::process::exit(1);
                    }
                }
            } else {
                println!("{}", result.report);
                println!();
                println!("Output: {}", result.output_archive_path.display());
            }
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
