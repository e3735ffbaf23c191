//! hemirt - inspect classes, search paths and saved objects

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hemirt::codec::FileSource;
use hemirt::objects::dump_object;
use hemirt::paths::PathGroup;
use hemirt::{Config, Runtime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Object runtime inspection tool
#[derive(Parser, Debug)]
#[command(name = "hemirt", version, about = "Inspect an hemirt object runtime")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the class tree
    Classes {
        /// Class specs to load first, e.g. "Hemi(Slider)@sliders"
        #[arg(long = "load")]
        load: Vec<String>,
    },
    /// Find a file in a search-path group (data, fonts, temp)
    Find { group: PathGroup, file: String },
    /// Decode a saved object file and print it as JSON
    Dump { file: PathBuf },
}

fn run(rt: &Runtime, command: Command) -> Result<()> {
    match command {
        Command::Classes { load } => {
            for spec in &load {
                rt.load_class(spec)
                    .with_context(|| format!("loading class {}", spec))?;
            }
            for (depth, class) in rt.class_tree() {
                let module = if class.is_loaded_from_module() { " [module]" } else { "" };
                println!(
                    "{:indent$}{} v{}{}",
                    "",
                    class.name(),
                    class.version(),
                    module,
                    indent = depth * 2
                );
            }
        }
        Command::Find { group, file } => {
            let path = rt.find_file(group, &file)?;
            println!("{}", path.display());
        }
        Command::Dump { file } => {
            let mut ds = FileSource::open(&file, rt.codec())
                .with_context(|| format!("opening {}", file.display()))?;
            let value = dump_object(&mut ds)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hemirt=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("loading configuration")?;
    let rt = Runtime::new(config)?;

    if let Err(e) = run(&rt, args.command) {
        match rt.last_error() {
            Some(last) => eprintln!("hemirt: {} ({})", last.message, last.code),
            None => eprintln!("hemirt: {:#}", e),
        }
        rt.shutdown();
        std::process::exit(1);
    }
    rt.shutdown();
    Ok(())
}
