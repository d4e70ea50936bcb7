use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use symdump::logging::{init_tracing, init_tracing_json};
use symdump::{DumpConfig, Session};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// PE image to disassemble
    image: PathBuf,

    /// Where to write the dump
    #[arg(default_value = "exedump_out.txt")]
    output: PathBuf,

    /// PDB to use instead of searching next to the image
    #[arg(long)]
    pdb: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads for disassembly
    #[arg(short, long)]
    jobs: Option<usize>,

    /// List parameters and locals under each function header
    #[arg(long)]
    list_variables: bool,

    /// Keep sweeping past return instructions
    #[arg(long)]
    no_stop_at_return: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    if args.json_logs {
        init_tracing_json();
    } else {
        init_tracing();
    }

    let mut config = match &args.config {
        Some(path) => DumpConfig::from_file(path)?,
        None => DumpConfig::new(),
    };
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if args.list_variables {
        config.output.list_variables = true;
    }
    if args.no_stop_at_return {
        config.sweep.stop_at_return = false;
    }

    let session = Session::open(&args.image, args.pdb.as_deref(), config)
        .with_context(|| format!("cannot load {}", args.image.display()))?;

    let file = File::create(&args.output)
        .with_context(|| format!("cannot create {}", args.output.display()))?;
    let mut out = BufWriter::new(file);
    let summary = session.run(&mut out)?;

    info!(
        output = %args.output.display(),
        functions = summary.functions,
        "Wrote dump"
    );
    Ok(())
}
