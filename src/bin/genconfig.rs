use anyhow::Context;
use clap::Parser;
use operator::{
    interconnect_controller::{normalize, Interconnect},
    qdrouterd_config,
};

/// Render the qdrouterd configuration for an Interconnect manifest
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    // Interconnect manifest (YAML)
    #[arg(short, long)]
    input: String,
    // Fill defaults as if cert-manager were installed
    #[arg(long)]
    cert_manager: bool,
    // Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let manifest = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input))?;
    let mut ic: Interconnect = serde_yaml::from_str(&manifest)
        .with_context(|| format!("parsing {}", args.input))?;
    normalize(&mut ic.spec, args.cert_manager);
    let config = qdrouterd_config::render(&ic.spec);
    match args.output {
        Some(output) => std::fs::write(output, config)?,
        None => print!("{config}"),
    }
    Ok(())
}
