//! GigE camera listing and address configuration

use anyhow::Result;
use camtopo_tools::gige_config::{self, Args, Command, HEADER, USAGE};
use camtopo_tools::{load_config, logging};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::info;

fn malformed(reason: &dyn std::fmt::Display) -> ! {
    eprintln!("error: {}", reason);
    print!("\n{}\n\n", USAGE);
    std::process::exit(-1);
}

fn run(args: &Args, command: &Command) -> Result<()> {
    let config = load_config(&args.config)?;
    logging::init(args.log_level.as_deref().unwrap_or(&config.logging.level))?;
    info!("camtopo gige-config v{}", env!("CARGO_PKG_VERSION"));

    let registry = config.open_registry()?;
    let result = gige_config::execute(&registry, command, &mut std::io::stdout().lock());
    let released = registry.release();
    result?;
    released?;
    Ok(())
}

fn main() {
    println!("\n{}\n", HEADER);

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => malformed(&e.kind()),
    };
    let command = match args.command() {
        Ok(command) => command,
        Err(e) => malformed(&e),
    };

    if let Err(e) = run(&args, &command) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
