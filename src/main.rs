use clap::Parser;
use env_logger::{Builder, Env, Target};
use locator::cli::Cli;
use locator::config::Config;
use locator::error::Result;
use log::info;
use std::fs;

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Application started with command: {:?}", cli.command);

    locator::app::run(&cli, config)
}

fn setup_logging(cli: &Cli) -> Result<()> {
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));

    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{}] [{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.module_path().unwrap_or("unknown"),
            record.args()
        )
    });

    if let Some(log_path) = &cli.log {
        if let Some(parent_dir) = log_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                fs::create_dir_all(parent_dir)?;
            }
        }
        let log_file = fs::File::create(log_path)?;
        builder.target(Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(Target::Stderr);
    }

    builder
        .try_init()
        .map_err(|e| locator::LocatorError::Other(e.to_string()))?;
    Ok(())
}
