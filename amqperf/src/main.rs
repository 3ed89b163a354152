mod cli;
mod config;
mod harness;
mod metrics;

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

fn setup_logger() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    builder
        .format_timestamp_millis()
        .format(|buf, record| {
            let level = buf.default_level_style(record.level()).bold();

            writeln!(
                buf,
                "{} - [{level}{:5}{level:#}] {}:{} - {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or_default(),
                record.line().unwrap_or_default(),
                record.args()
            )
        })
        .init();
}

fn main() -> Result<()> {
    setup_logger();

    let cli = cli::Cli::parse();

    let config = match &cli.config {
        Some(path) => config::parse_config(path).with_context(|| format!("Cannot read config file {}", path))?,
        None => config::Config::default(),
    };

    let params = config
        .connection_parameters(cli.url.as_deref())
        .context("Invalid broker settings")?;

    let recorder = metrics::Recorder::new()?;
    let mut harness = harness::create(cli.command.implementation(), params);

    match &cli.command {
        cli::Command::Publish(args) => harness.publish(args, &recorder)?,
        cli::Command::Altpubcons(args) => harness.alt_pub_cons(args, &recorder)?,
    }

    let report = recorder.report(cli.command.name(), harness.name());

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.log();
    }

    info!("{}: DONE", harness.name());

    Ok(())
}
