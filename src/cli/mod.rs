mod decrypt;
mod exec;
mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use console::style;

use crate::core::config::{self, AppConfig};
use crate::core::database::{DatabaseEngine, SqliteBackend};
use crate::core::endpoint::EndpointClient;
use crate::core::pipeline::TriggerPipeline;
use crate::core::terminal::{self, GuideSection, print_check, print_status};
use crate::logging;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Pipeline")
        .command("run [--passphrase P] [--sql-out FILE]", "Fetch, decrypt and install the trigger")
        .command("probe", "Check database and endpoint readiness")
        .print();

    GuideSection::new("Tools")
        .command("decrypt --input FILE [--passphrase P] [--repair]", "Decrypt an envelope JSON file")
        .command("encrypt --input FILE [--passphrase P] [--wrapped]", "Encrypt a SQL file into an envelope")
        .command("exec --file FILE", "Prepare and execute a local SQL script")
        .command("config", "Show the resolved configuration")
        .print();

    GuideSection::new("Global flags")
        .command("--config FILE", "Use FILE instead of <data dir>/config.toml")
        .command("--verbose, -v", "Log at debug level")
        .note("Data dir: $TRIGGER_UPDATER_DATA_DIR or ~/.trigger-updater")
        .note("Passphrase: --passphrase, $TRIGGER_UPDATER_PASSPHRASE or [decrypt] passphrase")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("trigger-updater").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct GlobalFlags {
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

/// Strip global flags from `args` (program name excluded), wherever they
/// appear, and return them with the remaining arguments.
pub(crate) fn parse_global_flags(args: &[String]) -> Result<(GlobalFlags, Vec<String>)> {
    let mut flags = GlobalFlags::default();
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    return Err(anyhow!("--config requires a file path"));
                }
            }
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            _ => {
                rest.push(args[i].clone());
                i += 1;
            }
        }
    }
    Ok((flags, rest))
}

/// Value following the flag at `i`, or an error naming the flag.
pub(crate) fn flag_value(args: &[String], i: usize) -> Result<String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| anyhow!("{} requires a value", args[i]))
}

pub(crate) fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub(crate) fn build_engine(config: &AppConfig) -> Result<DatabaseEngine> {
    let path = config.database_path()?;
    let (probe, execute) = config.database_timeouts();
    Ok(DatabaseEngine::new(Arc::new(SqliteBackend::new(path))).with_timeouts(probe, execute))
}

pub(crate) fn build_endpoint(config: &AppConfig) -> Result<EndpointClient> {
    let url = config.endpoint_url()?;
    let (probe, fetch) = config.endpoint_timeouts();
    let client = EndpointClient::new(url, &config.license_identity(), &config.endpoint.user_agent)?;
    Ok(client.with_timeouts(probe, fetch))
}

pub(crate) fn build_pipeline(config: &AppConfig) -> Result<TriggerPipeline> {
    Ok(TriggerPipeline::new(
        Arc::new(build_endpoint(config)?),
        Arc::new(build_engine(config)?),
        config.passphrase(),
    ))
}

async fn run_probe_command(config: &AppConfig) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let (db, endpoint) = pipeline.check_readiness().await;
    println!();
    for probe in [&db, &endpoint] {
        print_check(probe.target.as_str(), probe.ok, &probe.detail);
    }
    println!();
    if db.ok && endpoint.ok {
        terminal::print_success("Ready to update triggers");
        Ok(())
    } else {
        Err(anyhow!("not ready: fix the failed checks above"))
    }
}

fn run_config_command(config: &AppConfig, data_dir: &Path, config_path: &Path) -> Result<()> {
    print_status("Data dir", &data_dir.display().to_string());
    print_status("Config file", &config_path.display().to_string());
    let rendered = toml::to_string_pretty(&config.masked()).context("failed to render config")?;
    println!("\n{}", rendered);
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (flags, rest) = parse_global_flags(&args)?;
    let command = rest.first().map(String::as_str).unwrap_or("help");

    if matches!(command, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let data_dir = config::resolve_data_dir()?;
    logging::init(flags.verbose, Some(&data_dir.join("logs")))?;

    let config_path = flags
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join(config::CONFIG_FILE));
    let config = AppConfig::load(&config_path)?;
    let sub_args = &rest[1..];

    match command {
        "run" => run::run_trigger_command(&config, sub_args).await,
        "probe" => run_probe_command(&config).await,
        "decrypt" => decrypt::run_decrypt_command(&config, sub_args),
        "encrypt" => decrypt::run_encrypt_command(&config, sub_args),
        "exec" => exec::run_exec_command(&config, sub_args).await,
        "config" => run_config_command(&config, &data_dir, &config_path),
        other => {
            print_help();
            Err(anyhow!("unknown command '{}'", other))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn global_flags_are_removed_wherever_they_appear() {
        let (flags, rest) =
            parse_global_flags(&args(&["run", "--verbose", "--config", "/tmp/c.toml", "--sql-out", "x.sql"]))
                .unwrap();
        assert!(flags.verbose);
        assert_eq!(flags.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(rest, args(&["run", "--sql-out", "x.sql"]));
    }

    #[test]
    fn config_flag_requires_a_value() {
        assert!(parse_global_flags(&args(&["probe", "--config"])).is_err());
    }

    #[test]
    fn flag_value_reports_missing_value() {
        let a = args(&["--input"]);
        let err = flag_value(&a, 0).unwrap_err();
        assert!(err.to_string().contains("--input"));
    }

    #[test]
    fn pipeline_needs_url_and_database() {
        let mut config = AppConfig::default();
        assert!(build_pipeline(&config).is_err());
        config.endpoint.url = Some("http://127.0.0.1:9/trigger".to_string());
        assert!(build_pipeline(&config).is_err());
        config.database.path = Some(PathBuf::from("/nonexistent/shop.db"));
        assert!(build_pipeline(&config).is_ok());
    }
}
