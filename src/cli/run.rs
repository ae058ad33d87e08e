use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use console::style;

use super::{build_pipeline, flag_value};
use crate::core::config::AppConfig;
use crate::core::pipeline::PipelineStage;
use crate::core::terminal::{
    print_error, print_info, print_sql, print_step, print_success, print_warn,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunArgs {
    pub passphrase: Option<String>,
    pub sql_out: Option<PathBuf>,
}

pub(crate) fn parse_run_args(args: &[String]) -> Result<RunArgs> {
    let mut parsed = RunArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--passphrase" | "-p" => {
                parsed.passphrase = Some(flag_value(args, i)?);
                i += 2;
            }
            "--sql-out" | "-o" => {
                parsed.sql_out = Some(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            other => return Err(anyhow!("unexpected argument '{}' for run", other)),
        }
    }
    Ok(parsed)
}

pub async fn run_trigger_command(config: &AppConfig, args: &[String]) -> Result<()> {
    let args = parse_run_args(args)?;
    let pipeline = Arc::new(build_pipeline(config)?.with_progress(
        |stage: PipelineStage, message: &str| {
            if !stage.is_terminal() {
                print_step(message);
            }
        },
    ));

    let mut handle = Arc::clone(&pipeline).spawn(args.passphrase.clone())?;
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = tokio::signal::ctrl_c() => {
            // Batches already committed cannot be undone; let the run settle.
            if pipeline.is_running() {
                print_warn(&format!(
                    "Interrupt received during {}, waiting for the run to finish",
                    pipeline.stage().as_str()
                ));
            }
            handle.await
        }
    };
    let result = joined.context("trigger run aborted unexpectedly")?;

    if let (Some(path), Some(sql)) = (&args.sql_out, &result.sql) {
        std::fs::write(path, sql)
            .with_context(|| format!("failed to write SQL to {}", path.display()))?;
        print_info(&format!("SQL written to {}", path.display()));
    }

    if result.success {
        print_success(&result.message);
        println!("  {} {}", style("run id:").dim(), style(&result.run_id).dim());
        return Ok(());
    }

    print_error(&result.message);
    if args.sql_out.is_none()
        && let Some(sql) = &result.sql
    {
        print_sql("Prepared SQL (not executed or partially executed)", sql);
    }
    let kind = result.error_kind.map(|k| k.as_str()).unwrap_or("unexpected");
    Err(anyhow!(
        "trigger update failed at {} ({})",
        result.stage.as_str(),
        kind
    ))
}
