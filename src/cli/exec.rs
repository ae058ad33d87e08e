use std::path::PathBuf;

use anyhow::{Result, anyhow};
use console::style;

use super::{build_engine, flag_value, read_input};
use crate::core::config::AppConfig;
use crate::core::database::ResultSet;
use crate::core::sql::prepare_script;
use crate::core::terminal::{print_error, print_info, print_step, print_success};

pub(crate) fn parse_exec_args(args: &[String]) -> Result<PathBuf> {
    let mut file = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                file = Some(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            other => return Err(anyhow!("unexpected argument '{}' for exec", other)),
        }
    }
    file.ok_or_else(|| anyhow!("exec requires --file FILE"))
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn render_result_set(rs: &ResultSet) -> Vec<String> {
    let mut lines = vec![rs.columns.join(" | ")];
    lines.extend(
        rs.rows
            .iter()
            .map(|row| row.iter().map(render_cell).collect::<Vec<_>>().join(" | ")),
    );
    lines
}

pub async fn run_exec_command(config: &AppConfig, args: &[String]) -> Result<()> {
    let path = parse_exec_args(args)?;
    let prepared = prepare_script(&read_input(&path)?);
    if prepared.batches.is_empty() {
        return Err(anyhow!("{} contains no SQL statements", path.display()));
    }

    let engine = build_engine(config)?;
    print_step(&format!(
        "Executing {} batch(es) on {}",
        prepared.batches.len(),
        engine.describe()
    ));

    match engine.execute(prepared.batches).await {
        Ok(report) => {
            print_success(&report.message());
            if let Some(rs) = &report.result_set {
                for line in render_result_set(rs) {
                    println!("  {}", line);
                }
            }
            Ok(())
        }
        Err(err) => {
            print_error(&err.to_string());
            print_info(&format!(
                "{} Earlier batches were committed.",
                style("Note:").bold()
            ));
            Err(anyhow!("execution failed ({})", err.class().code()))
        }
    }
}
