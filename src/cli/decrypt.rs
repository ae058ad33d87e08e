use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use super::{flag_value, read_input};
use crate::core::config::AppConfig;
use crate::core::crypto::{self, decode_records, envelope_json, parse_envelope};
use crate::core::sql::prepare_script;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CryptArgs {
    pub input: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub repair: bool,
    pub wrapped: bool,
}

pub(crate) fn parse_crypt_args(args: &[String]) -> Result<CryptArgs> {
    let mut parsed = CryptArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                parsed.input = Some(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            "--passphrase" | "-p" => {
                parsed.passphrase = Some(flag_value(args, i)?);
                i += 2;
            }
            "--repair" => {
                parsed.repair = true;
                i += 1;
            }
            "--wrapped" => {
                parsed.wrapped = true;
                i += 1;
            }
            other => return Err(anyhow!("unexpected argument '{}'", other)),
        }
    }
    Ok(parsed)
}

fn passphrase(args: &CryptArgs, config: &AppConfig) -> Result<String> {
    args.passphrase
        .clone()
        .filter(|p| !p.is_empty())
        .or_else(|| config.passphrase())
        .ok_or_else(|| anyhow!("{}", crypto::DecryptError::MissingPassphrase))
}

/// Decrypt an envelope document and print the script on stdout.
pub(crate) fn decrypt_document(document: &str, passphrase: &str, repair: bool) -> Result<String> {
    let value: serde_json::Value =
        serde_json::from_str(document).context("input is not valid JSON")?;
    let records = parse_envelope(value)?;
    let items = decode_records(&records)?;
    let script = crypto::decrypt(&items, passphrase)?;
    Ok(if repair {
        prepare_script(&script).sql
    } else {
        script
    })
}

pub fn run_decrypt_command(config: &AppConfig, args: &[String]) -> Result<()> {
    let args = parse_crypt_args(args)?;
    let input = args
        .input
        .as_deref()
        .ok_or_else(|| anyhow!("decrypt requires --input FILE"))?;
    let passphrase = passphrase(&args, config)?;
    let script = decrypt_document(&read_input(input)?, &passphrase, args.repair)?;
    println!("{}", script);
    Ok(())
}

pub fn run_encrypt_command(config: &AppConfig, args: &[String]) -> Result<()> {
    let args = parse_crypt_args(args)?;
    let input = args
        .input
        .as_deref()
        .ok_or_else(|| anyhow!("encrypt requires --input FILE"))?;
    let passphrase = passphrase(&args, config)?;
    let item = crypto::encrypt(&read_input(input)?, &passphrase)?;
    let document = serde_json::to_string_pretty(&envelope_json(&[item], args.wrapped))?;
    println!("{}", document);
    Ok(())
}
