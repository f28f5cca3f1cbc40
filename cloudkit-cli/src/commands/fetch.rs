//! Fetch records and print them as JSON.

use anyhow::{Context, Result};
use serde_json::Value;

use super::Session;

/// Run the fetch-settings command.
pub async fn settings(session: &Session) -> Result<()> {
    let record = session
        .dispatcher
        .fetch_settings(&session.handle)?
        .await
        .context("Failed to fetch settings")?;

    match record {
        Some(json) => println!("{}", pretty(&json)?),
        None => println!("null"),
    }
    Ok(())
}

/// Run the fetch-history command.
pub async fn history(session: &Session) -> Result<()> {
    let records = session
        .dispatcher
        .fetch_all_history(&session.handle)?
        .await
        .context("Failed to fetch history")?;
    print_records(&records)
}

/// Run the fetch-notes command.
pub async fn notes(session: &Session) -> Result<()> {
    let records = session
        .dispatcher
        .fetch_all_notes(&session.handle)?
        .await
        .context("Failed to fetch notes")?;
    print_records(&records)
}

fn print_records(records: &[String]) -> Result<()> {
    let values = records
        .iter()
        .map(|record| serde_json::from_str(record))
        .collect::<Result<Vec<Value>, _>>()
        .context("Provider returned a malformed record")?;
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}

fn pretty(json: &str) -> Result<String> {
    let value: Value = serde_json::from_str(json).context("Provider returned malformed JSON")?;
    Ok(serde_json::to_string_pretty(&value)?)
}
