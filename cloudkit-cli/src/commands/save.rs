//! Save a record.

use anyhow::Result;

use super::{print_ack, Session};

/// Run the save-settings command.
pub async fn settings(session: &Session, record: String) -> Result<()> {
    let result = session
        .dispatcher
        .save_settings(&session.handle, record)?
        .await;
    print_ack(&result)
}

/// Run the save-history command.
pub async fn history_item(session: &Session, record: String) -> Result<()> {
    let result = session
        .dispatcher
        .save_history_item(&session.handle, record)?
        .await;
    print_ack(&result)
}

/// Run the save-note command.
pub async fn note(session: &Session, record: String) -> Result<()> {
    let result = session.dispatcher.save_note(&session.handle, record)?.await;
    print_ack(&result)
}
