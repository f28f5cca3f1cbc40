//! Delete a record by id.

use anyhow::Result;

use super::{print_ack, Session};

/// Run the delete-history command.
pub async fn history_item(session: &Session, id: String) -> Result<()> {
    let result = session
        .dispatcher
        .delete_history_item(&session.handle, id)?
        .await;
    print_ack(&result)
}

/// Run the delete-note command.
pub async fn note(session: &Session, id: String) -> Result<()> {
    let result = session.dispatcher.delete_note(&session.handle, id)?.await;
    print_ack(&result)
}
