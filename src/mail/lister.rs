use crate::mail::connector::MailboxSession;

/// Pending (unseen) identifiers, newest first.
///
/// Never fails: a search error is logged and yields an empty list, so the
/// run ends with nothing processed.
pub async fn list_pending(session: &mut dyn MailboxSession) -> Vec<String> {
    match session.search_unseen().await {
        Ok(mut uids) => {
            uids.reverse();
            tracing::debug!("{} unseen message(s) pending", uids.len());
            uids
        }
        Err(err) => {
            tracing::warn!("Listing unseen messages failed, skipping run: {}", err);
            Vec::new()
        }
    }
}
