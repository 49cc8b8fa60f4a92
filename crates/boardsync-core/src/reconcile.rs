//! Reconciliation: turn an admitted delta into a concrete store mutation.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::board::store::Mutation;
use crate::board::{BoardStore, StoreChange};
use crate::delta::{Delta, DeltaKind};
use crate::error::{SyncError, SyncResult};
use crate::tombstone::Tombstones;

/// Apply an admitted delta to the store.
///
/// Returns the change that subscribers were notified of, `Ok(None)` when the
/// delta was valid but already reflected, and a stale reference error when it
/// names a list or card the store does not know.
pub fn reconcile(
    delta: &Delta,
    store: &mut BoardStore,
    tombstones: &mut Tombstones,
    now: DateTime<Utc>,
) -> SyncResult<Option<StoreChange>> {
    if delta.is_removal() {
        tombstones.bury(delta.card_id(), now);
    }
    match plan(delta, store)? {
        Some(mutation) => store.apply(mutation),
        None => Ok(None),
    }
}

/// Decide which mutation, if any, `delta` calls for given the current store.
pub(crate) fn plan(delta: &Delta, store: &BoardStore) -> SyncResult<Option<Mutation>> {
    let mutation = match &delta.kind {
        DeltaKind::Created { card, index } => {
            if store.contains(&card.id) {
                return Ok(None);
            }
            Mutation::Insert {
                card: card.clone(),
                index: *index,
            }
        }
        DeltaKind::Updated { card_id, fields } => {
            if !store.contains(card_id) {
                return Err(SyncError::stale_card(card_id));
            }
            Mutation::Patch {
                card_id: card_id.clone(),
                patch: fields.clone(),
            }
        }
        DeltaKind::Moved {
            card_id,
            from_list_id,
            to_list_id,
            index,
            fields,
        } => {
            if let Some(from) = from_list_id {
                if !store.has_list(from) {
                    return Err(SyncError::stale_list(from));
                }
            }
            if !store.has_list(to_list_id) {
                return Err(SyncError::stale_list(to_list_id));
            }
            let Some((actual, _)) = store.locate(card_id) else {
                return Err(SyncError::stale_card(card_id));
            };
            if from_list_id.as_deref().is_some_and(|from| from != actual) {
                debug!(
                    card_id = %card_id,
                    claimed = ?from_list_id,
                    actual = %actual,
                    "Move source drifted, using current location"
                );
            }
            Mutation::Relocate {
                card_id: card_id.clone(),
                to_list_id: to_list_id.clone(),
                index: *index,
                patch: fields.clone(),
            }
        }
        DeltaKind::Archived { card_id } | DeltaKind::Deleted { card_id } => {
            if !store.contains(card_id) {
                return Ok(None);
            }
            Mutation::Remove {
                card_id: card_id.clone(),
            }
        }
        DeltaKind::Rekeyed {
            provisional_id,
            card,
        } => {
            if store.contains(provisional_id) {
                Mutation::Replace {
                    old_id: provisional_id.clone(),
                    card: card.clone(),
                }
            } else if store.contains(&card.id) {
                return Ok(None);
            } else {
                Mutation::Insert {
                    card: card.clone(),
                    index: None,
                }
            }
        }
    };
    Ok(Some(mutation))
}
