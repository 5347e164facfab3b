//! Reconciliation controller.
//!
//! Decides whether a remote update reaches the edit surface now or waits for
//! the user. [`transition`] is a pure function of the current state, the
//! incoming event and the unsaved-changes verdict; the caller carries out the
//! returned effects.

use crate::content::{canonicalize, CanonicalTree};
use crate::events::{RemoteUpdate, UpdateReason};
use crate::store::DocumentVersion;
use serde::Serialize;
use tracing::{debug, info, warn};

/// A remote update withheld because the edit surface has unsaved edits.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRemoteUpdate {
    pub content: CanonicalTree,
    pub version: DocumentVersion,
    pub reason: UpdateReason,
}

/// What the host UI should show for a panel.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncNotice {
    #[default]
    Hidden,
    /// Offers Save & Sync / Discard & Sync.
    Pending {
        version: DocumentVersion,
        reason: UpdateReason,
    },
    /// Save & Sync could not save; offers retry.
    SaveFailed {
        version: DocumentVersion,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerState {
    pub pending: Option<PendingRemoteUpdate>,
    pub notice: SyncNotice,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A remote refresh or conflict delivered fresh content.
    Remote(RemoteUpdate),
    /// An ordinary save of the user's edit was acknowledged.
    Saved { version: DocumentVersion },
    SaveAndSyncRequested,
    /// The save half of Save & Sync succeeded.
    SaveAndSyncSaved { version: DocumentVersion },
    /// The save half of Save & Sync failed without reaching a decision.
    SaveFailed { message: String },
    DiscardRequested,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Replace the edit surface with `content` and record it as saved.
    Apply {
        content: CanonicalTree,
        version: DocumentVersion,
    },
    /// Drop any debounced autosave that has not fired yet.
    CancelAutosave,
}

/// Compute the next controller state and the effects to perform.
///
/// `unsaved` is the unsaved-change guard's verdict for the current edit
/// surface, taken after any snapshot update the event implies.
pub fn transition(
    state: &ControllerState,
    event: ControllerEvent,
    unsaved: bool,
) -> (ControllerState, Vec<Effect>) {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        ControllerEvent::Remote(update) => {
            let content = match canonicalize(&update.content) {
                Ok(content) => content,
                Err(e) => {
                    warn!(
                        "Dropping remote update for {} at version {}: {}",
                        update.key, update.version, e
                    );
                    return (next, effects);
                }
            };

            if !unsaved {
                debug!("Applying remote update for {} at version {}", update.key, update.version);
                effects.push(Effect::Apply {
                    content,
                    version: update.version,
                });
                next.pending = None;
                next.notice = SyncNotice::Hidden;
            } else if next
                .pending
                .as_ref()
                .is_some_and(|pending| pending.version > update.version)
            {
                debug!(
                    "Ignoring remote update for {} at version {}: newer update already pending",
                    update.key, update.version
                );
            } else {
                info!(
                    "Holding remote update for {} at version {}: unsaved local edits",
                    update.key, update.version
                );
                next.notice = SyncNotice::Pending {
                    version: update.version,
                    reason: update.reason,
                };
                next.pending = Some(PendingRemoteUpdate {
                    content,
                    version: update.version,
                    reason: update.reason,
                });
            }
        }

        ControllerEvent::Saved { version } => {
            if unsaved {
                return (next, effects);
            }
            let dismissed = next.notice == SyncNotice::Hidden;
            match next.pending.take() {
                // A dismissed update waits for the user's own save, then lands.
                Some(pending) if dismissed => {
                    debug!(
                        "Applying retained update at version {} after save at version {}",
                        pending.version, version
                    );
                    effects.push(Effect::Apply {
                        content: pending.content,
                        version: pending.version,
                    });
                }
                // The notice is still up; only the user resolves it.
                Some(pending) => next.pending = Some(pending),
                None => next.notice = SyncNotice::Hidden,
            }
        }

        ControllerEvent::SaveAndSyncRequested => {
            effects.push(Effect::CancelAutosave);
        }

        ControllerEvent::SaveAndSyncSaved { .. } => {
            next.pending = None;
            next.notice = SyncNotice::Hidden;
        }

        ControllerEvent::SaveFailed { message } => {
            let version = next.pending.as_ref().map_or(0, |pending| pending.version);
            next.notice = SyncNotice::SaveFailed { version, message };
        }

        ControllerEvent::DiscardRequested => {
            effects.push(Effect::CancelAutosave);
            if let Some(pending) = next.pending.take() {
                effects.push(Effect::Apply {
                    content: pending.content,
                    version: pending.version,
                });
            }
            next.notice = SyncNotice::Hidden;
        }

        ControllerEvent::Dismissed => {
            next.notice = SyncNotice::Hidden;
        }
    }

    (next, effects)
}

/// Holds controller state between events.
#[derive(Debug, Default)]
pub struct Reconciler {
    state: ControllerState,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: ControllerEvent, unsaved: bool) -> Vec<Effect> {
        let (next, effects) = transition(&self.state, event, unsaved);
        self.state = next;
        effects
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn pending(&self) -> Option<&PendingRemoteUpdate> {
        self.state.pending.as_ref()
    }

    pub fn notice(&self) -> &SyncNotice {
        &self.state.notice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::key::DocumentKey;

    fn tree(text: &str) -> CanonicalTree {
        CanonicalTree::from_markup(text).unwrap()
    }

    fn remote(text: &str, version: DocumentVersion, reason: UpdateReason) -> ControllerEvent {
        ControllerEvent::Remote(RemoteUpdate {
            key: DocumentKey::new("n", "p"),
            version,
            content: Content::markup(text),
            reason,
        })
    }

    fn pending_state(text: &str, version: DocumentVersion) -> ControllerState {
        ControllerState {
            pending: Some(PendingRemoteUpdate {
                content: tree(text),
                version,
                reason: UpdateReason::RemoteUpdate,
            }),
            notice: SyncNotice::Pending {
                version,
                reason: UpdateReason::RemoteUpdate,
            },
        }
    }

    #[test]
    fn test_applies_immediately_without_unsaved_changes() {
        let (state, effects) = transition(
            &ControllerState::default(),
            remote("other", 5, UpdateReason::Manual),
            false,
        );
        assert_eq!(
            effects,
            vec![Effect::Apply {
                content: tree("other"),
                version: 5
            }]
        );
        assert_eq!(state, ControllerState::default());
    }

    #[test]
    fn test_holds_update_when_unsaved() {
        let (state, effects) = transition(
            &ControllerState::default(),
            remote("other", 5, UpdateReason::RemoteUpdate),
            true,
        );
        assert!(effects.is_empty());
        assert_eq!(state, pending_state("other", 5));
    }

    #[test]
    fn test_conflict_takes_the_same_path() {
        let (state, effects) = transition(
            &ControllerState::default(),
            remote("theirs", 2, UpdateReason::Conflict),
            true,
        );
        assert!(effects.is_empty());
        assert_eq!(
            state.notice,
            SyncNotice::Pending {
                version: 2,
                reason: UpdateReason::Conflict
            }
        );
    }

    #[test]
    fn test_newest_pending_wins() {
        let state = pending_state("other", 5);
        let (state, _) = transition(&state, remote("newer", 7, UpdateReason::Manual), true);
        assert_eq!(state.pending.as_ref().unwrap().content, tree("newer"));
        assert_eq!(state.pending.as_ref().unwrap().version, 7);

        let (state, _) = transition(&state, remote("older", 6, UpdateReason::Manual), true);
        assert_eq!(state.pending.unwrap().version, 7);
    }

    #[test]
    fn test_unparseable_update_is_dropped() {
        let state = pending_state("other", 5);
        let (next, effects) = transition(&state, remote("<p>broken", 9, UpdateReason::Manual), false);
        assert!(effects.is_empty());
        assert_eq!(next, state);
    }

    #[test]
    fn test_discard_applies_pending() {
        let (state, effects) = transition(
            &pending_state("other", 5),
            ControllerEvent::DiscardRequested,
            true,
        );
        assert_eq!(
            effects,
            vec![
                Effect::CancelAutosave,
                Effect::Apply {
                    content: tree("other"),
                    version: 5
                }
            ]
        );
        assert_eq!(state, ControllerState::default());
    }

    #[test]
    fn test_dismiss_keeps_pending() {
        let (state, effects) = transition(&pending_state("other", 5), ControllerEvent::Dismissed, true);
        assert!(effects.is_empty());
        assert_eq!(state.notice, SyncNotice::Hidden);
        assert_eq!(state.pending.unwrap().version, 5);
    }

    #[test]
    fn test_save_failure_keeps_pending() {
        let (state, effects) = transition(
            &pending_state("other", 5),
            ControllerEvent::SaveFailed {
                message: "network failure".into(),
            },
            true,
        );
        assert!(effects.is_empty());
        assert_eq!(
            state.notice,
            SyncNotice::SaveFailed {
                version: 5,
                message: "network failure".into()
            }
        );
        assert_eq!(state.pending.unwrap().content, tree("other"));
    }

    #[test]
    fn test_save_and_sync_clears_notice() {
        let state = pending_state("other", 5);
        let (state, effects) = transition(&state, ControllerEvent::SaveAndSyncRequested, true);
        assert_eq!(effects, vec![Effect::CancelAutosave]);
        let (state, effects) =
            transition(&state, ControllerEvent::SaveAndSyncSaved { version: 6 }, false);
        assert!(effects.is_empty());
        assert_eq!(state, ControllerState::default());
    }

    #[test]
    fn test_dismissed_update_applies_after_own_save() {
        let mut dismissed = pending_state("other", 5);
        dismissed.notice = SyncNotice::Hidden;

        let (state, effects) = transition(&dismissed, ControllerEvent::Saved { version: 6 }, false);
        assert_eq!(
            effects,
            vec![Effect::Apply {
                content: tree("other"),
                version: 5
            }]
        );
        assert_eq!(state, ControllerState::default());
    }

    #[test]
    fn test_save_leaves_visible_notice_alone() {
        let state = pending_state("other", 5);
        let (next, effects) = transition(&state, ControllerEvent::Saved { version: 6 }, false);
        assert!(effects.is_empty());
        assert_eq!(next, state);

        let mut failed = pending_state("other", 5);
        failed.notice = SyncNotice::SaveFailed {
            version: 5,
            message: "network failure".into(),
        };
        let (next, effects) = transition(&failed, ControllerEvent::Saved { version: 6 }, false);
        assert!(effects.is_empty());
        assert_eq!(next, failed);
    }

    #[test]
    fn test_save_without_pending_hides_stale_failure() {
        let state = ControllerState {
            pending: None,
            notice: SyncNotice::SaveFailed {
                version: 0,
                message: "network failure".into(),
            },
        };
        let (next, effects) = transition(&state, ControllerEvent::Saved { version: 2 }, false);
        assert!(effects.is_empty());
        assert_eq!(next, ControllerState::default());
    }

    #[test]
    fn test_save_with_remaining_edits_changes_nothing() {
        let state = pending_state("other", 5);
        let (next, effects) = transition(&state, ControllerEvent::Saved { version: 4 }, true);
        assert!(effects.is_empty());
        assert_eq!(next, state);
    }

    #[test]
    fn test_notice_serialization() {
        let json = serde_json::to_value(SyncNotice::Pending {
            version: 5,
            reason: UpdateReason::Conflict,
        })
        .unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["reason"], "conflict");
    }
}
