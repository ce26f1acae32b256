//! Turns raw file-watcher notifications into provenance operations.
//!
//! A watcher typically reports several notifications for one logical change
//! (an editor's save is often create + modify, or remove + create). [`coalesce`]
//! folds a batch per path so each path yields at most one operation.

use std::collections::HashMap;

use provenance_store::FileOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchKind {
    Create,
    Modify,
    Remove,
    Rename { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchKind,
}

impl WatchEvent {
    pub fn new(path: impl Into<String>, kind: WatchKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Change { path: String, op: FileOp },
    Rename { from: String, to: String },
}

/// Maps a single notification with no batching context.
#[must_use]
pub fn classify(event: &WatchEvent) -> Classified {
    let op = match &event.kind {
        WatchKind::Create => FileOp::Added,
        WatchKind::Modify => FileOp::Modified,
        WatchKind::Remove => FileOp::Deleted,
        WatchKind::Rename { from } => {
            return Classified::Rename {
                from: from.clone(),
                to: event.path.clone(),
            }
        }
    };
    Classified::Change {
        path: event.path.clone(),
        op,
    }
}

enum Slot {
    Change { path: String, op: Option<FileOp> },
    Rename { from: String, to: String },
}

/// Folds a batch into one operation per path, in first-seen order.
///
/// Create then remove cancels out. Remove then create is a modification.
/// A rename ends the fold for both of its paths.
#[must_use]
pub fn coalesce(events: impl IntoIterator<Item = WatchEvent>) -> Vec<Classified> {
    let mut slots: Vec<Slot> = Vec::new();
    let mut open: HashMap<String, usize> = HashMap::new();

    for event in events {
        let incoming = match classify(&event) {
            Classified::Rename { from, to } => {
                open.remove(&from);
                open.remove(&to);
                slots.push(Slot::Rename { from, to });
                continue;
            }
            Classified::Change { op, .. } => op,
        };

        match open.get(&event.path).copied() {
            Some(position) => {
                if let Slot::Change { op, .. } = &mut slots[position] {
                    *op = fold(*op, incoming);
                }
            }
            None => {
                open.insert(event.path.clone(), slots.len());
                slots.push(Slot::Change {
                    path: event.path,
                    op: Some(incoming),
                });
            }
        }
    }

    slots
        .into_iter()
        .filter_map(|slot| match slot {
            Slot::Change { path, op } => op.map(|op| Classified::Change { path, op }),
            Slot::Rename { from, to } => Some(Classified::Rename { from, to }),
        })
        .collect()
}

fn fold(pending: Option<FileOp>, incoming: FileOp) -> Option<FileOp> {
    use FileOp::{Added, Deleted, Modified};

    match (pending, incoming) {
        (None, Deleted) => None,
        (None, op) => Some(op),
        (Some(Added), Deleted) => None,
        (Some(Added), _) => Some(Added),
        (Some(Deleted), Deleted) => Some(Deleted),
        (Some(Deleted), _) => Some(Modified),
        (Some(_), Deleted) => Some(Deleted),
        (Some(_), _) => Some(Modified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn change(path: &str, op: FileOp) -> Classified {
        Classified::Change {
            path: path.to_string(),
            op,
        }
    }

    #[test]
    fn single_notifications_map_directly() {
        assert_eq!(
            classify(&WatchEvent::new("a.txt", WatchKind::Modify)),
            change("a.txt", FileOp::Modified)
        );
        assert_eq!(
            classify(&WatchEvent::new(
                "b.txt",
                WatchKind::Rename {
                    from: "a.txt".to_string()
                }
            )),
            Classified::Rename {
                from: "a.txt".to_string(),
                to: "b.txt".to_string(),
            }
        );
    }

    #[test]
    fn editor_save_sequences_collapse() {
        let events = vec![
            WatchEvent::new("new.rs", WatchKind::Create),
            WatchEvent::new("new.rs", WatchKind::Modify),
            WatchEvent::new("saved.rs", WatchKind::Remove),
            WatchEvent::new("saved.rs", WatchKind::Create),
            WatchEvent::new("temp.swp", WatchKind::Create),
            WatchEvent::new("temp.swp", WatchKind::Remove),
            WatchEvent::new("old.rs", WatchKind::Modify),
            WatchEvent::new("old.rs", WatchKind::Remove),
        ];

        assert_eq!(
            coalesce(events),
            vec![
                change("new.rs", FileOp::Added),
                change("saved.rs", FileOp::Modified),
                change("old.rs", FileOp::Deleted),
            ]
        );
    }

    #[test]
    fn rename_splits_the_fold() {
        let events = vec![
            WatchEvent::new("a.txt", WatchKind::Modify),
            WatchEvent::new(
                "b.txt",
                WatchKind::Rename {
                    from: "a.txt".to_string(),
                },
            ),
            WatchEvent::new("b.txt", WatchKind::Modify),
        ];

        assert_eq!(
            coalesce(events),
            vec![
                change("a.txt", FileOp::Modified),
                Classified::Rename {
                    from: "a.txt".to_string(),
                    to: "b.txt".to_string(),
                },
                change("b.txt", FileOp::Modified),
            ]
        );
    }
}
