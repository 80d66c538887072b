use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{NoteError, NoteResult};
use crate::models::Note;
use crate::query::QueryDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

/// Everything a view renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    /// Query the view currently shows. Fetch results for any other query are
    /// discarded.
    pub descriptor: QueryDescriptor,
    pub notes: Vec<Note>,
    pub status: ViewStatus,
    pub error: Option<NoteError>,
    /// Ids of items waiting on a create or update round-trip. Creates use a
    /// temporary id that never matches a stored note.
    pub pending: BTreeSet<String>,
    /// Bumped each time a fetch result replaces `notes`.
    pub revision: u64,
}

impl ViewState {
    fn new(descriptor: QueryDescriptor) -> Self {
        Self {
            descriptor,
            notes: Vec::new(),
            status: ViewStatus::Idle,
            error: None,
            pending: BTreeSet::new(),
            revision: 0,
        }
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }
}

/// Result cache for one mounted view.
///
/// State is published through a watch channel so renderers can wait for
/// changes. After [`ViewCache::close`] every write is ignored.
#[derive(Debug)]
pub struct ViewCache {
    state: watch::Sender<ViewState>,
    closed: AtomicBool,
}

impl ViewCache {
    pub fn new(descriptor: QueryDescriptor) -> Self {
        let (state, _) = watch::channel(ViewState::new(descriptor));
        Self {
            state,
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn descriptor(&self) -> QueryDescriptor {
        self.state.borrow().descriptor.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops accepting writes. Irreversible.
    ///
    /// The flag is set under the state lock, so no write lands after this
    /// returns.
    pub fn close(&self) {
        self.state.send_if_modified(|_| {
            self.closed.store(true, Ordering::SeqCst);
            false
        });
    }

    /// Applies `f` unless the view is closed. `f` reports whether it
    /// changed anything, so subscribers only wake for real changes.
    fn modify<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut ViewState) -> bool,
    {
        self.state
            .send_if_modified(|state| !self.is_closed() && f(state))
    }

    /// Points the view at a new query. Returns false if it already showed it.
    pub fn set_descriptor(&self, descriptor: QueryDescriptor) -> bool {
        self.modify(|state| {
            if state.descriptor == descriptor {
                return false;
            }
            state.descriptor = descriptor;
            true
        })
    }

    pub fn mark_loading(&self) {
        self.modify(|state| {
            if state.status == ViewStatus::Loading {
                return false;
            }
            state.status = ViewStatus::Loading;
            true
        });
    }

    /// Applies a fetch outcome if it was produced for the current query.
    ///
    /// A failure keeps the previous notes so stale data stays visible next
    /// to the error. Returns false when the outcome was discarded.
    pub fn apply_fetch(&self, descriptor: &QueryDescriptor, outcome: NoteResult<Vec<Note>>) -> bool {
        self.modify(|state| {
            if state.descriptor != *descriptor {
                return false;
            }
            match outcome {
                Ok(notes) => {
                    state.notes = notes;
                    state.status = ViewStatus::Ready;
                    state.error = None;
                    state.revision += 1;
                }
                Err(err) => {
                    state.status = ViewStatus::Error;
                    state.error = Some(err);
                }
            }
            true
        })
    }

    pub fn set_pending(&self, id: &str, pending: bool) {
        self.modify(|state| {
            if pending {
                state.pending.insert(id.to_string())
            } else {
                state.pending.remove(id)
            }
        });
    }

    /// Swaps in the authoritative copy of a note, dropping it if it no
    /// longer belongs to this view's scope.
    pub fn replace_note(&self, note: Note) {
        self.modify(|state| {
            let Some(index) = state.notes.iter().position(|n| n.id == note.id) else {
                return false;
            };
            if state.descriptor.scope_admits(&note) {
                state.notes[index] = note;
            } else {
                state.notes.remove(index);
            }
            true
        });
    }

    /// Puts a newly created note at the front if it belongs to this view.
    pub fn insert_front(&self, note: Note) {
        self.modify(|state| {
            if !state.descriptor.scope_admits(&note) || state.note(&note.id).is_some() {
                return false;
            }
            state.notes.insert(0, note);
            true
        });
    }

    /// Edits the note list ahead of remote confirmation.
    ///
    /// The returned guard must be settled with [`Optimistic::commit`] or
    /// [`Optimistic::rollback`]; dropping it unsettled rolls back.
    pub fn apply_optimistic<F>(self: &Arc<Self>, edit: F) -> Optimistic
    where
        F: FnOnce(&mut Vec<Note>),
    {
        let mut undo = Vec::new();
        let mut revision = 0;
        self.modify(|state| {
            let before = state.notes.clone();
            revision = state.revision;
            edit(&mut state.notes);
            undo = Undo::between(&before, &state.notes);
            !undo.is_empty()
        });
        Optimistic {
            cache: Arc::clone(self),
            undo,
            revision,
            settled: false,
        }
    }
}

/// Reverses one note-level change of an optimistic edit.
#[derive(Debug)]
enum Undo {
    Reinsert { index: usize, note: Note },
    Revert(Note),
    Remove(String),
}

impl Undo {
    /// Changes that take `after` back to `before`: removals first, then
    /// reinserts in ascending index order.
    fn between(before: &[Note], after: &[Note]) -> Vec<Undo> {
        let current: HashMap<&str, &Note> =
            after.iter().map(|note| (note.id.as_str(), note)).collect();
        let previous: HashSet<&str> = before.iter().map(|note| note.id.as_str()).collect();

        let mut undo: Vec<Undo> = after
            .iter()
            .filter(|note| !previous.contains(note.id.as_str()))
            .map(|note| Undo::Remove(note.id.clone()))
            .collect();
        for (index, note) in before.iter().enumerate() {
            match current.get(note.id.as_str()) {
                None => undo.push(Undo::Reinsert {
                    index,
                    note: note.clone(),
                }),
                Some(edited) if *edited != note => undo.push(Undo::Revert(note.clone())),
                Some(_) => {}
            }
        }
        undo
    }

    fn apply(self, notes: &mut Vec<Note>) {
        match self {
            Undo::Reinsert { index, note } => {
                if notes.iter().all(|n| n.id != note.id) {
                    let index = index.min(notes.len());
                    notes.insert(index, note);
                }
            }
            Undo::Revert(note) => {
                if let Some(slot) = notes.iter_mut().find(|n| n.id == note.id) {
                    *slot = note;
                }
            }
            Undo::Remove(id) => notes.retain(|n| n.id != id),
        }
    }
}

/// Handle on an optimistic edit of a view's note list.
#[must_use = "an optimistic edit is rolled back when dropped unsettled"]
#[derive(Debug)]
pub struct Optimistic {
    cache: Arc<ViewCache>,
    undo: Vec<Undo>,
    revision: u64,
    settled: bool,
}

impl Optimistic {
    /// Keeps the edit. An authoritative copy of the affected note, if given,
    /// replaces the optimistic one.
    pub fn commit(mut self, authoritative: Option<Note>) {
        self.settled = true;
        if let Some(note) = authoritative {
            self.cache.replace_note(note);
        }
    }

    /// Reverts the notes this edit touched. Edits made to other notes in the
    /// meantime are kept.
    ///
    /// Skipped when a fetch has replaced the list since the edit; that list
    /// already reflects the remote store.
    pub fn rollback(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let undo = std::mem::take(&mut self.undo);
        if undo.is_empty() {
            return;
        }
        let revision = self.revision;
        let restored = self.cache.modify(|state| {
            if state.revision != revision {
                return false;
            }
            for change in undo {
                change.apply(&mut state.notes);
            }
            true
        });
        if restored {
            log::debug!("Rolled back optimistic edit");
        }
    }
}

impl Drop for Optimistic {
    fn drop(&mut self) {
        self.restore();
    }
}
