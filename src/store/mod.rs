//! The remote note/folder service the sync layer is a client of.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::NoteResult;
use crate::models::{Folder, Note, NoteDraft, NoteUpdate};
use crate::query::QueryDescriptor;
use crate::session::Session;

pub mod http;
pub mod memory;

pub use http::HttpNoteStore;
pub use memory::MemoryNoteStore;

/// Logical operations of the remote store.
///
/// Every call resolves to a success or a typed failure; timeouts belong to
/// the implementation's transport.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn list_notes(&self, session: &Session, query: &QueryDescriptor) -> NoteResult<Vec<Note>>;

    async fn get_note(&self, session: &Session, id: &str) -> NoteResult<Note>;

    async fn create_note(&self, session: &Session, draft: &NoteDraft) -> NoteResult<Note>;

    async fn update_note(&self, session: &Session, id: &str, update: &NoteUpdate) -> NoteResult<Note>;

    async fn delete_note(&self, session: &Session, id: &str) -> NoteResult<()>;

    /// Direct child folders of `path`. Notes are listed separately through
    /// a by-folder query.
    async fn list_folder_contents(&self, session: &Session, path: &str) -> NoteResult<Vec<Folder>>;

    async fn create_folder(&self, session: &Session, parent_path: &str, name: &str) -> NoteResult<Folder>;

    async fn rename_folder(&self, session: &Session, path: &str, new_name: &str) -> NoteResult<Folder>;

    async fn delete_folder(&self, session: &Session, path: &str) -> NoteResult<()>;

    async fn list_tags(&self, session: &Session) -> NoteResult<BTreeSet<String>>;

    async fn list_categories(&self, session: &Session) -> NoteResult<BTreeSet<String>>;
}
