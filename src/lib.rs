use std::sync::Arc;

pub mod config;
pub mod error;
pub mod models;
pub mod mutation;
pub mod paths;
pub mod query;
pub mod session;
pub mod store;
pub mod sync;
pub mod tree;
pub mod view;
pub mod vocabulary;

pub use error::{NoteError, NoteResult};
pub use models::{Config, Folder, Note, NoteDraft, NoteUpdate};
pub use mutation::MutationCoordinator;
pub use query::{compose, QueryDescriptor, QueryInputs, SortField, SortOrder, ViewKind};
pub use session::{CredentialProvider, Session, StaticCredentials};
pub use store::{HttpNoteStore, MemoryNoteStore, NoteStore};
pub use sync::{SyncScheduler, ViewHandle, ViewId};
pub use tree::{Children, FolderTree};
pub use view::{ViewState, ViewStatus};
pub use vocabulary::Vocabulary;

/// Installs `env_logger` with `filter` as the default; `RUST_LOG` wins when
/// set. Later calls are no-ops.
pub fn init_logging(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialised");
    }
}

/// One client session against a note store: the views, the folder tree and
/// the operations that change them.
///
/// Must be created inside a Tokio runtime.
pub struct NoteSync {
    config: Config,
    session: Session,
    scheduler: SyncScheduler,
    tree: FolderTree,
    mutations: MutationCoordinator,
    vocabulary: Vocabulary,
}

impl NoteSync {
    pub fn new(store: Arc<dyn NoteStore>, session: Session, config: Config) -> Self {
        let scheduler = SyncScheduler::new(Arc::clone(&store), session.clone(), config.poll_interval());
        let tree = FolderTree::new(Arc::clone(&store), session.clone());
        let mutations = MutationCoordinator::new(
            Arc::clone(&store),
            session.clone(),
            scheduler.clone(),
            tree.clone(),
        );
        let vocabulary = Vocabulary::new(store, session.clone());
        Self {
            config,
            session,
            scheduler,
            tree,
            mutations,
            vocabulary,
        }
    }

    /// Talks to the REST service at `config.api_base_url`.
    pub fn connect(config: Config, session: Session) -> NoteResult<Self> {
        let store = HttpNoteStore::from_config(&config)?;
        log::info!("Connecting to note service at {}", config.api_base_url);
        Ok(Self::new(Arc::new(store), session, config))
    }

    /// Mounts a view; see [`SyncScheduler::register`].
    pub fn open_view(&self, descriptor: QueryDescriptor) -> ViewHandle {
        self.scheduler.register(descriptor)
    }

    /// Unmounts a view; see [`SyncScheduler::unregister`].
    pub fn close_view(&self, id: ViewId) -> bool {
        self.scheduler.unregister(id)
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn tree(&self) -> &FolderTree {
        &self.tree
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for NoteSync {
    fn drop(&mut self) {
        for id in self.scheduler.view_ids() {
            self.scheduler.unregister(id);
        }
    }
}
