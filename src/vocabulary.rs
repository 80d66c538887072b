use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::error::NoteResult;
use crate::session::Session;
use crate::store::NoteStore;

/// Read-mostly cache of the tag and category vocabularies.
///
/// The remote store owns both sets; this only remembers the last answer.
pub struct Vocabulary {
    store: Arc<dyn NoteStore>,
    session: Session,
    tags: RwLock<BTreeSet<String>>,
    categories: RwLock<BTreeSet<String>>,
}

impl Vocabulary {
    pub fn new(store: Arc<dyn NoteStore>, session: Session) -> Self {
        Self {
            store,
            session,
            tags: RwLock::new(BTreeSet::new()),
            categories: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.tags.read().map(|tags| tags.clone()).unwrap_or_default()
    }

    pub fn categories(&self) -> BTreeSet<String> {
        self.categories
            .read()
            .map(|categories| categories.clone())
            .unwrap_or_default()
    }

    /// Fetches both vocabularies. A set whose fetch fails keeps its previous
    /// value; the first failure is returned.
    pub async fn refresh(&self) -> NoteResult<()> {
        let (tags, categories) = tokio::join!(
            self.store.list_tags(&self.session),
            self.store.list_categories(&self.session)
        );

        let tags = tags.map(|fresh| store_set(&self.tags, fresh));
        let categories = categories.map(|fresh| store_set(&self.categories, fresh));
        if let Err(err) = &tags {
            log::warn!("Refreshing tags failed: {}", err);
        }
        if let Err(err) = &categories {
            log::warn!("Refreshing categories failed: {}", err);
        }
        tags.and(categories)
    }
}

fn store_set(slot: &RwLock<BTreeSet<String>>, fresh: BTreeSet<String>) {
    match slot.write() {
        Ok(mut current) => *current = fresh,
        Err(poisoned) => *poisoned.into_inner() = fresh,
    }
}
