use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{NoteError, NoteResult};
use crate::query::QueryDescriptor;
use crate::session::Session;
use crate::store::NoteStore;
use crate::view::{ViewCache, ViewState};

/// Poll interval used when none is configured (30 seconds)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

/// What a renderer holds for a mounted view.
#[derive(Debug, Clone)]
pub struct ViewHandle {
    id: ViewId,
    receiver: watch::Receiver<ViewState>,
}

impl ViewHandle {
    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn state(&self) -> ViewState {
        self.receiver.borrow().clone()
    }

    /// Waits for the next state change. Fails once the view is unregistered
    /// and its cache dropped.
    pub async fn changed(&mut self) -> NoteResult<ViewState> {
        self.receiver
            .changed()
            .await
            .map_err(|_| NoteError::not_found(format!("{} is no longer registered", self.id)))?;
        Ok(self.receiver.borrow_and_update().clone())
    }
}

struct InFlight {
    seq: u64,
    descriptor: QueryDescriptor,
    task: JoinHandle<()>,
}

/// Per-view bookkeeping: the cache plus at most one poll timer and one
/// outstanding fetch.
struct ViewSlot {
    id: ViewId,
    cache: Arc<ViewCache>,
    timer: Mutex<Option<JoinHandle<()>>>,
    fetch: Mutex<Option<InFlight>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ViewSlot {
    fn shutdown(&self) {
        self.cache.close();
        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }
        if let Some(fetch) = lock(&self.fetch).take() {
            fetch.task.abort();
        }
    }
}

struct SchedulerInner {
    store: Arc<dyn NoteStore>,
    session: Session,
    poll_interval: Duration,
    views: Mutex<HashMap<ViewId, Arc<ViewSlot>>>,
    next_view: AtomicU64,
    next_fetch: AtomicU64,
}

/// Drives fetching and polling for every mounted view.
///
/// Must be used from within a Tokio runtime. Each view gets one cancellable
/// poll timer and at most one fetch in flight; results that arrive for a
/// query the view no longer shows are discarded.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    pub fn new(store: Arc<dyn NoteStore>, session: Session, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                session,
                poll_interval,
                views: Mutex::new(HashMap::new()),
                next_view: AtomicU64::new(1),
                next_fetch: AtomicU64::new(1),
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Mounts a view: fetches immediately and starts polling.
    pub fn register(&self, descriptor: QueryDescriptor) -> ViewHandle {
        let id = ViewId(self.inner.next_view.fetch_add(1, Ordering::SeqCst));
        let slot = Arc::new(ViewSlot {
            id,
            cache: Arc::new(ViewCache::new(descriptor)),
            timer: Mutex::new(None),
            fetch: Mutex::new(None),
        });
        let receiver = slot.cache.subscribe();
        lock(&self.inner.views).insert(id, Arc::clone(&slot));

        log::debug!("Registered {} for {}", id, slot.cache.descriptor());
        self.inner.issue_fetch(&slot);
        self.inner.arm_timer(&slot);
        ViewHandle { id, receiver }
    }

    /// Points a view at a new query. An outstanding fetch for the old query
    /// is abandoned and the new one is fetched right away.
    pub fn set_descriptor(&self, id: ViewId, descriptor: QueryDescriptor) -> NoteResult<()> {
        let slot = self.inner.slot(id)?;
        if slot.cache.set_descriptor(descriptor) {
            self.inner.issue_fetch(&slot);
            self.inner.arm_timer(&slot);
        }
        Ok(())
    }

    /// Fetches the view's current query now and restarts its poll interval.
    /// Joins an equal fetch already in flight instead of issuing another.
    pub fn refresh_now(&self, id: ViewId) -> NoteResult<()> {
        let slot = self.inner.slot(id)?;
        self.inner.issue_fetch(&slot);
        self.inner.arm_timer(&slot);
        Ok(())
    }

    /// Refreshes every mounted view except `except`.
    pub fn refresh_all_except(&self, except: Option<ViewId>) {
        for slot in self.inner.slots() {
            if Some(slot.id) != except {
                self.inner.issue_fetch(&slot);
                self.inner.arm_timer(&slot);
            }
        }
    }

    /// Unmounts a view. Its timer and outstanding fetch are cancelled before
    /// this returns and the view never changes again. Safe to call more than
    /// once; returns whether the view was still registered.
    pub fn unregister(&self, id: ViewId) -> bool {
        let slot = lock(&self.inner.views).remove(&id);
        match slot {
            Some(slot) => {
                slot.shutdown();
                log::debug!("Unregistered {}", id);
                true
            }
            None => false,
        }
    }

    /// Alias of [`SyncScheduler::unregister`].
    pub fn stop(&self, id: ViewId) -> bool {
        self.unregister(id)
    }

    pub fn view(&self, id: ViewId) -> Option<ViewState> {
        self.inner.slot(id).ok().map(|slot| slot.cache.snapshot())
    }

    pub fn is_registered(&self, id: ViewId) -> bool {
        lock(&self.inner.views).contains_key(&id)
    }

    /// Whether a fetch for this view is still outstanding.
    pub fn is_fetching(&self, id: ViewId) -> bool {
        self.inner
            .slot(id)
            .map(|slot| {
                lock(&slot.fetch)
                    .as_ref()
                    .is_some_and(|fetch| !fetch.task.is_finished())
            })
            .unwrap_or(false)
    }

    pub fn view_ids(&self) -> Vec<ViewId> {
        let mut ids: Vec<ViewId> = lock(&self.inner.views).keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn cache(&self, id: ViewId) -> NoteResult<Arc<ViewCache>> {
        self.inner.slot(id).map(|slot| Arc::clone(&slot.cache))
    }

    /// Descriptors of every mounted view, for targeted reconciliation.
    pub(crate) fn descriptors(&self) -> Vec<(ViewId, QueryDescriptor)> {
        self.inner
            .slots()
            .into_iter()
            .map(|slot| (slot.id, slot.cache.descriptor()))
            .collect()
    }
}

impl SchedulerInner {
    fn slot(&self, id: ViewId) -> NoteResult<Arc<ViewSlot>> {
        lock(&self.views)
            .get(&id)
            .cloned()
            .ok_or_else(|| NoteError::not_found(format!("{} is not registered", id)))
    }

    fn slots(&self) -> Vec<Arc<ViewSlot>> {
        lock(&self.views).values().cloned().collect()
    }

    /// Starts a fetch for the slot's current query unless an equal one is
    /// already in flight. A fetch for a different query is aborted first.
    fn issue_fetch(self: &Arc<Self>, slot: &Arc<ViewSlot>) {
        if slot.cache.is_closed() {
            return;
        }
        let descriptor = slot.cache.descriptor();
        let mut fetch = lock(&slot.fetch);

        if let Some(current) = fetch.as_ref() {
            if !current.task.is_finished() {
                if current.descriptor == descriptor {
                    log::debug!("{} already fetching {}", slot.id, descriptor);
                    return;
                }
                log::debug!("{} superseding fetch for {}", slot.id, current.descriptor);
                current.task.abort();
            }
        }

        slot.cache.mark_loading();
        let seq = self.next_fetch.fetch_add(1, Ordering::SeqCst);
        let store = Arc::clone(&self.store);
        let session = self.session.clone();
        let weak_slot = Arc::downgrade(slot);
        let query = descriptor.clone();

        let task = tokio::spawn(async move {
            let outcome = store.list_notes(&session, &query).await;
            let Some(slot) = weak_slot.upgrade() else {
                return;
            };
            if let Err(err) = &outcome {
                log::warn!("{} fetch for {} failed: {}", slot.id, query, err);
            }
            if !slot.cache.apply_fetch(&query, outcome) {
                log::debug!("{} discarded result for {}", slot.id, query);
            }
            let mut fetch = lock(&slot.fetch);
            if fetch.as_ref().is_some_and(|current| current.seq == seq) {
                fetch.take();
            }
        });

        *fetch = Some(InFlight {
            seq,
            descriptor,
            task,
        });
    }

    /// (Re)starts the slot's poll timer so the next tick is a full interval
    /// away. Each tick fetches whatever query the view shows at that moment.
    fn arm_timer(self: &Arc<Self>, slot: &Arc<ViewSlot>) {
        let mut timer = lock(&slot.timer);
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        if slot.cache.is_closed() {
            return;
        }

        let period = self.poll_interval;
        let scheduler: Weak<SchedulerInner> = Arc::downgrade(self);
        let weak_slot = Arc::downgrade(slot);

        *timer = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let (Some(scheduler), Some(slot)) = (scheduler.upgrade(), weak_slot.upgrade()) else {
                    break;
                };
                if slot.cache.is_closed() {
                    break;
                }
                log::debug!("{} poll tick", slot.id);
                scheduler.issue_fetch(&slot);
            }
        }));
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let views = match self.views.get_mut() {
            Ok(views) => std::mem::take(views),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for slot in views.values() {
            slot.shutdown();
        }
    }
}
