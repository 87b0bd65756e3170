//! Feed Adapter
//!
//! Owns the ordered feed and the live preview slot. All state changes and
//! listener calls happen on whichever task owns the adapter; scans and
//! decodes run on the worker pool and come back through the adapter's
//! mailbox, which the owner drains with [`FeedAdapter::next_event`] or
//! [`FeedAdapter::drain_events`].

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use image::DynamicImage;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::data::AssetRecord;
use super::loader::LibraryLoader;
use crate::decode::{Raster, Renderer, SizeHint, WorkerPool};

/// Decode bound used until a consumer suggests a smaller one
pub const DEFAULT_DECODE_SIZE: u32 = 3000;

/// Index-level change set delivered with [`FeedChange::Delta`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    updated: BTreeSet<usize>,
    removed: BTreeSet<usize>,
}

impl UpdateReport {
    pub fn new(updated: impl IntoIterator<Item = usize>, removed: impl IntoIterator<Item = usize>) -> Self {
        Self {
            updated: updated.into_iter().collect(),
            removed: removed.into_iter().collect(),
        }
    }

    pub fn is_updated(&self, index: usize) -> bool {
        self.updated.contains(&index)
    }

    pub fn is_removed(&self, index: usize) -> bool {
        self.removed.contains(&index)
    }

    pub fn updated(&self) -> &BTreeSet<usize> {
        &self.updated
    }

    pub fn removed(&self) -> &BTreeSet<usize> {
        &self.removed
    }
}

/// What a listener is told after the feed changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedChange {
    /// Everything may have changed; re-read the whole feed
    Reset,
    /// Only the reported indices changed
    Delta(UpdateReport),
}

/// Receives feed change notifications on the adapter's owning task
pub trait FeedListener: Send {
    fn on_feed_changed(&mut self, change: &FeedChange);
}

/// Forward notifications into a channel, for consumers on another task
impl FeedListener for UnboundedSender<FeedChange> {
    fn on_feed_changed(&mut self, change: &FeedChange) {
        if self.send(change.clone()).is_err() {
            trace!("feed listener channel closed");
        }
    }
}

/// What a view currently shows
#[derive(Debug, Clone)]
pub enum Visual<S> {
    /// Shown until the decode lands, and kept if it never does
    Placeholder(Raster),
    Decoded(Raster),
    /// The live preview surface, handed through untouched
    Surface(S),
}

struct ViewSlot<S> {
    record: Arc<AssetRecord>,
    visual: Mutex<Visual<S>>,
    cancel: CancellationToken,
}

/// Handle to a rendered feed item.
///
/// Cloning shares the same view. Dropping every clone does not cancel the
/// decode; call [`ViewHandle::discard`] for that.
pub struct ViewHandle<S> {
    slot: Arc<ViewSlot<S>>,
}

impl<S> Clone for ViewHandle<S> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<S: Clone> ViewHandle<S> {
    fn new(record: Arc<AssetRecord>, visual: Visual<S>) -> Self {
        Self {
            slot: Arc::new(ViewSlot {
                record,
                visual: Mutex::new(visual),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn record(&self) -> &AssetRecord {
        &self.slot.record
    }

    /// Snapshot of what the view shows right now
    pub fn visual(&self) -> Visual<S> {
        self.slot.visual.lock().clone()
    }

    pub fn is_decoded(&self) -> bool {
        matches!(*self.slot.visual.lock(), Visual::Decoded(_))
    }

    /// Give the view up. A decode still in flight stops at its next
    /// checkpoint and its result is never shown.
    pub fn discard(&self) {
        self.slot.cancel.cancel();
    }

    pub fn is_discarded(&self) -> bool {
        self.slot.cancel.is_cancelled()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.slot.cancel.clone()
    }

    /// Swap in a decoded raster unless the view was discarded
    fn deliver(&self, raster: Raster) -> bool {
        if self.is_discarded() {
            return false;
        }
        *self.slot.visual.lock() = Visual::Decoded(raster);
        true
    }
}

impl<S> std::fmt::Debug for ViewHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHandle")
            .field("record", &self.slot.record.id())
            .field("discarded", &self.slot.cancel.is_cancelled())
            .finish()
    }
}

/// Results coming back from the worker pool
pub enum FeedEvent<S> {
    Loaded(Option<Vec<AssetRecord>>),
    /// The scan died without a result; the feed is left as it was
    LoadFailed,
    Rendered {
        view: ViewHandle<S>,
        raster: Option<DynamicImage>,
    },
}

impl<S> std::fmt::Debug for FeedEvent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedEvent::Loaded(records) => f
                .debug_tuple("Loaded")
                .field(&records.as_ref().map(Vec::len))
                .finish(),
            FeedEvent::LoadFailed => f.write_str("LoadFailed"),
            FeedEvent::Rendered { view, raster } => f
                .debug_struct("Rendered")
                .field("view", view)
                .field("has_raster", &raster.is_some())
                .finish(),
        }
    }
}

/// Mailbox slot owned by a background job.
///
/// A job dropped before it runs (the pool was closed) still answers with
/// its fallback event, so the adapter's pending counts always drain.
struct Reply<S> {
    mailbox: UnboundedSender<FeedEvent<S>>,
    fallback: Option<FeedEvent<S>>,
}

impl<S> Reply<S> {
    fn new(mailbox: UnboundedSender<FeedEvent<S>>, fallback: FeedEvent<S>) -> Self {
        Self {
            mailbox,
            fallback: Some(fallback),
        }
    }

    fn send(mut self, event: FeedEvent<S>) {
        self.fallback = None;
        // The adapter may be gone by now
        let _ = self.mailbox.send(event);
    }
}

impl<S> Drop for Reply<S> {
    fn drop(&mut self) {
        if let Some(event) = self.fallback.take() {
            debug!(?event, "job dropped before running");
            let _ = self.mailbox.send(event);
        }
    }
}

/// The ordered, observable feed of assets
pub struct FeedAdapter<S> {
    /// `None` until the first load or preview
    records: Option<Vec<Arc<AssetRecord>>>,
    preview_surface: Option<S>,
    hint: SizeHint,
    default_size: u32,
    listener: Option<Box<dyn FeedListener>>,

    loader: Arc<LibraryLoader>,
    renderer: Renderer,
    pool: WorkerPool,

    mailbox: UnboundedSender<FeedEvent<S>>,
    inbox: UnboundedReceiver<FeedEvent<S>>,
    pending_loads: usize,
    pending_renders: usize,
}

impl<S> FeedAdapter<S>
where
    S: Clone + Send + 'static,
{
    pub fn new(loader: Arc<LibraryLoader>, renderer: Renderer, pool: WorkerPool, default_size: u32) -> Self {
        let default_size = default_size.max(1);
        let (mailbox, inbox) = mpsc::unbounded_channel();
        Self {
            records: None,
            preview_surface: None,
            hint: SizeHint::square(default_size),
            default_size,
            listener: None,
            loader,
            renderer,
            pool,
            mailbox,
            inbox,
            pending_loads: 0,
            pending_renders: 0,
        }
    }

    /// Attach the listener. If data is already there it is told to
    /// resync right away.
    pub fn set_listener(&mut self, listener: impl FeedListener + 'static) {
        self.listener = Some(Box::new(listener));
        if self.records.is_some() {
            self.notify(FeedChange::Reset);
        }
    }

    /// Put the live preview in slot 0, replacing any previous one
    pub fn set_preview(&mut self, surface: S, width: u32, height: u32) {
        self.preview_surface = Some(surface);
        let preview = Arc::new(AssetRecord::preview(width, height));
        let records = self.records.get_or_insert_with(Vec::new);

        let change = match records.first().map(|first| first.is_preview()) {
            None => {
                records.push(preview);
                FeedChange::Reset
            }
            Some(true) => {
                records[0] = preview;
                FeedChange::Delta(UpdateReport::new([0], []))
            }
            Some(false) => {
                records.insert(0, preview);
                FeedChange::Reset
            }
        };
        debug!(width, height, len = records.len(), "preview set");
        self.notify(change);
    }

    /// Start a background scan; the result is merged when it arrives
    pub fn request_load(&mut self) {
        self.pending_loads += 1;
        let loader = Arc::clone(&self.loader);
        let reply = Reply::new(self.mailbox.clone(), FeedEvent::LoadFailed);
        self.pool.spawn("scan", move || {
            let event = match panic::catch_unwind(AssertUnwindSafe(|| loader.scan())) {
                Ok(records) => FeedEvent::Loaded(records),
                Err(_) => {
                    error!("library scan panicked");
                    FeedEvent::LoadFailed
                }
            };
            reply.send(event);
        });
    }

    pub fn item_count(&self) -> usize {
        self.records.as_ref().map_or(0, Vec::len)
    }

    pub fn item_at(&self, index: usize) -> Option<&AssetRecord> {
        self.records.as_ref()?.get(index).map(Arc::as_ref)
    }

    /// Whether the feed has been populated by a load or a preview
    pub fn is_loaded(&self) -> bool {
        self.records.is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetRecord> {
        self.records.iter().flatten().map(Arc::as_ref)
    }

    /// Update the decode bounds used by later renders
    pub fn suggest_size(&mut self, width: i32, height: i32) {
        self.hint = SizeHint::clamped(width, height, self.default_size);
        trace!(width = self.hint.width, height = self.hint.height, "decode size suggested");
    }

    pub fn size_hint(&self) -> SizeHint {
        self.hint
    }

    /// Create a view for the item at `index`.
    ///
    /// Photos and videos start out showing `placeholder` and are decoded on
    /// the worker pool with the current size hints. The preview returns its
    /// surface directly.
    pub fn render_view(&mut self, index: usize, placeholder: Raster) -> Option<ViewHandle<S>> {
        let record = Arc::clone(self.records.as_ref()?.get(index)?);

        if record.is_preview() {
            let surface = self.preview_surface.clone()?;
            return Some(ViewHandle::new(record, Visual::Surface(surface)));
        }

        let view = ViewHandle::new(Arc::clone(&record), Visual::Placeholder(placeholder));
        let renderer = self.renderer.clone();
        let hint = self.hint;
        let cancel = view.cancel_token();
        let handle = view.clone();
        let reply = Reply::new(
            self.mailbox.clone(),
            FeedEvent::Rendered {
                view: view.clone(),
                raster: None,
            },
        );

        self.pending_renders += 1;
        self.pool.spawn("render", move || {
            let rendered = panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&record, hint, &cancel)));
            let raster = match rendered {
                Ok(Ok(raster)) => raster,
                Ok(Err(e)) => {
                    warn!(id = record.id(), path = %record.path().display(), error = %e, "cannot decode");
                    None
                }
                Err(_) => {
                    error!(id = record.id(), path = %record.path().display(), "decoder panicked");
                    None
                }
            };
            reply.send(FeedEvent::Rendered { view: handle, raster });
        });

        Some(view)
    }

    /// Loads and renders still outstanding
    pub fn pending(&self) -> usize {
        self.pending_loads + self.pending_renders
    }

    /// Wait for the next background result and apply it.
    ///
    /// Returns `None` once nothing is outstanding.
    pub async fn next_event(&mut self) -> Option<()> {
        if self.pending() == 0 {
            return None;
        }
        let event = self.inbox.recv().await?;
        self.apply(event);
        Some(())
    }

    /// Apply every result that has already arrived without waiting
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Wait until every outstanding load and render has been applied
    pub async fn settle(&mut self) {
        while self.next_event().await.is_some() {}
    }

    fn apply(&mut self, event: FeedEvent<S>) {
        match event {
            FeedEvent::Loaded(records) => {
                self.pending_loads = self.pending_loads.saturating_sub(1);
                self.merge_loaded(records);
            }
            FeedEvent::LoadFailed => {
                self.pending_loads = self.pending_loads.saturating_sub(1);
            }
            FeedEvent::Rendered { view, raster } => {
                self.pending_renders = self.pending_renders.saturating_sub(1);
                match raster {
                    Some(raster) => {
                        if !view.deliver(Arc::new(raster)) {
                            trace!(id = view.record().id(), "view discarded, dropping raster");
                        }
                    }
                    None => debug!(id = view.record().id(), "no raster, keeping placeholder"),
                }
            }
        }
    }

    /// Replace the feed with a scan result, keeping a live preview in slot 0
    fn merge_loaded(&mut self, loaded: Option<Vec<AssetRecord>>) {
        let camera = self
            .records
            .as_ref()
            .and_then(|records| records.first())
            .filter(|first| first.is_preview())
            .cloned();
        let was_empty = self.records.as_ref().is_some_and(Vec::is_empty);

        let mut next: Vec<Arc<AssetRecord>> = loaded.unwrap_or_default().into_iter().map(Arc::new).collect();

        match camera {
            Some(preview) => {
                next.insert(0, preview);
                let len = next.len();
                self.records = Some(next);
                debug!(len, "feed reloaded behind preview");
                self.notify(FeedChange::Delta(UpdateReport::new(1..len, [])));
            }
            None => {
                let unchanged = was_empty && next.is_empty();
                debug!(len = next.len(), unchanged, "feed reloaded");
                self.records = Some(next);
                if !unchanged {
                    self.notify(FeedChange::Reset);
                }
            }
        }
    }

    fn notify(&mut self, change: FeedChange) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_feed_changed(&change);
        }
    }
}

impl<S> std::fmt::Debug for FeedAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedAdapter")
            .field("items", &self.records.as_ref().map(Vec::len))
            .field("hint", &self.hint)
            .field("pending_loads", &self.pending_loads)
            .field("pending_renders", &self.pending_renders)
            .finish_non_exhaustive()
    }
}
