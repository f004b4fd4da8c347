//! Screen transitions
//!
//! [`ScreenCoordinator`] owns the view cache and makes sure only one
//! transition runs at a time. The transition body itself always runs on the
//! UI thread via the injected [`UiDispatcher`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};

use super::dispatch::UiDispatcher;
use super::{ViewMode, panic_message};

/// Logical screen type used as the view cache key
pub trait ScreenKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Every kind, in preload order
    fn all() -> &'static [Self];
}

/// Builds and shows views; supplied by the view layer
pub trait ViewFactory<K: ScreenKind>: Send + Sync + 'static {
    type View: Send + Sync + 'static;

    fn construct(&self, kind: K) -> Result<Self::View>;

    /// Make `view` the visible one
    fn display(&self, kind: K, view: &Arc<Self::View>) -> Result<()>;
}

/// Runs once the target view is visible, used to load per-call data into it
pub type ShowCallback<V> = Box<dyn FnOnce(&Arc<V>) -> Result<()> + Send + 'static>;

/// A cached view instance
pub struct ViewSlot<V> {
    instance: Arc<V>,
    last_shown_at: Option<Instant>,
}

impl<V> ViewSlot<V> {
    pub fn instance(&self) -> &Arc<V> {
        &self.instance
    }

    pub fn last_shown_at(&self) -> Option<Instant> {
        self.last_shown_at
    }
}

/// Mutual exclusion flag for transitions
#[derive(Clone, Default)]
pub struct TransitionGuard {
    in_flight: Arc<AtomicBool>,
}

/// Held for the whole life of an accepted transition; releases the guard on drop
pub struct TransitionPermit {
    in_flight: Arc<AtomicBool>,
}

impl TransitionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-and-set: exactly one concurrent caller gets a permit
    pub fn try_acquire(&self) -> Option<TransitionPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TransitionPermit {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    pub fn is_held(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Drop for TransitionPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

struct Inner<K: ScreenKind, F: ViewFactory<K>> {
    factory: F,
    dispatcher: Arc<dyn UiDispatcher>,
    guard: TransitionGuard,
    cache: Mutex<HashMap<K, ViewSlot<F::View>>>,
    current: Mutex<Option<K>>,
    mode: ViewMode,
}

/// Shows screens, one transition at a time, reusing cached views
pub struct ScreenCoordinator<K: ScreenKind, F: ViewFactory<K>> {
    inner: Arc<Inner<K, F>>,
}

impl<K: ScreenKind, F: ViewFactory<K>> Clone for ScreenCoordinator<K, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: ScreenKind, F: ViewFactory<K>> ScreenCoordinator<K, F> {
    /// Create a coordinator; with [`ViewMode::Eager`] every kind is built now
    pub fn new(factory: F, dispatcher: Arc<dyn UiDispatcher>, mode: ViewMode) -> Self {
        let coordinator = Self {
            inner: Arc::new(Inner {
                factory,
                dispatcher,
                guard: TransitionGuard::new(),
                cache: Mutex::new(HashMap::new()),
                current: Mutex::new(None),
                mode,
            }),
        };

        if mode == ViewMode::Eager {
            coordinator.preload();
        }
        coordinator
    }

    /// Build every kind that is not cached yet
    ///
    /// Failures are logged and leave the slot empty, so the kind is retried
    /// on first request.
    pub fn preload(&self) -> usize {
        let mut built = 0;
        for &kind in K::all() {
            if self.inner.cache().contains_key(&kind) {
                continue;
            }
            match self.inner.construct(kind) {
                Ok(_) => built += 1,
                Err(err) => {
                    log::error!(target: "roster::screens", "Preloading {:?} failed: {:#}", kind, err);
                }
            }
        }
        log::debug!(target: "roster::screens", "Preloaded {} view(s)", built);
        built
    }

    /// Show the view for `kind`, then run `callback` with it
    ///
    /// Requests for the screen already visible, and requests made while
    /// another transition is in flight, are logged and dropped.
    pub fn request_transition(&self, kind: K, callback: Option<ShowCallback<F::View>>) {
        if self.current_kind() == Some(kind) {
            log::info!(target: "roster::screens", "Already showing {:?}, transition ignored", kind);
            return;
        }

        let Some(permit) = self.inner.guard.try_acquire() else {
            log::warn!(
                target: "roster::screens",
                "Transition in progress, request for {:?} skipped",
                kind
            );
            return;
        };

        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run_on_ui_thread(Box::new(move || {
            let _permit = permit;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| inner.transition(kind, callback)));
            match outcome {
                Ok(Ok(())) => {
                    log::debug!(target: "roster::screens", "Now showing {:?}", kind);
                }
                Ok(Err(err)) => {
                    log::error!(target: "roster::screens", "Transition to {:?} failed: {:#}", kind, err);
                }
                Err(payload) => {
                    log::error!(
                        target: "roster::screens",
                        "Transition to {:?} panicked: {}",
                        kind,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }));
    }

    /// Shorthand for a transition without a callback
    pub fn show(&self, kind: K) {
        self.request_transition(kind, None);
    }

    /// Drop every cached view except the visible one, returning how many went
    pub fn clear_cache(&self) -> usize {
        let current = self.current_kind();
        let mut cache = self.inner.cache();
        let before = cache.len();
        cache.retain(|kind, _| Some(*kind) == current);
        let evicted = before - cache.len();
        log::info!(target: "roster::screens", "Cleared {} cached view(s)", evicted);
        evicted
    }

    pub fn current_kind(&self) -> Option<K> {
        *self.inner.current()
    }

    pub fn is_transitioning(&self) -> bool {
        self.inner.guard.is_held()
    }

    pub fn cached_view(&self, kind: K) -> Option<Arc<F::View>> {
        self.inner.cache().get(&kind).map(|slot| Arc::clone(&slot.instance))
    }

    /// The visible view, if any
    pub fn current_view(&self) -> Option<Arc<F::View>> {
        self.current_kind().and_then(|kind| self.cached_view(kind))
    }

    pub fn cached_kinds(&self) -> Vec<K> {
        self.inner.cache().keys().copied().collect()
    }

    pub fn last_shown_at(&self, kind: K) -> Option<Instant> {
        self.inner.cache().get(&kind).and_then(|slot| slot.last_shown_at)
    }

    pub fn mode(&self) -> ViewMode {
        self.inner.mode
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }
}

impl<K: ScreenKind, F: ViewFactory<K>> Inner<K, F> {
    fn transition(&self, kind: K, callback: Option<ShowCallback<F::View>>) -> Result<()> {
        let view = self.resolve(kind)?;

        self.factory
            .display(kind, &view)
            .with_context(|| format!("Failed to display {:?}", kind))?;

        *self.current() = Some(kind);
        if let Some(slot) = self.cache().get_mut(&kind) {
            slot.last_shown_at = Some(Instant::now());
        }

        if let Some(callback) = callback {
            callback(&view).with_context(|| format!("Post-show callback for {:?} failed", kind))?;
        }
        Ok(())
    }

    /// Cached instance for `kind`, constructing and caching it on first use
    fn resolve(&self, kind: K) -> Result<Arc<F::View>> {
        if let Some(slot) = self.cache().get(&kind) {
            return Ok(Arc::clone(&slot.instance));
        }
        self.construct(kind)
    }

    fn construct(&self, kind: K) -> Result<Arc<F::View>> {
        let view = Arc::new(
            self.factory
                .construct(kind)
                .with_context(|| format!("Failed to construct {:?}", kind))?,
        );
        log::info!(target: "roster::screens", "Constructed view {:?}", kind);

        let mut cache = self.cache();
        // A concurrent preload may have won; keep the first instance
        let slot = cache.entry(kind).or_insert_with(|| ViewSlot {
            instance: Arc::clone(&view),
            last_shown_at: None,
        });
        Ok(Arc::clone(&slot.instance))
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<K, ViewSlot<F::View>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> MutexGuard<'_, Option<K>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ImmediateDispatcher, UiQueue};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        List,
        Detail,
        Broken,
    }

    impl ScreenKind for Kind {
        fn all() -> &'static [Self] {
            &[Kind::List, Kind::Detail, Kind::Broken]
        }
    }

    struct TestView {
        kind: Kind,
        loaded: Mutex<Option<String>>,
    }

    #[derive(Default)]
    struct TestFactory {
        constructed: AtomicUsize,
        displayed: Mutex<Vec<Kind>>,
    }

    impl ViewFactory<Kind> for Arc<TestFactory> {
        type View = TestView;

        fn construct(&self, kind: Kind) -> Result<TestView> {
            if kind == Kind::Broken {
                anyhow::bail!("layout missing");
            }
            self.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(TestView {
                kind,
                loaded: Mutex::new(None),
            })
        }

        fn display(&self, kind: Kind, _view: &Arc<TestView>) -> Result<()> {
            self.displayed.lock().unwrap().push(kind);
            Ok(())
        }
    }

    fn coordinator(mode: ViewMode) -> (ScreenCoordinator<Kind, Arc<TestFactory>>, Arc<TestFactory>) {
        let factory = Arc::new(TestFactory::default());
        let coordinator = ScreenCoordinator::new(factory.clone(), Arc::new(ImmediateDispatcher), mode);
        (coordinator, factory)
    }

    #[test]
    fn test_transition_shows_view_then_runs_callback() {
        let (screens, factory) = coordinator(ViewMode::Lazy);

        screens.request_transition(
            Kind::Detail,
            Some(Box::new(|view: &Arc<TestView>| {
                *view.loaded.lock().unwrap() = Some("record-7".to_string());
                Ok(())
            })),
        );

        assert_eq!(screens.current_kind(), Some(Kind::Detail));
        assert!(!screens.is_transitioning());
        assert_eq!(*factory.displayed.lock().unwrap(), vec![Kind::Detail]);
        let view = screens.current_view().unwrap();
        assert_eq!(view.kind, Kind::Detail);
        assert_eq!(view.loaded.lock().unwrap().as_deref(), Some("record-7"));
        assert!(screens.last_shown_at(Kind::Detail).is_some());
    }

    #[test]
    fn test_same_instance_reused_until_cache_cleared() {
        let (screens, factory) = coordinator(ViewMode::Lazy);

        screens.show(Kind::List);
        let first = screens.cached_view(Kind::List).unwrap();
        screens.show(Kind::Detail);
        screens.show(Kind::List);
        let second = screens.cached_view(Kind::List).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 2);

        // List is visible, so only Detail is evicted
        assert_eq!(screens.clear_cache(), 1);
        assert_eq!(screens.cached_kinds(), vec![Kind::List]);
        let kept = screens.cached_view(Kind::List).unwrap();
        assert!(Arc::ptr_eq(&first, &kept));

        screens.show(Kind::Detail);
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_self_transition_is_a_no_op() {
        let (screens, factory) = coordinator(ViewMode::Lazy);
        screens.show(Kind::List);

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        screens.request_transition(
            Kind::List,
            Some(Box::new(move |_: &Arc<TestView>| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })),
        );

        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(factory.displayed.lock().unwrap().len(), 1);
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_construction_releases_guard() {
        let (screens, _factory) = coordinator(ViewMode::Lazy);
        screens.show(Kind::List);

        screens.show(Kind::Broken);
        assert!(!screens.is_transitioning());
        assert_eq!(screens.current_kind(), Some(Kind::List));
        assert!(screens.cached_view(Kind::Broken).is_none());

        screens.show(Kind::Detail);
        assert_eq!(screens.current_kind(), Some(Kind::Detail));
    }

    #[test]
    fn test_panicking_callback_releases_guard() {
        let (screens, _factory) = coordinator(ViewMode::Lazy);

        screens.request_transition(
            Kind::Detail,
            Some(Box::new(|_: &Arc<TestView>| -> Result<()> { panic!("populate failed") })),
        );

        assert!(!screens.is_transitioning());
        // The view was shown before the callback ran
        assert_eq!(screens.current_kind(), Some(Kind::Detail));
    }

    #[test]
    fn test_busy_guard_drops_second_request() {
        let factory = Arc::new(TestFactory::default());
        let (queue, mut receiver) = UiQueue::new();
        let screens = ScreenCoordinator::new(factory.clone(), Arc::new(queue), ViewMode::Lazy);

        let ran = Arc::new(AtomicUsize::new(0));
        let (a, b) = (ran.clone(), ran.clone());
        screens.request_transition(
            Kind::Detail,
            Some(Box::new(move |_: &Arc<TestView>| {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );
        assert!(screens.is_transitioning());
        screens.request_transition(
            Kind::List,
            Some(Box::new(move |_: &Arc<TestView>| {
                b.fetch_add(10, Ordering::SeqCst);
                Ok(())
            })),
        );

        assert_eq!(receiver.drain(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(screens.current_kind(), Some(Kind::Detail));
        assert!(!screens.is_transitioning());
    }

    #[test]
    fn test_eager_mode_preloads_buildable_kinds() {
        let (screens, factory) = coordinator(ViewMode::Eager);

        assert_eq!(factory.constructed.load(Ordering::SeqCst), 2);
        let list = screens.cached_view(Kind::List).unwrap();
        screens.show(Kind::List);
        assert!(Arc::ptr_eq(&list, &screens.current_view().unwrap()));
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_guard_grants_single_permit() {
        let guard = TransitionGuard::new();
        let permit = guard.try_acquire().unwrap();
        assert!(guard.try_acquire().is_none());
        drop(permit);
        assert!(!guard.is_held());
        assert!(guard.try_acquire().is_some());
    }
}
