use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet, HashMap},
    future::Future,
    mem::take,
    rc::{Rc, Weak},
    task::Poll,
};

use futures::{
    future::{ready, AbortHandle, Abortable, Either, LocalBoxFuture, Shared},
    FutureExt,
};
use slabmap::SlabMap;
use tracing::trace;

use crate::{
    atom::{AsyncCommand, AsyncComputed, AtomId, AtomKind, Command, Computed, ErasedDef, ReadFn, StateAtom},
    AnyAtom, StoreError, Subscription,
};


type SharedFut<T> = Shared<LocalBoxFuture<'static, Result<T, StoreError>>>;

/// One entry per atom per store, created lazily on first use.
///
/// A node never holds a strong reference to its atom descriptor unless it is
/// mounted; the `hold` inside [`Mounted`] is the only strong handle the store
/// ever takes, so unmounted atoms dropped by the caller become collectible.
pub(crate) struct Node {
    pub(crate) atom: Weak<dyn ErasedDef>,
    pub(crate) kind: AtomKind,
    pub(crate) value: Option<Box<dyn Any>>,
    /// Dependencies recorded by the most recent execution, in read order.
    pub(crate) deps: Vec<AtomId>,
    /// Reverse edges, ordered by atom creation for deterministic walks.
    pub(crate) dependents: BTreeSet<AtomId>,
    /// True iff a transitive state dependency changed since the cached value
    /// was computed.
    pub(crate) dirty: bool,
    pub(crate) mounted: Option<Mounted>,
    invocation: Option<Invocation>,
    generation: u64,
}

impl Node {
    fn new(def: &Rc<dyn ErasedDef>) -> Self {
        Node {
            atom: Rc::downgrade(def),
            kind: def.kind(),
            value: None,
            deps: Vec::new(),
            dependents: BTreeSet::new(),
            dirty: false,
            mounted: None,
            invocation: None,
            generation: 0,
        }
    }
    pub(crate) fn label(&self, id: AtomId) -> String {
        self.atom
            .upgrade()
            .and_then(|def| def.label())
            .unwrap_or_else(|| id.anon_label())
    }
}

pub(crate) struct Mounted {
    pub(crate) listeners: SlabMap<Command<(), ()>>,
    #[allow(unused)]
    hold: Rc<dyn ErasedDef>,
}

struct Invocation {
    generation: u64,
    abort: AbortHandle,
    shared: Box<dyn Any>,
}

struct Frame {
    id: AtomId,
    deps: Vec<AtomId>,
}

pub(crate) struct StoreInner {
    pub(crate) nodes: RefCell<HashMap<AtomId, Node>>,
    computing: RefCell<Vec<Frame>>,
    pub(crate) queue: RefCell<Vec<(AtomId, Command<(), ()>)>>,
    flushing: Cell<bool>,
}

/// A reactive atom store.
///
/// Reads are pull-based: `get` walks dependencies on demand and caches the
/// result. Writes are push-based: `set` eagerly notifies only the subset of
/// the graph that is currently observed through [`Store::sub`].
///
/// `Store` is a cheap handle; clones share one node registry. Independent
/// stores never share state, even for the same atoms.
#[derive(Clone)]
pub struct Store(Rc<StoreInner>);

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store(Rc::new(StoreInner {
            nodes: RefCell::new(HashMap::new()),
            computing: RefCell::new(Vec::new()),
            queue: RefCell::new(Vec::new()),
            flushing: Cell::new(false),
        }))
    }

    pub(crate) fn from_inner(inner: Rc<StoreInner>) -> Self {
        Store(inner)
    }
    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Rc::downgrade(&self.0)
    }
    pub(crate) fn with_nodes<R>(&self, f: impl FnOnce(&HashMap<AtomId, Node>) -> R) -> R {
        f(&self.0.nodes.borrow())
    }
    pub(crate) fn staged_sources(&self) -> Vec<AtomId> {
        self.0.queue.borrow().iter().map(|(id, _)| *id).collect()
    }

    // ------------------------------------------------------------------
    // node registry
    // ------------------------------------------------------------------

    pub(crate) fn ensure_node(&self, def: &Rc<dyn ErasedDef>) {
        self.0
            .nodes
            .borrow_mut()
            .entry(def.id())
            .or_insert_with(|| Node::new(def));
    }

    pub(crate) fn ensure<D: ErasedDef>(&self, def: &Rc<D>) -> AtomId {
        let id = def.id();
        if !self.0.nodes.borrow().contains_key(&id) {
            self.ensure_node(&(def.clone() as Rc<dyn ErasedDef>));
        }
        id
    }

    /// Record a dependency edge established by the current execution of
    /// `sink`. Edges recorded while the sink is mounted extend the mounted
    /// closure immediately.
    fn record_dep(&self, sink: AtomId, source: AtomId) {
        let sink_mounted = {
            let mut nodes = self.0.nodes.borrow_mut();
            match nodes.get_mut(&source) {
                Some(src) => {
                    src.dependents.insert(sink);
                }
                None => return,
            }
            let mut frames = self.0.computing.borrow_mut();
            match frames.last_mut() {
                Some(frame) if frame.id == sink => {
                    if !frame.deps.contains(&source) {
                        frame.deps.push(source);
                    }
                }
                _ => {
                    // asynchronous execution: no frame, append directly
                    if let Some(n) = nodes.get_mut(&sink) {
                        if !n.deps.contains(&source) {
                            n.deps.push(source);
                        }
                    }
                }
            }
            nodes.get(&sink).is_some_and(|n| n.mounted.is_some())
        };
        if sink_mounted {
            self.mount_id(source);
        }
    }

    /// Replace the dependency set of `id` with the edges recorded by its
    /// latest execution. Edges not re-established are removed, and dropped
    /// dependencies of a mounted node are unmounted unless another mounted
    /// path still uses them.
    fn commit_deps(&self, id: AtomId, new_deps: Vec<AtomId>) {
        let (removed, mounted) = {
            let mut nodes = self.0.nodes.borrow_mut();
            let Some(n) = nodes.get_mut(&id) else { return };
            let old = take(&mut n.deps);
            let removed: Vec<AtomId> =
                old.into_iter().filter(|o| !new_deps.contains(o)).collect();
            n.deps = new_deps;
            let mounted = n.mounted.is_some();
            for r in &removed {
                if let Some(src) = nodes.get_mut(r) {
                    src.dependents.remove(&id);
                }
            }
            (removed, mounted)
        };
        if mounted {
            for r in removed {
                self.try_unmount(r);
            }
        }
    }

    // ------------------------------------------------------------------
    // get
    // ------------------------------------------------------------------

    /// Resolve an atom's current value through this store.
    ///
    /// State atoms return their written value, falling back to the initial
    /// one. Computed atoms return the cached value when no transitive
    /// dependency changed, and re-run their derivation otherwise. Commands
    /// are readable only when created with
    /// [`command_with_read`](crate::command_with_read).
    pub fn get<R: Readable>(&self, atom: &R) -> Result<R::Value, StoreError> {
        atom.read_in(self, None)
    }

    pub(crate) fn state_value<T: Clone + 'static>(
        &self,
        atom: &StateAtom<T>,
        track: Option<AtomId>,
    ) -> Result<T, StoreError> {
        let id = self.ensure(&atom.0);
        if let Some(sink) = track {
            self.record_dep(sink, id);
        }
        {
            let nodes = self.0.nodes.borrow();
            if let Some(v) = nodes.get(&id).and_then(|n| n.value.as_ref()) {
                return Ok(v.downcast_ref::<T>().unwrap().clone());
            }
        }
        match &atom.0.init {
            Some(init) => Ok(init.clone()),
            None => Err(StoreError::Uninitialized),
        }
    }

    /// Run a derivation if its cache is stale, then hand the caller the
    /// cached value.
    fn compute<T: 'static, R>(
        &self,
        id: AtomId,
        read: &ReadFn<T>,
        finish: impl FnOnce(&T) -> R,
    ) -> Result<R, StoreError> {
        if self.0.computing.borrow().iter().any(|f| f.id == id) {
            return Err(StoreError::Cycle);
        }
        {
            let nodes = self.0.nodes.borrow();
            if let Some(n) = nodes.get(&id) {
                if !n.dirty {
                    if let Some(v) = n.value.as_ref() {
                        return Ok(finish(v.downcast_ref::<T>().unwrap()));
                    }
                }
            }
        }
        self.0.computing.borrow_mut().push(Frame {
            id,
            deps: Vec::new(),
        });
        let mut cx = ReadContext {
            store: self.clone(),
            sink: id,
        };
        let result = read(&mut cx);
        let frame = self
            .0
            .computing
            .borrow_mut()
            .pop()
            .expect("unbalanced computation stack");
        self.commit_deps(id, frame.deps);
        let mut nodes = self.0.nodes.borrow_mut();
        let Some(n) = nodes.get_mut(&id) else {
            return result.map(|v| finish(&v));
        };
        match result {
            Ok(v) => {
                let out = finish(&v);
                n.value = Some(Box::new(v));
                n.dirty = false;
                Ok(out)
            }
            Err(e) => {
                n.dirty = true;
                Err(e)
            }
        }
    }

    pub(crate) fn compute_if_stale<T: Clone + 'static>(
        &self,
        id: AtomId,
        read: &ReadFn<T>,
    ) -> Result<T, StoreError> {
        self.compute(id, read, |v| v.clone())
    }

    /// Evaluate a derivation for its side effect on the cache and dependency
    /// set only; used when mounting.
    pub(crate) fn prime_read<T: 'static>(&self, id: AtomId, read: &ReadFn<T>) {
        let _ = self.compute(id, read, |_| ());
    }

    // ------------------------------------------------------------------
    // set
    // ------------------------------------------------------------------

    /// Write a state atom and synchronously deliver notifications.
    ///
    /// The value is always recorded, even when equal to the previous one;
    /// use [`set_dedup`](Store::set_dedup) for the short-circuiting policy.
    /// The notification queue for this write is drained before `set`
    /// returns; a listener error aborts the drain and propagates, leaving
    /// undelivered notifications staged for the next pass.
    pub fn set<T: 'static>(&self, atom: &StateAtom<T>, value: T) -> Result<(), StoreError> {
        let id = self.ensure(&atom.0);
        {
            let mut nodes = self.0.nodes.borrow_mut();
            if let Some(n) = nodes.get_mut(&id) {
                n.value = Some(Box::new(value));
            }
        }
        trace!(?id, "set");
        self.invalidate(id);
        self.flush()
    }

    /// Write a state atom only if the value differs from the current one.
    pub fn set_dedup<T: PartialEq + 'static>(
        &self,
        atom: &StateAtom<T>,
        value: T,
    ) -> Result<(), StoreError> {
        let id = self.ensure(&atom.0);
        let changed = {
            let mut nodes = self.0.nodes.borrow_mut();
            let Some(n) = nodes.get_mut(&id) else {
                return Ok(());
            };
            let same = match &n.value {
                Some(v) => v.downcast_ref::<T>().unwrap() == &value,
                None => atom.0.init.as_ref() == Some(&value),
            };
            if !same {
                n.value = Some(Box::new(value));
            }
            !same
        };
        if changed {
            trace!(?id, "set");
            self.invalidate(id);
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Write a state atom through an updater of the previous value.
    pub fn update<T: Clone + 'static>(
        &self,
        atom: &StateAtom<T>,
        f: impl FnOnce(T) -> T,
    ) -> Result<(), StoreError> {
        let prev = self.get(atom)?;
        self.set(atom, f(prev))
    }

    /// Mark the dependents closure of `origin` stale and stage
    /// notifications for every mounted listener in it, upstream first.
    fn invalidate(&self, origin: AtomId) {
        let mut depths = BTreeMap::new();
        self.invalidate_walk(origin, origin, 0, &mut depths);
        let mut order: Vec<(usize, AtomId)> =
            depths.into_iter().map(|(id, d)| (d, id)).collect();
        order.sort();
        let mut staged = Vec::new();
        {
            let nodes = self.0.nodes.borrow();
            for (_, id) in order {
                let Some(n) = nodes.get(&id) else { continue };
                let Some(m) = &n.mounted else { continue };
                for listener in m.listeners.values() {
                    staged.push((id, listener.clone()));
                }
            }
        }
        if !staged.is_empty() {
            self.0.queue.borrow_mut().extend(staged);
        }
    }

    /// Depth-relaxing walk over the dependents closure. A node reachable by
    /// several paths keeps its longest distance from the origin, so staging
    /// in depth order puts every listener after the listeners of anything it
    /// transitively reads.
    fn invalidate_walk(
        &self,
        id: AtomId,
        origin: AtomId,
        depth: usize,
        depths: &mut BTreeMap<AtomId, usize>,
    ) {
        match depths.get(&id) {
            Some(&d) if d >= depth => return,
            _ => {}
        }
        depths.insert(id, depth);
        let dependents = {
            let mut nodes = self.0.nodes.borrow_mut();
            let Some(n) = nodes.get_mut(&id) else { return };
            if id != origin {
                n.dirty = true;
                if let Some(inv) = n.invocation.take() {
                    inv.abort.abort();
                    trace!(?id, "aborted superseded invocation");
                }
            }
            n.dependents.iter().copied().collect::<Vec<AtomId>>()
        };
        for d in dependents {
            self.invalidate_walk(d, origin, depth + 1, depths);
        }
    }

    // ------------------------------------------------------------------
    // flush
    // ------------------------------------------------------------------

    /// Drain staged notifications in passes until none remain.
    ///
    /// Re-entrant writes (from listeners) stage into the next pass; a pass
    /// invokes each listener command exactly once however many of its
    /// subscribed atoms changed.
    fn flush(&self) -> Result<(), StoreError> {
        if self.0.flushing.replace(true) {
            return Ok(());
        }
        let result = self.drain();
        self.0.flushing.set(false);
        result
    }

    fn drain(&self) -> Result<(), StoreError> {
        loop {
            let staged = take(&mut *self.0.queue.borrow_mut());
            if staged.is_empty() {
                return Ok(());
            }
            let mut pass: Vec<(AtomId, Command<(), ()>)> = Vec::new();
            let mut seen: Vec<AtomId> = Vec::new();
            for (source, listener) in staged {
                let lid = listener.0.id;
                if !seen.contains(&lid) {
                    seen.push(lid);
                    pass.push((source, listener));
                }
            }
            trace!(listeners = pass.len(), "flush pass");
            for (i, (_, listener)) in pass.iter().enumerate() {
                if let Err(e) = self.run(listener, ()) {
                    // keep undelivered notifications for subsequent passes
                    let mut queue = self.0.queue.borrow_mut();
                    let mut rest = pass[i + 1..].to_vec();
                    rest.append(&mut queue);
                    *queue = rest;
                    drop(queue);
                    return Err(e);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // commands
    // ------------------------------------------------------------------

    /// Invoke a command's write body with scoped store access.
    ///
    /// Nested writes flush as they happen, so notifications staged before a
    /// synchronous error are still delivered before the error propagates.
    pub fn run<T: 'static, A: 'static>(
        &self,
        command: &Command<T, A>,
        args: A,
    ) -> Result<T, StoreError> {
        self.ensure(&command.0);
        let mut cx = CommandContext {
            store: self.clone(),
        };
        (command.0.write)(&mut cx, args)
    }

    /// Invoke an asynchronous command.
    ///
    /// The synchronous prefix of the write body runs before this call
    /// returns, so writes before its first suspension point have already
    /// flushed; each later cluster of synchronous writes flushes
    /// independently as the returned future is polled.
    pub fn run_future<T: 'static, A: 'static>(
        &self,
        command: &AsyncCommand<T, A>,
        args: A,
    ) -> impl Future<Output = Result<T, StoreError>> + 'static {
        self.ensure(&command.0);
        let cx = CommandContext {
            store: self.clone(),
        };
        let mut fut = (command.0.write)(cx, args);
        let waker = futures::task::noop_waker();
        let mut task_cx = std::task::Context::from_waker(&waker);
        match fut.as_mut().poll(&mut task_cx) {
            Poll::Ready(r) => Either::Left(ready(r)),
            Poll::Pending => Either::Right(fut),
        }
    }

    // ------------------------------------------------------------------
    // async computed
    // ------------------------------------------------------------------

    /// Resolve an asynchronous computed atom.
    ///
    /// Returns the in-flight invocation's future when one is current, a
    /// settled future when the cached value is clean, and otherwise starts a
    /// new invocation, aborting any superseded one.
    pub fn get_future<T: Clone + 'static>(
        &self,
        atom: &AsyncComputed<T>,
    ) -> impl Future<Output = Result<T, StoreError>> + 'static {
        let id = self.ensure(&atom.0);
        {
            let nodes = self.0.nodes.borrow();
            if let Some(n) = nodes.get(&id) {
                if !n.dirty {
                    if let Some(inv) = &n.invocation {
                        let shared = inv
                            .shared
                            .downcast_ref::<SharedFut<T>>()
                            .unwrap()
                            .clone();
                        return Either::Left(shared);
                    }
                    if let Some(v) = &n.value {
                        let v = v.downcast_ref::<T>().unwrap().clone();
                        return Either::Right(ready(Ok(v)));
                    }
                }
            }
        }
        Either::Left(self.start_invocation(atom, id))
    }

    /// Non-blocking snapshot of a settled asynchronous value.
    pub fn get_opt<T: Clone + 'static>(&self, atom: &AsyncComputed<T>) -> Option<T> {
        let nodes = self.0.nodes.borrow();
        let n = nodes.get(&atom.0.id)?;
        if n.dirty {
            return None;
        }
        n.value
            .as_ref()
            .map(|v| v.downcast_ref::<T>().unwrap().clone())
    }

    fn start_invocation<T: Clone + 'static>(
        &self,
        atom: &AsyncComputed<T>,
        id: AtomId,
    ) -> SharedFut<T> {
        let generation = {
            let mut nodes = self.0.nodes.borrow_mut();
            let n = nodes.get_mut(&id).expect("node exists after ensure");
            if let Some(old) = n.invocation.take() {
                old.abort.abort();
                trace!(?id, "aborted superseded invocation");
            }
            n.generation += 1;
            n.dirty = false;
            n.generation
        };
        // old edges are re-established as the new invocation reads
        self.commit_deps(id, Vec::new());
        let (abort, registration) = AbortHandle::new_pair();
        let cx = AsyncReadContext {
            store: self.downgrade(),
            sink: id,
            generation,
        };
        let user = (atom.0.read)(cx);
        // weak: the invocation is stored on the node, so a strong handle
        // here would keep the store alive through its own registry
        let store = self.downgrade();
        let fut = Abortable::new(user, registration).map(move |r| match r {
            Err(futures::future::Aborted) => Err(StoreError::Aborted),
            Ok(result) => {
                if let Some(inner) = store.upgrade() {
                    Store::from_inner(inner).settle::<T>(id, generation, &result);
                }
                result
            }
        });
        let shared: SharedFut<T> = fut.boxed_local().shared();
        {
            let mut nodes = self.0.nodes.borrow_mut();
            if let Some(n) = nodes.get_mut(&id) {
                n.invocation = Some(Invocation {
                    generation,
                    abort,
                    shared: Box::new(shared.clone()),
                });
            }
        }
        shared
    }

    /// Commit a finished invocation's result, unless a newer invocation has
    /// superseded it, in which case the result is discarded.
    fn settle<T: Clone + 'static>(
        &self,
        id: AtomId,
        generation: u64,
        result: &Result<T, StoreError>,
    ) {
        let settled_ok = {
            let mut nodes = self.0.nodes.borrow_mut();
            let Some(n) = nodes.get_mut(&id) else { return };
            match &n.invocation {
                Some(inv) if inv.generation == generation => {
                    n.invocation = None;
                    match result {
                        Ok(v) => {
                            n.value = Some(Box::new(v.clone()));
                            n.dirty = false;
                            true
                        }
                        Err(_) => {
                            n.dirty = true;
                            false
                        }
                    }
                }
                _ => {
                    trace!(?id, "discarded superseded async result");
                    false
                }
            }
        };
        if settled_ok {
            self.invalidate(id);
            if let Err(e) = self.flush() {
                trace!(error = %e, "listener failed during async settle");
            }
        }
    }

    pub(crate) fn invocation_is_current(&self, id: AtomId, generation: u64) -> bool {
        let nodes = self.0.nodes.borrow();
        matches!(
            nodes.get(&id).and_then(|n| n.invocation.as_ref()),
            Some(inv) if inv.generation == generation
        )
    }

    // ------------------------------------------------------------------
    // sub / mount
    // ------------------------------------------------------------------

    /// Register a listener command on a target atom.
    ///
    /// The target is mounted; a computed target is evaluated once so its
    /// dependency set is known and mounted transitively. The listener runs
    /// once per flush pass in which any subscribed atom changed.
    pub fn sub(&self, target: impl Into<AnyAtom>, listener: &Command<(), ()>) -> Subscription {
        self.sub_many([target.into()], listener)
    }

    /// Register one listener command on several target atoms at once.
    pub fn sub_many(
        &self,
        targets: impl IntoIterator<Item = AnyAtom>,
        listener: &Command<(), ()>,
    ) -> Subscription {
        let mut entries = Vec::new();
        for target in targets {
            let id = target.0.id();
            target.0.clone().prime(self);
            self.mount_node(id, target.0.clone());
            let key = {
                let mut nodes = self.0.nodes.borrow_mut();
                let n = nodes.get_mut(&id).expect("node exists after prime");
                let m = n.mounted.as_mut().expect("node mounted by sub");
                m.listeners.insert(listener.clone())
            };
            entries.push((id, key));
        }
        Subscription::new(self.downgrade(), entries)
    }

    pub(crate) fn remove_listener(&self, id: AtomId, key: usize) {
        {
            let mut nodes = self.0.nodes.borrow_mut();
            let Some(n) = nodes.get_mut(&id) else { return };
            let Some(m) = n.mounted.as_mut() else { return };
            m.listeners.remove(key);
        }
        self.try_unmount(id);
    }

    fn mount_node(&self, id: AtomId, hold: Rc<dyn ErasedDef>) {
        let deps = {
            let mut nodes = self.0.nodes.borrow_mut();
            let Some(n) = nodes.get_mut(&id) else { return };
            if n.mounted.is_some() {
                return;
            }
            trace!(?id, "mount");
            n.mounted = Some(Mounted {
                listeners: SlabMap::new(),
                hold,
            });
            n.deps.clone()
        };
        for dep in deps {
            self.mount_id(dep);
        }
    }

    fn mount_id(&self, id: AtomId) {
        let hold = self
            .0
            .nodes
            .borrow()
            .get(&id)
            .and_then(|n| n.atom.upgrade());
        if let Some(hold) = hold {
            self.mount_node(id, hold);
        }
    }

    /// Unmount `id` if it is no longer reachable from any subscription, then
    /// recurse into its dependencies. A node whose atom descriptor has been
    /// dropped is reclaimed on the spot.
    fn try_unmount(&self, id: AtomId) {
        let deps = {
            let mut nodes = self.0.nodes.borrow_mut();
            {
                let Some(n) = nodes.get(&id) else { return };
                let Some(m) = n.mounted.as_ref() else { return };
                if !m.listeners.is_empty() {
                    return;
                }
                let still_used = n.dependents.iter().any(|d| {
                    nodes
                        .get(d)
                        .is_some_and(|dn| dn.mounted.is_some() && dn.deps.contains(&id))
                });
                if still_used {
                    return;
                }
            }
            let n = nodes.get_mut(&id).expect("checked above");
            trace!(?id, "unmount");
            n.mounted = None;
            let deps = n.deps.clone();
            if n.atom.upgrade().is_none() {
                remove_node(&mut nodes, id);
            }
            deps
        };
        for dep in deps {
            self.try_unmount(dep);
        }
    }

    // ------------------------------------------------------------------
    // collection
    // ------------------------------------------------------------------

    /// Reclaim nodes whose atom descriptor has been dropped.
    ///
    /// Mounted nodes are never reclaimed; the mount holds the only strong
    /// handle the store ever keeps. There is no per-atom delete operation.
    pub fn collect(&self) {
        let mut nodes = self.0.nodes.borrow_mut();
        let dead: Vec<AtomId> = nodes
            .iter()
            .filter(|(_, n)| {
                n.mounted.is_none() && n.invocation.is_none() && n.atom.upgrade().is_none()
            })
            .map(|(id, _)| *id)
            .collect();
        let removed = dead.len();
        for id in dead {
            remove_node(&mut nodes, id);
        }
        if removed > 0 {
            trace!(removed, "collect");
        }
    }
}

fn remove_node(nodes: &mut HashMap<AtomId, Node>, id: AtomId) {
    let Some(node) = nodes.remove(&id) else { return };
    for dep in &node.deps {
        if let Some(dn) = nodes.get_mut(dep) {
            dn.dependents.remove(&id);
        }
    }
    for dependent in &node.dependents {
        if let Some(dn) = nodes.get_mut(dependent) {
            dn.deps.retain(|d| *d != id);
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Store({} nodes)", self.0.nodes.borrow().len())
    }
}

// ----------------------------------------------------------------------------
// contexts
// ----------------------------------------------------------------------------

/// Scoped getter passed to computed derivations.
///
/// Every `get` resolves through the invoking store and records a dependency
/// edge for the atom being computed.
pub struct ReadContext {
    store: Store,
    sink: AtomId,
}

impl ReadContext {
    pub fn get<R: Readable>(&mut self, atom: &R) -> Result<R::Value, StoreError> {
        atom.read_in(&self.store, Some(self.sink))
    }
}

/// Scoped getter for asynchronous derivations.
///
/// Holds the invocation's token: once a newer invocation supersedes this
/// one, every call fails with [`StoreError::Aborted`] so the stale
/// continuation can unwind. Only a weak store handle is kept; a store
/// dropped mid-invocation reads as superseded.
#[derive(Clone)]
pub struct AsyncReadContext {
    store: Weak<StoreInner>,
    sink: AtomId,
    generation: u64,
}

impl AsyncReadContext {
    pub fn get<R: Readable>(&self, atom: &R) -> Result<R::Value, StoreError> {
        let Some(inner) = self.store.upgrade() else {
            return Err(StoreError::Aborted);
        };
        let store = Store::from_inner(inner);
        if !store.invocation_is_current(self.sink, self.generation) {
            return Err(StoreError::Aborted);
        }
        atom.read_in(&store, Some(self.sink))
    }
}

/// Scoped get/set capability passed to command write bodies.
///
/// Backed by the invoking store, so commands nest and recurse freely; there
/// is no transactional isolation between nested invocations.
pub struct CommandContext {
    store: Store,
}

impl CommandContext {
    pub fn get<R: Readable>(&self, atom: &R) -> Result<R::Value, StoreError> {
        self.store.get(atom)
    }
    pub fn get_future<T: Clone + 'static>(
        &self,
        atom: &AsyncComputed<T>,
    ) -> impl Future<Output = Result<T, StoreError>> + 'static {
        self.store.get_future(atom)
    }
    pub fn set<T: 'static>(&self, atom: &StateAtom<T>, value: T) -> Result<(), StoreError> {
        self.store.set(atom, value)
    }
    pub fn set_dedup<T: PartialEq + 'static>(
        &self,
        atom: &StateAtom<T>,
        value: T,
    ) -> Result<(), StoreError> {
        self.store.set_dedup(atom, value)
    }
    pub fn update<T: Clone + 'static>(
        &self,
        atom: &StateAtom<T>,
        f: impl FnOnce(T) -> T,
    ) -> Result<(), StoreError> {
        self.store.update(atom, f)
    }
    pub fn run<T: 'static, A: 'static>(
        &self,
        command: &Command<T, A>,
        args: A,
    ) -> Result<T, StoreError> {
        self.store.run(command, args)
    }
    pub fn run_future<T: 'static, A: 'static>(
        &self,
        command: &AsyncCommand<T, A>,
        args: A,
    ) -> impl Future<Output = Result<T, StoreError>> + 'static {
        self.store.run_future(command, args)
    }
}

// ----------------------------------------------------------------------------
// read dispatch
// ----------------------------------------------------------------------------

mod sealed {
    pub trait Sealed {}
}

/// Atoms that can be resolved to a value through [`Store::get`].
pub trait Readable: sealed::Sealed {
    type Value: 'static;
    #[doc(hidden)]
    fn read_in(&self, store: &Store, track: Option<AtomId>) -> Result<Self::Value, StoreError>;
}

impl<T: Clone + 'static> sealed::Sealed for StateAtom<T> {}
impl<T: Clone + 'static> Readable for StateAtom<T> {
    type Value = T;
    fn read_in(&self, store: &Store, track: Option<AtomId>) -> Result<T, StoreError> {
        store.state_value(self, track)
    }
}

impl<T: Clone + 'static> sealed::Sealed for Computed<T> {}
impl<T: Clone + 'static> Readable for Computed<T> {
    type Value = T;
    fn read_in(&self, store: &Store, track: Option<AtomId>) -> Result<T, StoreError> {
        let id = store.ensure(&self.0);
        if let Some(sink) = track {
            store.record_dep(sink, id);
        }
        store.compute_if_stale(id, &self.0.read)
    }
}

impl<T: Clone + 'static, A: 'static> sealed::Sealed for Command<T, A> {}
impl<T: Clone + 'static, A: 'static> Readable for Command<T, A> {
    type Value = T;
    fn read_in(&self, store: &Store, track: Option<AtomId>) -> Result<T, StoreError> {
        let read = self.0.read.as_ref().ok_or(StoreError::Unreadable)?;
        let id = store.ensure(&self.0);
        if let Some(sink) = track {
            store.record_dep(sink, id);
        }
        store.compute_if_stale(id, read)
    }
}
