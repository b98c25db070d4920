use std::{
    cell::OnceCell,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use derive_ex::derive_ex;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::{
    store::{AsyncReadContext, CommandContext, ReadContext, Store},
    StoreError,
};


/// Process-unique identity of an atom.
///
/// Two atoms are the same atom iff their ids are equal; structural equality
/// of their contents is never consulted.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AtomId(u64);

impl AtomId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        AtomId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
    pub(crate) fn anon_label(self) -> String {
        format!("atom#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum AtomKind {
    State,
    Computed,
    Command,
}

pub(crate) type ReadFn<T> = dyn Fn(&mut ReadContext) -> Result<T, StoreError>;
pub(crate) type AsyncReadFn<T> =
    dyn Fn(AsyncReadContext) -> LocalBoxFuture<'static, Result<T, StoreError>>;
pub(crate) type WriteFn<T, A> = dyn Fn(&mut CommandContext, A) -> Result<T, StoreError>;
pub(crate) type AsyncWriteFn<T, A> =
    dyn Fn(CommandContext, A) -> LocalBoxFuture<'static, Result<T, StoreError>>;

/// Store-independent view of an atom descriptor.
///
/// Stores keep only `Weak` references to descriptors for unmounted nodes, so
/// dropping every user handle makes the node collectible.
pub(crate) trait ErasedDef: 'static {
    fn id(&self) -> AtomId;
    fn kind(&self) -> AtomKind;
    fn label(&self) -> Option<String>;
    /// Create the node for this atom in `store` and, for derivations,
    /// evaluate it once so its dependency set is known. Evaluation errors
    /// are ignored; they resurface on the next `get`.
    fn prime(self: Rc<Self>, store: &Store);
}

fn set_label(cell: &OnceCell<String>, label: impl Into<String>) {
    let _ = cell.set(label.into());
}

fn get_label(cell: &OnceCell<String>) -> Option<String> {
    cell.get().cloned()
}

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

pub(crate) struct StateDef<T> {
    pub(crate) id: AtomId,
    pub(crate) init: Option<T>,
    pub(crate) label: OnceCell<String>,
}

/// A settable cell atom.
///
/// The descriptor is immutable and store-independent; the same atom may be
/// used with any number of stores, each holding an independent value.
#[derive_ex(Clone, bound())]
pub struct StateAtom<T: 'static>(pub(crate) Rc<StateDef<T>>);

/// Create a state atom with the given initial value.
pub fn state<T: 'static>(init: T) -> StateAtom<T> {
    StateAtom(Rc::new(StateDef {
        id: AtomId::next(),
        init: Some(init),
        label: OnceCell::new(),
    }))
}

/// Create a state atom with no initial value.
///
/// Reading it before the first write fails with
/// [`StoreError::Uninitialized`]. Wrapper patterns use this as a resettable
/// placeholder.
pub fn state_uninit<T: 'static>() -> StateAtom<T> {
    StateAtom(Rc::new(StateDef {
        id: AtomId::next(),
        init: None,
        label: OnceCell::new(),
    }))
}

impl<T: 'static> StateAtom<T> {
    /// Attach a debug label. Metadata only, never part of identity.
    pub fn named(self, label: impl Into<String>) -> Self {
        set_label(&self.0.label, label);
        self
    }
    pub fn debug_label(&self) -> Option<String> {
        get_label(&self.0.label)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for StateAtom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0.init {
            Some(init) => write!(f, "StateAtom({init:?})"),
            None => write!(f, "StateAtom(<uninit>)"),
        }
    }
}

impl<T> Serialize for StateAtom<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        match &self.0.init {
            Some(init) => T::serialize(init, serializer),
            None => Err(serde::ser::Error::custom("uninitialized")),
        }
    }
}
impl<'de, T> Deserialize<'de> for StateAtom<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<StateAtom<T>, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(state)
    }
}

impl<T: 'static> ErasedDef for StateDef<T> {
    fn id(&self) -> AtomId {
        self.id
    }
    fn kind(&self) -> AtomKind {
        AtomKind::State
    }
    fn label(&self) -> Option<String> {
        get_label(&self.label)
    }
    fn prime(self: Rc<Self>, store: &Store) {
        store.ensure_node(&(self as Rc<dyn ErasedDef>));
    }
}

// ----------------------------------------------------------------------------
// Computed
// ----------------------------------------------------------------------------

pub(crate) struct ComputedDef<T> {
    pub(crate) id: AtomId,
    pub(crate) read: Box<ReadFn<T>>,
    pub(crate) label: OnceCell<String>,
}

/// A pure derivation over other atoms.
///
/// The `read` closure must be referentially stable for the atom's lifetime:
/// given the same dependency values it returns the same result.
#[derive_ex(Clone, bound())]
pub struct Computed<T: 'static>(pub(crate) Rc<ComputedDef<T>>);

/// Create a computed atom from a derivation closure.
///
/// Every `cx.get` inside the closure records a dependency edge; the edge set
/// is replaced wholesale on each execution, so conditional reads never leave
/// stale edges behind.
pub fn computed<T, F>(read: F) -> Computed<T>
where
    T: 'static,
    F: Fn(&mut ReadContext) -> Result<T, StoreError> + 'static,
{
    Computed(Rc::new(ComputedDef {
        id: AtomId::next(),
        read: Box::new(read),
        label: OnceCell::new(),
    }))
}

impl<T: 'static> Computed<T> {
    pub fn named(self, label: impl Into<String>) -> Self {
        set_label(&self.0.label, label);
        self
    }
    pub fn debug_label(&self) -> Option<String> {
        get_label(&self.0.label)
    }
}

impl<T: 'static> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Computed({})",
            self.debug_label().unwrap_or_else(|| self.0.id.anon_label())
        )
    }
}

impl<T: 'static> ErasedDef for ComputedDef<T> {
    fn id(&self) -> AtomId {
        self.id
    }
    fn kind(&self) -> AtomKind {
        AtomKind::Computed
    }
    fn label(&self) -> Option<String> {
        get_label(&self.label)
    }
    fn prime(self: Rc<Self>, store: &Store) {
        store.ensure_node(&(self.clone() as Rc<dyn ErasedDef>));
        store.prime_read(self.id, &self.read);
    }
}

// ----------------------------------------------------------------------------
// AsyncComputed
// ----------------------------------------------------------------------------

pub(crate) struct AsyncComputedDef<T> {
    pub(crate) id: AtomId,
    pub(crate) read: Box<AsyncReadFn<T>>,
    pub(crate) label: OnceCell<String>,
}

/// A derivation whose value is produced asynchronously.
///
/// Each invocation owns an abort token. Starting a newer invocation (because
/// a dependency changed) invalidates the previous token; results carrying an
/// invalidated token are discarded and the superseded continuation observes
/// [`StoreError::Aborted`] from its context. Only the most recently started
/// invocation's result is ever cached ("switch to latest").
#[derive_ex(Clone, bound())]
pub struct AsyncComputed<T: 'static>(pub(crate) Rc<AsyncComputedDef<T>>);

/// Create an asynchronous computed atom.
pub fn computed_async<T, F, Fut>(read: F) -> AsyncComputed<T>
where
    T: 'static,
    F: Fn(AsyncReadContext) -> Fut + 'static,
    Fut: std::future::Future<Output = Result<T, StoreError>> + 'static,
{
    use futures::FutureExt;
    AsyncComputed(Rc::new(AsyncComputedDef {
        id: AtomId::next(),
        read: Box::new(move |cx| read(cx).boxed_local()),
        label: OnceCell::new(),
    }))
}

impl<T: 'static> AsyncComputed<T> {
    pub fn named(self, label: impl Into<String>) -> Self {
        set_label(&self.0.label, label);
        self
    }
    pub fn debug_label(&self) -> Option<String> {
        get_label(&self.0.label)
    }
}

impl<T: 'static> std::fmt::Debug for AsyncComputed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AsyncComputed({})",
            self.debug_label().unwrap_or_else(|| self.0.id.anon_label())
        )
    }
}

impl<T: 'static> ErasedDef for AsyncComputedDef<T> {
    fn id(&self) -> AtomId {
        self.id
    }
    fn kind(&self) -> AtomKind {
        AtomKind::Computed
    }
    fn label(&self) -> Option<String> {
        get_label(&self.label)
    }
    fn prime(self: Rc<Self>, store: &Store) {
        // Dependencies of an async derivation are only discovered as its
        // future runs; mounting attaches them incrementally at that point.
        store.ensure_node(&(self as Rc<dyn ErasedDef>));
    }
}

// ----------------------------------------------------------------------------
// Command
// ----------------------------------------------------------------------------

pub(crate) struct CommandDef<T, A> {
    pub(crate) id: AtomId,
    pub(crate) write: Box<WriteFn<T, A>>,
    pub(crate) read: Option<Box<ReadFn<T>>>,
    pub(crate) label: OnceCell<String>,
}

/// An imperative action with access to the store's get/set capability.
///
/// Commands registered via [`Store::sub`](crate::Store::sub) are the
/// notification targets of the flush protocol.
#[derive_ex(Clone, bound())]
pub struct Command<T: 'static, A: 'static = ()>(pub(crate) Rc<CommandDef<T, A>>);

/// Create a command atom from a write closure.
pub fn command<T, A, F>(write: F) -> Command<T, A>
where
    T: 'static,
    A: 'static,
    F: Fn(&mut CommandContext, A) -> Result<T, StoreError> + 'static,
{
    Command(Rc::new(CommandDef {
        id: AtomId::next(),
        write: Box::new(write),
        read: None,
        label: OnceCell::new(),
    }))
}

/// Create a command that is also readable through the given derivation.
///
/// The usual pattern pairs the derivation with a state atom the write
/// updates, making the command's last invocation result queryable via `get`.
pub fn command_with_read<T, A, R, F>(read: R, write: F) -> Command<T, A>
where
    T: 'static,
    A: 'static,
    R: Fn(&mut ReadContext) -> Result<T, StoreError> + 'static,
    F: Fn(&mut CommandContext, A) -> Result<T, StoreError> + 'static,
{
    Command(Rc::new(CommandDef {
        id: AtomId::next(),
        write: Box::new(write),
        read: Some(Box::new(read)),
        label: OnceCell::new(),
    }))
}

impl<T: 'static, A: 'static> Command<T, A> {
    pub fn named(self, label: impl Into<String>) -> Self {
        set_label(&self.0.label, label);
        self
    }
    pub fn debug_label(&self) -> Option<String> {
        get_label(&self.0.label)
    }
}

impl<T: 'static, A: 'static> std::fmt::Debug for Command<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Command({})",
            self.debug_label().unwrap_or_else(|| self.0.id.anon_label())
        )
    }
}

impl<T: 'static, A: 'static> ErasedDef for CommandDef<T, A> {
    fn id(&self) -> AtomId {
        self.id
    }
    fn kind(&self) -> AtomKind {
        AtomKind::Command
    }
    fn label(&self) -> Option<String> {
        get_label(&self.label)
    }
    fn prime(self: Rc<Self>, store: &Store) {
        store.ensure_node(&(self.clone() as Rc<dyn ErasedDef>));
        if let Some(read) = &self.read {
            store.prime_read(self.id, read);
        }
    }
}

// ----------------------------------------------------------------------------
// AsyncCommand
// ----------------------------------------------------------------------------

pub(crate) struct AsyncCommandDef<T, A> {
    pub(crate) id: AtomId,
    pub(crate) write: Box<AsyncWriteFn<T, A>>,
    pub(crate) label: OnceCell<String>,
}

/// A command whose write body is asynchronous.
///
/// Each cluster of synchronous writes between suspension points flushes
/// independently, so one invocation can produce several temporally separated
/// notification passes.
#[derive_ex(Clone, bound())]
pub struct AsyncCommand<T: 'static, A: 'static = ()>(pub(crate) Rc<AsyncCommandDef<T, A>>);

/// Create an asynchronous command atom.
pub fn command_async<T, A, F, Fut>(write: F) -> AsyncCommand<T, A>
where
    T: 'static,
    A: 'static,
    F: Fn(CommandContext, A) -> Fut + 'static,
    Fut: std::future::Future<Output = Result<T, StoreError>> + 'static,
{
    use futures::FutureExt;
    AsyncCommand(Rc::new(AsyncCommandDef {
        id: AtomId::next(),
        write: Box::new(move |cx, args| write(cx, args).boxed_local()),
        label: OnceCell::new(),
    }))
}

impl<T: 'static, A: 'static> AsyncCommand<T, A> {
    pub fn named(self, label: impl Into<String>) -> Self {
        set_label(&self.0.label, label);
        self
    }
    pub fn debug_label(&self) -> Option<String> {
        get_label(&self.0.label)
    }
}

impl<T: 'static, A: 'static> std::fmt::Debug for AsyncCommand<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AsyncCommand({})",
            self.debug_label().unwrap_or_else(|| self.0.id.anon_label())
        )
    }
}

impl<T: 'static, A: 'static> ErasedDef for AsyncCommandDef<T, A> {
    fn id(&self) -> AtomId {
        self.id
    }
    fn kind(&self) -> AtomKind {
        AtomKind::Command
    }
    fn label(&self) -> Option<String> {
        get_label(&self.label)
    }
    fn prime(self: Rc<Self>, store: &Store) {
        store.ensure_node(&(self as Rc<dyn ErasedDef>));
    }
}

// ----------------------------------------------------------------------------
// AnyAtom
// ----------------------------------------------------------------------------

/// A type-erased atom handle.
///
/// Used as a subscription target and by the debug views; cloning preserves
/// identity.
#[derive(Clone)]
pub struct AnyAtom(pub(crate) Rc<dyn ErasedDef>);

impl AnyAtom {
    pub fn id(&self) -> AtomId {
        self.0.id()
    }
    pub fn debug_label(&self) -> Option<String> {
        self.0.label()
    }
}

impl std::fmt::Debug for AnyAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AnyAtom({})",
            self.debug_label().unwrap_or_else(|| self.id().anon_label())
        )
    }
}

impl<T: 'static> From<&StateAtom<T>> for AnyAtom {
    fn from(atom: &StateAtom<T>) -> Self {
        AnyAtom(atom.0.clone())
    }
}
impl<T: 'static> From<&Computed<T>> for AnyAtom {
    fn from(atom: &Computed<T>) -> Self {
        AnyAtom(atom.0.clone())
    }
}
impl<T: 'static> From<&AsyncComputed<T>> for AnyAtom {
    fn from(atom: &AsyncComputed<T>) -> Self {
        AnyAtom(atom.0.clone())
    }
}
impl<T: 'static, A: 'static> From<&Command<T, A>> for AnyAtom {
    fn from(atom: &Command<T, A>) -> Self {
        AnyAtom(atom.0.clone())
    }
}
impl<T: 'static, A: 'static> From<&AsyncCommand<T, A>> for AnyAtom {
    fn from(atom: &AsyncCommand<T, A>) -> Self {
        AnyAtom(atom.0.clone())
    }
}
