//! The public facade: a per-thread overridable value with an optional
//! process-wide fallback.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::trace;

use crate::chain::ScopeChain;
use crate::scope::Scope;

/// Error returned by [`ScopedVariable::current`] when the calling thread has
/// no active override and the variable was constructed without a fallback.
#[derive(Debug, Error)]
#[error("no value is set for this variable on the current thread and it has no fallback")]
pub struct EmptyAccessError;

/// Source of process-unique variable ids. Ids are never reused, so a chain
/// left behind by a dropped variable can never be reached through a later
/// one.
static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(0);

fn next_variable_id() -> u64 {
    NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    /// The calling thread's chains, keyed by variable id. A chain is created
    /// lazily on the thread's first push and torn down with the thread, or
    /// earlier if the variable itself is dropped on this thread.
    static CHAINS: RefCell<HashMap<u64, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

/// A value that can be overridden "for the duration of a block" on the
/// calling thread.
///
/// Reads resolve to the innermost override pushed by the calling thread via
/// [`use_value`](Self::use_value), falling back to the value given to
/// [`with_fallback`](Self::with_fallback), if any. Every thread has its own
/// fully independent stack of overrides, so a shared `ScopedVariable` never
/// needs locking and never leaks one thread's override into another.
#[derive(Debug)]
pub struct ScopedVariable<T> {
    id: u64,
    fallback: Option<T>,
}

impl<T: 'static> ScopedVariable<T> {
    /// Creates a variable with no fallback: reads fail (or yield the type's
    /// default) until the calling thread pushes an override.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: next_variable_id(),
            fallback: None,
        }
    }

    /// Creates a variable that resolves to `fallback` whenever the calling
    /// thread has no active override.
    #[must_use]
    pub fn with_fallback(fallback: T) -> Self {
        Self {
            id: next_variable_id(),
            fallback: Some(fallback),
        }
    }

    /// True if a read would produce a value: the calling thread has an
    /// active override, or the variable has a fallback.
    #[must_use]
    pub fn has_current(&self) -> bool {
        self.fallback.is_some() || self.peek(|top| top.is_some())
    }

    /// The innermost override on the calling thread, or the fallback.
    pub fn current(&self) -> Result<T, EmptyAccessError>
    where
        T: Clone,
    {
        self.peek(|top| match top {
            Some(value) => Ok(value.clone()),
            None => self.fallback.clone().ok_or(EmptyAccessError),
        })
    }

    /// Like [`current`](Self::current), but yields `T::default()` instead of
    /// failing when neither an override nor a fallback exists.
    #[must_use]
    pub fn current_or_default(&self) -> T
    where
        T: Clone + Default,
    {
        self.peek(|top| match top {
            Some(value) => value.clone(),
            None => self.fallback.clone().unwrap_or_default(),
        })
    }

    /// Pushes `value` as the calling thread's innermost override.
    ///
    /// The override stays visible on this thread until the returned [`Scope`]
    /// is released. Releasing an outer scope discards every override nested
    /// inside it, outstanding handles included.
    pub fn use_value(&self, value: T) -> Scope<'_, T> {
        let position = self.with_chain(|chain| chain.push(value));
        trace!(variable = self.id, position, "pushed override");
        Scope::new(self, position)
    }

    /// Runs `f` with `value` as the calling thread's innermost override,
    /// releasing it on every exit path, including unwind.
    ///
    /// ```
    /// use threadvar::ScopedVariable;
    ///
    /// let tenant = ScopedVariable::with_fallback("public");
    /// let report = tenant.with_value("acme", || format!("tenant={}", tenant.current_or_default()));
    /// assert_eq!(report, "tenant=acme");
    /// assert_eq!(tenant.current_or_default(), "public");
    /// ```
    pub fn with_value<R>(&self, value: T, f: impl FnOnce() -> R) -> R {
        let _scope = self.use_value(value);
        f()
    }

    /// Truncates the calling thread's chain back to `position`, discarding
    /// the frame pushed there and everything after it. No-op when the chain
    /// is already at or below `position`, or when this thread never had one.
    ///
    /// Best-effort during thread teardown: a scope dropped after the
    /// registry itself was destroyed has nothing left to revert.
    pub(crate) fn truncate(&self, position: usize) {
        let _ = CHAINS.try_with(|chains| {
            let mut chains = chains.borrow_mut();
            if let Some(chain) = chains.get_mut(&self.id) {
                let chain: &mut ScopeChain<T> = chain
                    .downcast_mut()
                    .expect("a chain is only ever stored under its own variable's id");
                chain.truncate_to(position);
                trace!(variable = self.id, position, depth = chain.len(), "released override");
            }
        });
    }

    /// Reads the calling thread's chain top without materializing a chain on
    /// threads that never pushed one.
    fn peek<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        CHAINS.with(|chains| {
            let chains = chains.borrow();
            let top = chains
                .get(&self.id)
                .map(|chain| {
                    chain
                        .downcast_ref::<ScopeChain<T>>()
                        .expect("a chain is only ever stored under its own variable's id")
                })
                .and_then(ScopeChain::top);
            f(top)
        })
    }

    /// Runs `f` on the calling thread's chain, creating it on first use.
    fn with_chain<R>(&self, f: impl FnOnce(&mut ScopeChain<T>) -> R) -> R {
        CHAINS.with(|chains| {
            let mut chains = chains.borrow_mut();
            let chain = chains
                .entry(self.id)
                .or_insert_with(|| Box::new(ScopeChain::<T>::new()));
            f(chain
                .downcast_mut()
                .expect("a chain is only ever stored under its own variable's id"))
        })
    }
}

impl<T: 'static> Default for ScopedVariable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ScopedVariable<T> {
    /// Reclaims the calling thread's chain. Chains on other threads are
    /// unreachable once the variable is gone (ids are never reused) and die
    /// with their threads.
    fn drop(&mut self) {
        let _ = CHAINS.try_with(|chains| chains.borrow_mut().remove(&self.id));
    }
}
