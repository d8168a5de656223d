//! RAII release handles for pushed overrides.

use std::fmt;
use std::marker::PhantomData;

use crate::variable::ScopedVariable;

/// Release handle for one pushed override, returned by
/// [`ScopedVariable::use_value`].
///
/// Dropping the handle reverts the variable on the calling thread to whatever
/// was innermost before the push. Releasing an outer scope implicitly
/// discards every scope nested inside it, and a handle whose frame was
/// already discarded that way releases as a no-op, so reordered releases are
/// always safe.
///
/// A scope must be released by the thread that created it and cannot be sent
/// to another one:
///
/// ```compile_fail
/// use std::sync::LazyLock;
/// use threadvar::ScopedVariable;
///
/// static VARIABLE: LazyLock<ScopedVariable<u32>> = LazyLock::new(ScopedVariable::new);
///
/// let scope = VARIABLE.use_value(1);
/// std::thread::spawn(move || drop(scope)).join().unwrap();
/// ```
#[must_use = "dropping the scope reverts the override immediately"]
pub struct Scope<'var, T: 'static> {
    variable: &'var ScopedVariable<T>,
    position: usize,
    /// Pins the handle to the thread whose chain holds its frame.
    _not_send: PhantomData<*const ()>,
}

impl<'var, T: 'static> Scope<'var, T> {
    pub(crate) fn new(variable: &'var ScopedVariable<T>, position: usize) -> Self {
        Self {
            variable,
            position,
            _not_send: PhantomData,
        }
    }

    /// Releases the override now rather than at the end of the enclosing
    /// block. Equivalent to dropping the handle.
    pub fn release(self) {}
}

impl<T: 'static> Drop for Scope<'_, T> {
    fn drop(&mut self) {
        self.variable.truncate(self.position);
    }
}

impl<T: 'static> fmt::Debug for Scope<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
