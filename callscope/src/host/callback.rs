//! Callable values with identity.

use std::fmt;
use std::rc::Rc;

/// A user-supplied function, optionally named.
///
/// Two callbacks are the *same* listener only if they share the same
/// allocation; clones of one `Callback` compare equal, separately created
/// closures with identical code do not.
pub struct Callback<A> {
    name: Option<Rc<str>>,
    func: Rc<dyn Fn(&A)>,
}

impl<A> Callback<A> {
    pub fn new(func: impl Fn(&A) + 'static) -> Self {
        Self { name: None, func: Rc::new(func) }
    }

    pub fn named(name: &str, func: impl Fn(&A) + 'static) -> Self {
        Self { name: Some(Rc::from(name)), func: Rc::new(func) }
    }

    pub fn call(&self, arg: &A) {
        (self.func)(arg);
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name as shown in history records.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or("anonymous")
    }

    /// Stable string form used to identify the callback when its call site
    /// cannot be traced.
    #[must_use]
    pub fn repr(&self) -> String {
        match self.name() {
            Some(name) => format!("function {name}"),
            None => format!("function@{:p}", Rc::as_ptr(&self.func).cast::<()>()),
        }
    }

    /// Identity comparison.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        std::ptr::eq(Rc::as_ptr(&self.func).cast::<()>(), Rc::as_ptr(&other.func).cast::<()>())
    }
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), func: Rc::clone(&self.func) }
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({})", self.display_name())
    }
}
