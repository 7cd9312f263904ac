//! Values crossing the host boundary.
//!
//! Objects and arrays are shared and mutable, so a value graph may contain
//! cycles. `Debug` is written by hand and never recurses into containers.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::domain::Handle;

/// A host object without enumerable structure (a DOM node, a buffer, ...).
#[derive(Debug)]
pub struct OpaqueObject {
    /// Constructor name shown in placeholders
    pub kind: String,
}

/// Shared list of object properties in insertion order.
pub type Properties = Rc<RefCell<Vec<(String, HostValue)>>>;

#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Symbol with an optional description
    Symbol(Option<String>),
    /// Function with an optional name
    Function(Option<String>),
    Array(Rc<RefCell<Vec<HostValue>>>),
    Object(Properties),
    Opaque(Rc<OpaqueObject>),
    /// Property whose getter throws the given message when read
    Throwing(String),
}

impl HostValue {
    #[must_use]
    pub fn array(items: Vec<HostValue>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        let entries = entries.into_iter().map(|(key, value)| (key.into(), value)).collect();
        Self::Object(Rc::new(RefCell::new(entries)))
    }

    #[must_use]
    pub fn opaque(kind: impl Into<String>) -> Self {
        Self::Opaque(Rc::new(OpaqueObject { kind: kind.into() }))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Positive integer number that fits a host handle.
    #[must_use]
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && *n >= 1.0 && *n <= f64::from(u32::MAX) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                Some(Handle(*n as u32))
            }
            _ => None,
        }
    }

    /// String conversion the way the host's `String(value)` renders it.
    /// An array already being rendered further up renders as `""`.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        self.display_with(&mut HashSet::new())
    }

    fn display_with(&self, visiting: &mut HashSet<*const RefCell<Vec<HostValue>>>) -> String {
        match self {
            Self::Undefined => "undefined".to_owned(),
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            Self::Symbol(description) => {
                format!("Symbol({})", description.as_deref().unwrap_or_default())
            }
            Self::Function(name) => {
                format!("function {}() {{ [native code] }}", name.as_deref().unwrap_or_default())
            }
            Self::Array(items) => {
                let ptr = Rc::as_ptr(items);
                if !visiting.insert(ptr) {
                    return String::new();
                }
                let rendered = items
                    .try_borrow()
                    .map(|items| {
                        items.iter().map(|item| item.display_with(visiting)).collect::<Vec<_>>().join(",")
                    })
                    .unwrap_or_default();
                visiting.remove(&ptr);
                rendered
            }
            Self::Object(_) => "[object Object]".to_owned(),
            Self::Opaque(object) => format!("[object {}]", object.kind),
            Self::Throwing(message) => format!("[Exception: {message}]"),
        }
    }
}

/// Number formatting matching the host: integral values print without a
/// fraction, non-finite values by name.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        (if n > 0.0 { "Infinity" } else { "-Infinity" }).to_owned()
    } else if n == 0.0 {
        "0".to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Symbol(d) => write!(f, "Symbol({d:?})"),
            Self::Function(name) => write!(f, "Function({name:?})"),
            Self::Array(items) => write!(f, "Array(@{:p})", Rc::as_ptr(items)),
            Self::Object(props) => write!(f, "Object(@{:p})", Rc::as_ptr(props)),
            Self::Opaque(object) => write!(f, "Opaque({})", object.kind),
            Self::Throwing(message) => write!(f, "Throwing({message:?})"),
        }
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Handle> for HostValue {
    fn from(handle: Handle) -> Self {
        Self::Number(f64::from(handle.0))
    }
}
