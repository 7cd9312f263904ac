//! Lossy, infallible conversion of host values into JSON for history records.
//!
//! Everything JSON cannot carry becomes a bracketed placeholder string:
//!
//! | value                       | placeholder                |
//! |-----------------------------|----------------------------|
//! | undefined                   | `[undefined]`              |
//! | NaN / ±Infinity             | `[NaN]`, `[Infinity]`, ... |
//! | symbol                      | `[Symbol(desc)]`           |
//! | function                    | `[Function: name]`         |
//! | opaque host object          | `[Kind #n]`                |
//! | container already on stack  | `[Circular #n]`            |
//! | container seen before       | `[Object #n]`/`[Array #n]` |
//! | throwing accessor           | `[Exception: message]`     |
//!
//! Numbers `#n` are assigned per pass in order of first placeholder, so the
//! same object always renders the same way within one call.

use serde_json::{Map, Number, Value};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::host::HostValue;

pub const UNDEFINED_PLACEHOLDER: &str = "[undefined]";

type Identity = *const ();

#[derive(Default)]
struct Cloner {
    ids: HashMap<Identity, usize>,
    on_stack: HashSet<Identity>,
    finished: HashSet<Identity>,
}

impl Cloner {
    fn placeholder_id(&mut self, identity: Identity) -> usize {
        let next = self.ids.len() + 1;
        *self.ids.entry(identity).or_insert(next)
    }

    /// Placeholder for a container that must not be expanded again.
    fn revisit(&mut self, identity: Identity, kind: &str) -> Option<Value> {
        if self.on_stack.contains(&identity) {
            let id = self.placeholder_id(identity);
            return Some(Value::String(format!("[Circular #{id}]")));
        }
        if self.finished.contains(&identity) {
            let id = self.placeholder_id(identity);
            return Some(Value::String(format!("[{kind} #{id}]")));
        }
        None
    }

    fn clone_value(&mut self, value: &HostValue) -> Value {
        match value {
            HostValue::Undefined => Value::String(UNDEFINED_PLACEHOLDER.to_owned()),
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(*b),
            HostValue::Number(n) => clone_number(*n),
            HostValue::String(s) => Value::String(s.clone()),
            HostValue::Symbol(description) => Value::String(format!(
                "[Symbol({})]",
                description.as_deref().unwrap_or_default()
            )),
            HostValue::Function(name) => Value::String(match name {
                Some(name) => format!("[Function: {name}]"),
                None => "[Function (anonymous)]".to_owned(),
            }),
            HostValue::Throwing(message) => Value::String(format!("[Exception: {message}]")),
            HostValue::Opaque(object) => {
                let id = self.placeholder_id(Rc::as_ptr(object).cast());
                Value::String(format!("[{} #{id}]", object.kind))
            }
            HostValue::Array(items) => {
                let identity = Rc::as_ptr(items).cast();
                if let Some(placeholder) = self.revisit(identity, "Array") {
                    return placeholder;
                }
                let Ok(items) = items.try_borrow() else {
                    return busy_placeholder();
                };
                self.on_stack.insert(identity);
                let cloned = items.iter().map(|item| self.clone_value(item)).collect();
                self.on_stack.remove(&identity);
                self.finished.insert(identity);
                Value::Array(cloned)
            }
            HostValue::Object(properties) => {
                let identity = Rc::as_ptr(properties).cast();
                if let Some(placeholder) = self.revisit(identity, "Object") {
                    return placeholder;
                }
                let Ok(properties) = properties.try_borrow() else {
                    return busy_placeholder();
                };
                self.on_stack.insert(identity);
                let mut map = Map::new();
                for (key, item) in properties.iter() {
                    let cloned = self.clone_value(item);
                    map.insert(key.clone(), cloned);
                }
                self.on_stack.remove(&identity);
                self.finished.insert(identity);
                Value::Object(map)
            }
        }
    }
}

fn clone_number(n: f64) -> Value {
    if n.is_nan() {
        Value::String("[NaN]".to_owned())
    } else if n.is_infinite() {
        Value::String(if n > 0.0 { "[Infinity]" } else { "[-Infinity]" }.to_owned())
    } else if n == 0.0 {
        Value::from(0)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn busy_placeholder() -> Value {
    Value::String("[Exception: value is being modified]".to_owned())
}

/// Convert `value` to JSON. Never fails.
#[must_use]
pub fn safe_clone(value: &HostValue) -> Value {
    Cloner::default().clone_value(value)
}
