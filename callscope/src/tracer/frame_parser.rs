//! Stack line parsing for the two common engine formats.
//!
//! ```text
//! V8:      "    at name (https://host/file.js:12:5)"
//!          "    at https://host/file.js:12:5"
//! Gecko:   "name@https://host/file.js:12:5"
//!          "@https://host/file.js:12:5"
//! ```

use callscope_common::StackFrame;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

use crate::host::RawFrame;

static V8_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at\s+(?:(?:async\s+)?(?P<name>.+?)\s+\((?P<located>.+)\)|(?P<bare>.+?))\s*$")
        .expect("valid V8 frame pattern")
});

static GECKO_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<name>[^@]*)@(?P<link>.+?)\s*$").expect("valid Gecko frame pattern")
});

/// Locations that do not point at inspectable source.
fn is_opaque(link: &str) -> bool {
    link.is_empty()
        || link.starts_with("<anonymous>")
        || link.starts_with("eval at ")
        || link == "native"
        || link == "[native code]"
}

fn build_frame(name: Option<&str>, link: &str) -> Option<StackFrame> {
    let link = link.trim();
    if is_opaque(link) {
        return None;
    }
    let name = name.map(str::trim).filter(|name| !name.is_empty() && *name != link);
    Some(StackFrame { name: name.map(str::to_owned), link: link.to_owned() })
}

/// Parse one formatted stack line. Returns `None` for lines that are not
/// frames or whose location is anonymous or native.
#[must_use]
pub fn parse_line(line: &str) -> Option<StackFrame> {
    if let Some(caps) = V8_FRAME.captures(line) {
        let link = caps.name("located").or_else(|| caps.name("bare"))?;
        return build_frame(caps.name("name").map(|m| m.as_str()), link.as_str());
    }
    let caps = GECKO_FRAME.captures(line)?;
    build_frame(caps.name("name").map(|m| m.as_str()), caps.name("link")?.as_str())
}

/// One entry of a captured stack, text or structured.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StackLine<'a> {
    Text(&'a str),
    Raw(&'a RawFrame),
}

impl<'a> StackLine<'a> {
    /// Cheap syntactic check that filters out the marker line.
    pub(crate) fn looks_like_frame(&self) -> bool {
        match self {
            StackLine::Text(line) => {
                let trimmed = line.trim_start();
                trimmed.starts_with("at ") || trimmed.contains('@')
            }
            StackLine::Raw(_) => true,
        }
    }

    pub(crate) fn is_self(&self, signature: &str) -> bool {
        if signature.is_empty() {
            return false;
        }
        match self {
            StackLine::Text(line) => line.contains(signature),
            StackLine::Raw(frame) => frame.location.as_deref().is_some_and(|l| l.contains(signature)),
        }
    }

    /// Text that feeds the digest.
    pub(crate) fn key(&self) -> Cow<'a, str> {
        match self {
            StackLine::Text(line) => Cow::Borrowed(line.trim()),
            StackLine::Raw(frame) => Cow::Owned(format!(
                "at {} ({})",
                frame.function.as_deref().unwrap_or_default(),
                frame.location.as_deref().unwrap_or_default()
            )),
        }
    }

    pub(crate) fn to_frame(self) -> Option<StackFrame> {
        match self {
            StackLine::Text(line) => parse_line(line),
            StackLine::Raw(frame) => {
                build_frame(frame.function.as_deref(), frame.location.as_deref().unwrap_or_default())
            }
        }
    }
}
