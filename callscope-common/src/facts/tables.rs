//! Fact definitions and decoding tables, one module per capability.
//!
//! Bits are scoped to their capability: `timer::BAD_DELAY` and
//! `idle::BAD_DELAY` may share a bit position without conflict because a
//! record's mask is only ever decoded with its own capability's table.

use super::{Fact, FactInfo, FactTable};

pub mod timer {
    use super::{Fact, FactInfo};

    pub const NOT_A_FUNCTION: Fact = Fact::bit(0);
    pub const BAD_DELAY: Fact = Fact::bit(1);
    pub const BAD_HANDLER: Fact = Fact::bit(2);
    pub const NOT_FOUND: Fact = Fact::bit(3);

    pub static FACTS: &[FactInfo] = &[
        FactInfo {
            fact: NOT_A_FUNCTION,
            tag: "NOT_A_FUNCTION",
            detail: "callback is a code string and will be evaluated when it fires",
        },
        FactInfo {
            fact: BAD_DELAY,
            tag: "BAD_DELAY",
            detail: "delay is not a finite non-negative number",
        },
        FactInfo {
            fact: BAD_HANDLER,
            tag: "BAD_HANDLER",
            detail: "handle is not a positive integer",
        },
        FactInfo {
            fact: NOT_FOUND,
            tag: "NOT_FOUND",
            detail: "no pending timer with this handle",
        },
    ];
}

pub mod eval {
    use super::{Fact, FactInfo};

    pub const USES_LOCAL_SCOPE: Fact = Fact::bit(0);
    pub const USES_GLOBAL_SCOPE: Fact = Fact::bit(1);
    pub const THROWS: Fact = Fact::bit(2);

    pub static FACTS: &[FactInfo] = &[
        FactInfo {
            fact: USES_LOCAL_SCOPE,
            tag: "USES_LOCAL_SCOPE",
            detail: "code references names that only exist in the caller's local scope",
        },
        FactInfo {
            fact: USES_GLOBAL_SCOPE,
            tag: "USES_GLOBAL_SCOPE",
            detail: "code evaluated successfully in global scope",
        },
        FactInfo { fact: THROWS, tag: "THROWS", detail: "evaluation raised an error" },
    ];
}

pub mod animation {
    use super::{Fact, FactInfo};

    pub const BAD_HANDLER: Fact = Fact::bit(0);
    pub const NOT_FOUND: Fact = Fact::bit(1);

    pub static FACTS: &[FactInfo] = &[
        FactInfo {
            fact: BAD_HANDLER,
            tag: "BAD_HANDLER",
            detail: "handle is not a positive integer",
        },
        FactInfo {
            fact: NOT_FOUND,
            tag: "NOT_FOUND",
            detail: "no pending animation frame with this handle",
        },
    ];
}

pub mod idle {
    use super::{Fact, FactInfo};

    pub const BAD_DELAY: Fact = Fact::bit(0);
    pub const BAD_HANDLER: Fact = Fact::bit(1);
    pub const NOT_FOUND: Fact = Fact::bit(2);

    pub static FACTS: &[FactInfo] = &[
        FactInfo {
            fact: BAD_DELAY,
            tag: "BAD_DELAY",
            detail: "timeout option is not a finite non-negative number",
        },
        FactInfo {
            fact: BAD_HANDLER,
            tag: "BAD_HANDLER",
            detail: "handle is not a positive integer",
        },
        FactInfo {
            fact: NOT_FOUND,
            tag: "NOT_FOUND",
            detail: "no pending idle callback with this handle",
        },
    ];
}

pub mod scheduler {
    use super::{Fact, FactInfo};

    pub const BAD_DELAY: Fact = Fact::bit(0);

    pub static FACTS: &[FactInfo] = &[FactInfo {
        fact: BAD_DELAY,
        tag: "BAD_DELAY",
        detail: "delay option is not a finite non-negative number",
    }];
}

pub mod worker {
    use super::{Fact, FactInfo};

    pub const MAX_ONLINE: Fact = Fact::bit(0);
    pub const DUPLICATE_ADDITION: Fact = Fact::bit(1);
    pub const NOT_FOUND: Fact = Fact::bit(2);

    pub static FACTS: &[FactInfo] = &[
        FactInfo {
            fact: MAX_ONLINE,
            tag: "MAX_ONLINE",
            detail: "more live instances than the hardware concurrency hint",
        },
        FactInfo {
            fact: DUPLICATE_ADDITION,
            tag: "DUPLICATE_ADDITION",
            detail: "listener was already registered for this event type",
        },
        FactInfo {
            fact: NOT_FOUND,
            tag: "NOT_FOUND",
            detail: "removed a listener that was never added",
        },
    ];
}

/// Every capability's table keyed by its snapshot name.
#[must_use]
pub fn all_tables() -> [(&'static str, FactTable); 6] {
    [
        ("timers", timer::FACTS),
        ("eval", eval::FACTS),
        ("animation", animation::FACTS),
        ("idle", idle::FACTS),
        ("scheduler", scheduler::FACTS),
        ("worker", worker::FACTS),
    ]
}
