//! Which capabilities are currently routed through their wrapper.

use log::{debug, warn};
use std::cell::RefCell;
use std::collections::BTreeSet;

use crate::domain::{Capability, RegistryError};

#[derive(Debug, Default)]
pub struct InterceptionRegistry {
    installed: RefCell<BTreeSet<Capability>>,
}

impl InterceptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `capability` through its wrapper. Returns `false` if it already was.
    pub fn install(&self, capability: Capability) -> bool {
        let fresh = self.installed.borrow_mut().insert(capability);
        if fresh {
            debug!("installed {capability} interception");
        } else {
            debug!("{capability} interception already installed, ignoring");
        }
        fresh
    }

    /// Restore direct host routing. Returns `false` if it was not installed.
    ///
    /// # Errors
    /// `eval` cannot be uninstalled once installed.
    pub fn uninstall(&self, capability: Capability) -> Result<bool, RegistryError> {
        if capability == Capability::Eval && self.is_installed(capability) {
            warn!("refusing to uninstall {capability}: replacement is irreversible");
            return Err(RegistryError::Irreversible(capability));
        }
        let removed = self.installed.borrow_mut().remove(&capability);
        if removed {
            debug!("uninstalled {capability} interception");
        }
        Ok(removed)
    }

    #[must_use]
    pub fn is_installed(&self, capability: Capability) -> bool {
        self.installed.borrow().contains(&capability)
    }

    #[must_use]
    pub fn installed(&self) -> Vec<Capability> {
        self.installed.borrow().iter().copied().collect()
    }
}
