use lode_store::LeaseId;

/// Proof that the registry lease is held.
///
/// Only [`RegistryPersister::acquire_lease`] creates guards, and
/// [`RegistryPersister::save`] refuses to run without one. Releasing
/// consumes the guard, so a released lease cannot be presented again.
///
/// [`RegistryPersister::acquire_lease`]: crate::RegistryPersister::acquire_lease
/// [`RegistryPersister::save`]: crate::RegistryPersister::save
#[derive(Debug)]
#[must_use = "a lease guard must be released"]
pub struct LeaseGuard {
    path: String,
    lease: LeaseId,
}

impl LeaseGuard {
    pub(crate) fn new(path: impl Into<String>, lease: LeaseId) -> Self {
        Self {
            path: path.into(),
            lease,
        }
    }

    /// Name of the leased registry document.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn lease_id(&self) -> &LeaseId {
        &self.lease
    }
}
