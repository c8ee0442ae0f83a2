//! Backends a caller can actually use, passed in explicitly instead of being
//! probed from the environment inside the converter.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::runtime::BackendKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    backends: BTreeSet<BackendKind>,
}

/// The requested backend is not among the caller's capabilities. This is a
/// result, not a conversion failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("backend `{backend}` is unavailable (available: {available:?})")]
pub struct CapabilityUnavailable {
    pub backend: BackendKind,
    pub available: Vec<BackendKind>,
}

impl Capabilities {
    pub fn all() -> Self {
        BackendKind::ALL.into_iter().collect()
    }

    pub fn none() -> Self {
        Self {
            backends: BTreeSet::new(),
        }
    }

    pub fn with(mut self, backend: BackendKind) -> Self {
        self.backends.insert(backend);
        self
    }

    pub fn without(mut self, backend: BackendKind) -> Self {
        self.backends.remove(&backend);
        self
    }

    pub fn supports(&self, backend: BackendKind) -> bool {
        self.backends.contains(&backend)
    }

    pub fn backends(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.backends.iter().copied()
    }

    pub fn require(&self, backend: BackendKind) -> Result<(), CapabilityUnavailable> {
        if self.supports(backend) {
            Ok(())
        } else {
            Err(CapabilityUnavailable {
                backend,
                available: self.backends().collect(),
            })
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<BackendKind> for Capabilities {
    fn from_iter<I: IntoIterator<Item = BackendKind>>(iter: I) -> Self {
        Self {
            backends: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_backend_is_reported_with_alternatives() {
        let caps = Capabilities::all().without(BackendKind::Reference);
        assert!(caps.supports(BackendKind::Ndarray));
        let missing = caps.require(BackendKind::Reference).unwrap_err();
        assert_eq!(missing.backend, BackendKind::Reference);
        assert_eq!(missing.available, vec![BackendKind::Ndarray]);
        assert!(missing.to_string().contains("reference"));
    }

    #[test]
    fn empty_capabilities_support_nothing() {
        let caps = Capabilities::none();
        for kind in BackendKind::ALL {
            assert!(caps.require(kind).is_err());
        }
        assert!(Capabilities::none().with(BackendKind::Ndarray).supports(BackendKind::Ndarray));
    }
}
