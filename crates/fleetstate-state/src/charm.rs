//! Charms stored in state.

use std::fmt;

use fleetstate_core::{CharmMeta, CharmUrl};

use crate::docs::CharmDoc;

/// A charm known to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charm {
    doc: CharmDoc,
}

impl Charm {
    pub(crate) const fn new(doc: CharmDoc) -> Self {
        Self { doc }
    }

    /// The charm URL.
    #[must_use]
    pub const fn url(&self) -> &CharmUrl {
        &self.doc.url
    }

    /// The charm metadata.
    #[must_use]
    pub const fn meta(&self) -> &CharmMeta {
        &self.doc.meta
    }
}

impl fmt::Display for Charm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.doc.url, f)
    }
}
