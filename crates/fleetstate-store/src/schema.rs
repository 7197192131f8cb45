//! Database schema definitions and column families.
//!
//! Each document collection lives in its own `RocksDB` column family, keyed by
//! the document id.

use std::fmt;

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Service documents, keyed by service name.
    pub const SERVICES: &str = "services";

    /// Unit documents, keyed by unit name.
    pub const UNITS: &str = "units";

    /// Relation documents, keyed by relation key.
    pub const RELATIONS: &str = "relations";

    /// Charm documents, keyed by charm URL.
    pub const CHARMS: &str = "charms";

    /// Settings documents, keyed by the owner's global key.
    pub const SETTINGS: &str = "settings";

    /// Named counters.
    pub const SEQUENCES: &str = "sequences";
}

/// A document collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    /// Services.
    Services,
    /// Units.
    Units,
    /// Relations.
    Relations,
    /// Charms.
    Charms,
    /// Settings.
    Settings,
    /// Named counters.
    Sequences,
}

impl Collection {
    /// Return the column family backing this collection.
    #[must_use]
    pub const fn cf_name(self) -> &'static str {
        match self {
            Self::Services => cf::SERVICES,
            Self::Units => cf::UNITS,
            Self::Relations => cf::RELATIONS,
            Self::Charms => cf::CHARMS,
            Self::Settings => cf::SETTINGS,
            Self::Sequences => cf::SEQUENCES,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cf_name())
    }
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::SERVICES,
        cf::UNITS,
        cf::RELATIONS,
        cf::CHARMS,
        cf::SETTINGS,
        cf::SEQUENCES,
    ]
}
