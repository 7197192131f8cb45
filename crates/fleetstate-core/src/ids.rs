//! Core name types for fleetstate.
//!
//! This module provides strongly-typed names for services, units and charms.
//! Every name is validated on construction, so a value of one of these types
//! always satisfies its naming grammar.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SERVICE_SNIPPET: &str = "[a-z][a-z0-9]*(?:-[a-z0-9]*[a-z][a-z0-9]*)*";
const NUMBER_SNIPPET: &str = "(?:0|[1-9][0-9]*)";

static VALID_SERVICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{SERVICE_SNIPPET}$")).expect("valid service pattern"));

static VALID_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^({SERVICE_SNIPPET})/({NUMBER_SNIPPET})$")).expect("valid unit pattern")
});

static VALID_CHARM_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "^(cs|local):([a-z]+[a-z0-9]*)/({SERVICE_SNIPPET})-({NUMBER_SNIPPET})$"
    ))
    .expect("valid charm url pattern")
});

/// Returns whether `name` is a valid service name.
#[must_use]
pub fn is_service_name(name: &str) -> bool {
    VALID_SERVICE.is_match(name)
}

/// Returns whether `name` is a valid unit name (`<service>/<n>`).
#[must_use]
pub fn is_unit_name(name: &str) -> bool {
    VALID_UNIT.is_match(name)
}

/// The name of a deployed service.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    /// Parse a service name.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidServiceName` if the name does not match the grammar.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        if is_service_name(&name) {
            Ok(Self(name))
        } else {
            Err(IdError::InvalidServiceName(name))
        }
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the name of this service's unit with the given number.
    #[must_use]
    pub fn unit(&self, number: u64) -> UnitName {
        UnitName(format!("{}/{number}", self.0))
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceName({})", self.0)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The name of a unit, `<service>/<n>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitName(String);

impl UnitName {
    /// Parse a unit name.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidUnitName` if the name does not match the grammar.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        if is_unit_name(&name) {
            Ok(Self(name))
        } else {
            Err(IdError::InvalidUnitName(name))
        }
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the name of the service this unit belongs to.
    #[must_use]
    pub fn service(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(svc, _)| svc)
    }

    /// Return the unit's sequence number within its service.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.0
            .rsplit_once('/')
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Debug for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitName({})", self.0)
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UnitName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UnitName {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitName> for String {
    fn from(name: UnitName) -> Self {
        name.0
    }
}

impl AsRef<str> for UnitName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a charm comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharmSchema {
    /// The public charm store.
    Store,
    /// A local charm repository.
    Local,
}

impl CharmSchema {
    /// Return the URL prefix for this schema.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Store => "cs",
            Self::Local => "local",
        }
    }
}

/// A charm URL, `<schema>:<series>/<name>-<revision>`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CharmUrl {
    schema: CharmSchema,
    series: String,
    name: String,
    revision: u32,
}

impl CharmUrl {
    /// Parse a charm URL.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidCharmUrl` if the URL is malformed.
    pub fn parse(url: &str) -> Result<Self, IdError> {
        let invalid = || IdError::InvalidCharmUrl(url.to_string());
        let caps = VALID_CHARM_URL.captures(url).ok_or_else(invalid)?;
        let schema = match &caps[1] {
            "cs" => CharmSchema::Store,
            _ => CharmSchema::Local,
        };
        let revision = caps[4].parse().map_err(|_| invalid())?;
        Ok(Self {
            schema,
            series: caps[2].to_string(),
            name: caps[3].to_string(),
            revision,
        })
    }

    /// Return the schema.
    #[must_use]
    pub const fn schema(&self) -> CharmSchema {
        self.schema
    }

    /// Return the series the charm targets.
    #[must_use]
    pub fn series(&self) -> &str {
        &self.series
    }

    /// Return the charm name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the charm revision.
    #[must_use]
    pub const fn revision(&self) -> u32 {
        self.revision
    }

    /// Return the same charm at a different revision.
    #[must_use]
    pub fn with_revision(&self, revision: u32) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }
}

impl fmt::Debug for CharmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CharmUrl({self})")
    }
}

impl fmt::Display for CharmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}-{}",
            self.schema.as_str(),
            self.series,
            self.name,
            self.revision
        )
    }
}

impl FromStr for CharmUrl {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CharmUrl {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CharmUrl> for String {
    fn from(url: CharmUrl) -> Self {
        url.to_string()
    }
}

/// Errors that can occur when parsing names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid service name.
    #[error("{0:?} is not a valid service name")]
    InvalidServiceName(String),

    /// The input is not a valid unit name.
    #[error("{0:?} is not a valid unit name")]
    InvalidUnitName(String),

    /// The input is not a valid charm URL.
    #[error("{0:?} is not a valid charm URL")]
    InvalidCharmUrl(String),
}
