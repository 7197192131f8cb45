//! Stored document layouts.
//!
//! Each entity keeps its state in one document. The field names here are
//! the ones transactions assert on and mutate, so they are shared through
//! the [`field`] constants rather than spelled out at each call site.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fleetstate_core::{CharmMeta, CharmUrl, Life, ServiceName, UnitName};
use fleetstate_store::{from_document, to_document, Collection, Document, Store, StoreError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::relation::Endpoint;
use crate::unit::UnitStatus;

/// Document field names.
pub(crate) mod field {
    pub const LIFE: &str = "life";
    pub const REVNO: &str = fleetstate_store::REVNO_FIELD;

    pub const CHARM_URL: &str = "charmurl";
    pub const FORCE_CHARM: &str = "forcecharm";
    pub const UNIT_SEQ: &str = "unitseq";
    pub const UNIT_COUNT: &str = "unitcount";
    pub const RELATION_COUNT: &str = "relationcount";
    pub const EXPOSED: &str = "exposed";

    pub const SERVICE: &str = "service";
    pub const STATUS: &str = "status";
    pub const STATUS_INFO: &str = "statusinfo";
    pub const STATUS_SINCE: &str = "statussince";
    pub const SUBORDINATES: &str = "subordinates";
    pub const MACHINE_ID: &str = "machineid";

    pub const ENDPOINT_SERVICES: &str = "endpoints.service";

    pub const VALUES: &str = "values";
    pub const COUNTER: &str = "counter";
}

/// A service record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDoc {
    /// Service name.
    #[serde(rename = "_id")]
    pub name: ServiceName,
    /// Charm the service's units run.
    #[serde(rename = "charmurl")]
    pub charm_url: CharmUrl,
    /// Whether units upgrade even when in an error state.
    #[serde(rename = "forcecharm", default)]
    pub force_charm: bool,
    /// Lifecycle state.
    #[serde(default)]
    pub life: Life,
    /// Last allocated unit sequence value.
    #[serde(rename = "unitseq", default)]
    pub unit_seq: i64,
    /// Number of unit documents belonging to the service.
    #[serde(rename = "unitcount", default)]
    pub unit_count: i64,
    /// Number of relation documents naming the service.
    #[serde(rename = "relationcount", default)]
    pub relation_count: i64,
    /// Whether the service is reachable from outside the deployment.
    #[serde(default)]
    pub exposed: bool,
    /// Revision counter maintained by the store.
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

/// A unit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDoc {
    /// Unit name.
    #[serde(rename = "_id")]
    pub name: UnitName,
    /// Owning service.
    pub service: ServiceName,
    /// Lifecycle state.
    #[serde(default)]
    pub life: Life,
    /// Reported status.
    #[serde(default)]
    pub status: UnitStatus,
    /// Free-form detail accompanying the status.
    #[serde(rename = "statusinfo", default)]
    pub status_info: String,
    /// When the status was last set.
    #[serde(rename = "statussince", default)]
    pub status_since: Option<DateTime<Utc>>,
    /// Principal unit, for subordinates.
    #[serde(default)]
    pub principal: Option<UnitName>,
    /// Subordinate units deployed beside this one.
    #[serde(default)]
    pub subordinates: Vec<UnitName>,
    /// Machine the unit is assigned to.
    #[serde(rename = "machineid", default)]
    pub machine_id: Option<String>,
    /// Revision counter maintained by the store.
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

/// A relation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDoc {
    /// Relation key derived from the endpoints.
    #[serde(rename = "_id")]
    pub key: String,
    /// Numeric id allocated from the relation sequence.
    pub id: i64,
    /// The one or two endpoints joined.
    pub endpoints: Vec<Endpoint>,
    /// Lifecycle state.
    #[serde(default)]
    pub life: Life,
    /// Revision counter maintained by the store.
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

/// A charm record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmDoc {
    /// Charm URL.
    #[serde(rename = "_id")]
    pub url: CharmUrl,
    /// Charm metadata.
    pub meta: CharmMeta,
}

/// A settings record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsDoc {
    /// Stored values.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

/// Load and decode a document.
pub(crate) fn load<T: DeserializeOwned>(
    store: &dyn Store,
    collection: Collection,
    id: &str,
) -> Result<Option<T>> {
    Ok(store
        .find_id(collection, id)?
        .map(from_document)
        .transpose()?)
}

/// Load and decode every document matching `filter`.
pub(crate) fn load_all<T: DeserializeOwned>(
    store: &dyn Store,
    collection: Collection,
    filter: &[fleetstate_store::Cond],
) -> Result<Vec<T>> {
    store
        .find(collection, filter)?
        .into_iter()
        .map(|doc| Ok(from_document(doc)?))
        .collect()
}

/// Read the integer at `path` of a document returned by `increment`.
pub(crate) fn counter(doc: &Document, collection: Collection, id: &str, path: &str) -> Result<i64> {
    doc.get(path).and_then(Value::as_i64).ok_or_else(|| {
        StoreError::Serialization(format!("bad {path} in {collection} {id:?}: {:?}", doc.get(path)))
            .into()
    })
}

/// Encode a record for insertion.
pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Document> {
    Ok(to_document(record)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn service_doc_field_names() {
        let doc = ServiceDoc {
            name: ServiceName::new("wordpress").unwrap(),
            charm_url: CharmUrl::parse("cs:precise/wordpress-3").unwrap(),
            force_charm: false,
            life: Life::Alive,
            unit_seq: 0,
            unit_count: 0,
            relation_count: 0,
            exposed: false,
            txn_revno: 0,
        };
        let encoded = encode(&doc).unwrap();
        assert_eq!(encoded["_id"], "wordpress");
        assert_eq!(encoded[field::CHARM_URL], "cs:precise/wordpress-3");
        assert_eq!(encoded[field::LIFE], "alive");
        assert_eq!(encoded[field::UNIT_COUNT], 0);
        assert_eq!(encoded[field::REVNO], 0);
    }

    #[test]
    fn counter_names_bad_field() {
        let Value::Object(doc) = json!({"unitseq": 3, "counter": "x"}) else {
            unreachable!()
        };
        assert_eq!(counter(&doc, Collection::Services, "wordpress", field::UNIT_SEQ).unwrap(), 3);

        let err = counter(&doc, Collection::Sequences, "relation", field::COUNTER).unwrap_err();
        assert!(err.to_string().contains("bad counter in sequences \"relation\""));
        let err = counter(&doc, Collection::Services, "wordpress", field::UNIT_COUNT).unwrap_err();
        assert!(err.to_string().contains("bad unitcount"));
    }

    #[test]
    fn unit_doc_defaults() {
        let Value::Object(doc) = json!({"_id": "wordpress/0", "service": "wordpress"}) else {
            unreachable!()
        };
        let unit: UnitDoc = from_document(doc).unwrap();
        assert_eq!(unit.life, Life::Alive);
        assert_eq!(unit.status, UnitStatus::Pending);
        assert!(unit.principal.is_none());
        assert!(unit.subordinates.is_empty());
        assert!(unit.machine_id.is_none());

        let encoded = encode(&unit).unwrap();
        assert_eq!(encoded[field::MACHINE_ID], Value::Null);
        assert_eq!(encoded[field::SUBORDINATES], json!([]));
    }
}
