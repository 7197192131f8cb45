//! Shared fixture for unit tests.

use std::sync::Arc;

use fleetstate_core::{CharmMeta, CharmRelation, CharmUrl};
use fleetstate_store::RocksStore;
use tempfile::TempDir;

use crate::relation::Relation;
use crate::service::Service;
use crate::state::State;

/// A state backed by a fresh store, with three services deployed:
/// `wordpress` requiring `db`, `mysql` providing `server`, and the
/// subordinate `logging` requiring the container-scoped `juju-info`.
pub(crate) struct Fixture {
    pub state: State,
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let state = State::with_defaults(Arc::new(store));

        let charms = [
            (
                "wordpress",
                "cs:precise/wordpress-3",
                CharmMeta::new("wordpress").requires("db", CharmRelation::global("mysql")),
            ),
            (
                "mysql",
                "cs:precise/mysql-1",
                CharmMeta::new("mysql").provides("server", CharmRelation::global("mysql")),
            ),
            (
                "logging",
                "cs:precise/logging-1",
                CharmMeta::new("logging")
                    .subordinate()
                    .requires("juju-info", CharmRelation::container("info")),
            ),
        ];
        for (name, url, meta) in charms {
            let charm = state
                .add_charm(CharmUrl::parse(url).unwrap(), meta)
                .unwrap();
            state.add_service(name, &charm).unwrap();
        }
        Self { state, _dir: dir }
    }

    pub fn wordpress(&self) -> Service {
        self.state.service("wordpress").unwrap()
    }

    pub fn mysql(&self) -> Service {
        self.state.service("mysql").unwrap()
    }

    pub fn logging(&self) -> Service {
        self.state.service("logging").unwrap()
    }

    pub fn relate_wordpress_mysql(&self) -> Relation {
        let db = self.wordpress().endpoint("db").unwrap();
        let server = self.mysql().endpoint("server").unwrap();
        self.state.add_relation(&[db, server]).unwrap()
    }
}
