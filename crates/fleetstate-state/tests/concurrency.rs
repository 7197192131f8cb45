//! Concurrent writers against one shared store.
//!
//! Every test spawns scoped threads that each hold their own cached copies
//! of the entities and race through the public API.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use fleetstate_state::{
    CharmMeta, CharmRelation, CharmUrl, Life, NewUnit, Service, State, StateError,
};
use fleetstate_store::RocksStore;
use serde_json::Value;
use tempfile::TempDir;

const WRITERS: usize = 8;

// =============================================================================
// Fixture
// =============================================================================

struct Env {
    state: State,
    _dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let state = State::with_defaults(store);

        let wordpress = CharmMeta::new("wordpress").requires("db", CharmRelation::global("mysql"));
        let mysql = CharmMeta::new("mysql").provides("server", CharmRelation::global("mysql"));
        for (name, url, meta) in [
            ("wordpress", "cs:precise/wordpress-3", wordpress),
            ("mysql", "cs:precise/mysql-1", mysql),
        ] {
            let charm = state
                .add_charm(CharmUrl::parse(url).unwrap(), meta)
                .unwrap();
            state.add_service(name, &charm).unwrap();
        }
        Self { state, _dir: dir }
    }

    fn service(&self, name: &str) -> Service {
        self.state.service(name).unwrap()
    }

    fn relate(&self) -> fleetstate_state::Relation {
        let db = self.service("wordpress").endpoint("db").unwrap();
        let server = self.service("mysql").endpoint("server").unwrap();
        self.state.add_relation(&[db, server]).unwrap()
    }
}

// =============================================================================
// Units
// =============================================================================

#[test]
fn concurrent_add_unit_allocates_distinct_names() {
    let env = Env::new();
    let names: Vec<String> = thread::scope(|s| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let svc = env.service("wordpress");
                s.spawn(move || {
                    svc.add_unit(NewUnit::Principal)
                        .unwrap()
                        .name()
                        .to_string()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let distinct: BTreeSet<_> = names.iter().cloned().collect();
    assert_eq!(distinct.len(), WRITERS);
    let expected: BTreeSet<_> = (0..WRITERS).map(|n| format!("wordpress/{n}")).collect();
    assert_eq!(distinct, expected);
    assert_eq!(env.service("wordpress").unit_count(), 8);
}

#[test]
fn concurrent_remove_unit_succeeds_once() {
    let env = Env::new();
    let mut unit = env
        .service("wordpress")
        .add_unit(NewUnit::Principal)
        .unwrap();
    unit.ensure_dead().unwrap();

    let results: Vec<Result<(), StateError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let svc = env.service("wordpress");
                let mut unit = unit.clone();
                s.spawn(move || svc.remove_unit(&mut unit))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in results {
        assert!(result.is_ok(), "{result:?}");
    }
    assert!(env.state.unit("wordpress/0").unwrap_err().is_not_found());
    assert_eq!(env.service("wordpress").unit_count(), 0);
}

#[test]
fn concurrent_remove_of_assigned_unit_succeeds() {
    let env = Env::new();
    let mut unit = env
        .service("wordpress")
        .add_unit(NewUnit::Principal)
        .unwrap();
    unit.assign_to_machine("0").unwrap();
    unit.ensure_dead().unwrap();

    let results: Vec<Result<(), StateError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let svc = env.service("wordpress");
                let mut unit = unit.clone();
                s.spawn(move || svc.remove_unit(&mut unit))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in results {
        assert!(result.is_ok(), "{result:?}");
    }
    assert!(env.state.unit("wordpress/0").unwrap_err().is_not_found());
    assert_eq!(env.service("wordpress").unit_count(), 0);
}

#[test]
fn dying_races_add_unit() {
    let env = Env::new();
    let added: Vec<bool> = thread::scope(|s| {
        let adders: Vec<_> = (0..WRITERS)
            .map(|_| {
                let svc = env.service("wordpress");
                s.spawn(move || match svc.add_unit(NewUnit::Principal) {
                    Ok(_) => true,
                    Err(e) => {
                        assert!(e.is_not_alive(), "{e}");
                        false
                    }
                })
            })
            .collect();
        let mut svc = env.service("wordpress");
        s.spawn(move || svc.ensure_dying().unwrap());
        adders.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let svc = env.service("wordpress");
    assert_eq!(svc.life(), Life::Dying);
    let added = added.into_iter().filter(|ok| *ok).count();
    assert_eq!(svc.all_units().unwrap().len(), added);
    assert_eq!(usize::try_from(svc.unit_count()).unwrap(), added);
}

// =============================================================================
// Services and relations
// =============================================================================

#[test]
fn concurrent_ensure_dying_converges() {
    let env = Env::new();
    let rel = env.relate();

    thread::scope(|s| {
        for _ in 0..WRITERS {
            let mut svc = env.service("wordpress");
            s.spawn(move || {
                svc.ensure_dying().unwrap();
                assert_eq!(svc.life(), Life::Dying);
            });
        }
    });

    assert_eq!(env.service("wordpress").life(), Life::Dying);
    assert_eq!(env.service("mysql").life(), Life::Alive);
    assert_eq!(env.state.relation(rel.key()).unwrap().life(), Life::Dying);
}

#[test]
fn readers_see_cascade_whole_and_forward_only() {
    let env = Env::new();
    let key = env.relate().key().to_string();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut last_service = Life::Alive;
            let mut last_relation = Life::Alive;
            let mut reads = 0usize;
            loop {
                let finished = done.load(Ordering::Acquire);
                // Service first: once it reads Dying, the relation must too.
                let service = env.state.service("wordpress").unwrap().life();
                let relation = env.state.relation(&key).unwrap().life();
                assert!(service >= last_service, "{last_service:?} -> {service:?}");
                assert!(relation >= last_relation, "{last_relation:?} -> {relation:?}");
                if service == Life::Dying {
                    assert_ne!(relation, Life::Alive);
                }
                last_service = service;
                last_relation = relation;
                reads += 1;
                if finished {
                    break reads;
                }
            }
        });

        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let mut svc = env.service("wordpress");
                s.spawn(move || svc.ensure_dying().unwrap())
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() > 0);
    });

    assert_eq!(env.service("wordpress").life(), Life::Dying);
    assert_eq!(env.state.relation(&key).unwrap().life(), Life::Dying);
}

#[test]
fn concurrent_add_relation_creates_one() {
    let env = Env::new();
    let db = env.service("wordpress").endpoint("db").unwrap();
    let server = env.service("mysql").endpoint("server").unwrap();

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let endpoints = [db.clone(), server.clone()];
                let state = env.state.clone();
                s.spawn(move || state.add_relation(&endpoints))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut created = 0;
    for result in results {
        match result {
            Ok(rel) => {
                created += 1;
                assert_eq!(rel.key(), "wordpress:db mysql:server");
            }
            Err(e) => assert!(matches!(e.cause(), StateError::AlreadyExists(_)), "{e}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(env.service("wordpress").relation_count(), 1);
    assert_eq!(env.service("mysql").relation_count(), 1);
}

// =============================================================================
// Settings
// =============================================================================

#[test]
fn concurrent_settings_writers_merge() {
    let env = Env::new();
    thread::scope(|s| {
        for n in 0..WRITERS {
            let mut config = env.service("wordpress").config().unwrap();
            s.spawn(move || {
                config.set(format!("key-{n}"), n).unwrap();
                config.write().unwrap();
            });
        }
    });

    let config = env.service("wordpress").config().unwrap();
    assert_eq!(config.keys().len(), WRITERS);
    assert_eq!(config.get("key-3"), Some(&Value::from(3)));
}
