//! External interface glue: the memcached text protocol drives
//! get/gets/rget/set/add/replace/append/prepend/cas/incr/decr/delete/
//! stats/version against whatever this module exports. The core never
//! parses protocol bytes; a separate front end calls [`MemcacheOps`]
//! methods and serializes the results itself.
//!
//! `get_store`/`set_store_interface` are a small global registry built on
//! `lazy_static!`, the crate's usual pattern for process-wide singletons,
//! rather than per-connection state: a protocol front end looks these up
//! once at startup.

use std::ops::Bound;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;

use crate::btree::Outcome;
use crate::entry::{Timestamp, Value};
use crate::error::Result;

/// The contract a memcached-text-protocol front end drives. Implemented by
/// [`crate::kv::KvStore`].
pub trait MemcacheOps: Send + Sync {
    fn mc_get(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Timestamp)>>;
    /// Range scan bounded by `start`/`end` (either end may be open,
    /// inclusive or exclusive), stopping at `max` pairs or the engine's
    /// own chunk-size cap; the returned bool reports whether it stopped
    /// early.
    fn mc_rget(
        &self,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        max: usize,
    ) -> Result<(Vec<(Vec<u8>, Value, Timestamp)>, bool)>;
    fn mc_set(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome>;
    fn mc_add(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome>;
    fn mc_replace(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome>;
    fn mc_append(&self, key: &[u8], suffix: Vec<u8>) -> Result<Outcome>;
    fn mc_prepend(&self, key: &[u8], prefix: Vec<u8>) -> Result<Outcome>;
    fn mc_cas(&self, key: &[u8], value: Vec<u8>, expected_cas: u64) -> Result<Outcome>;
    fn mc_incr(&self, key: &[u8], delta: u64) -> Result<Outcome>;
    fn mc_decr(&self, key: &[u8], delta: u64) -> Result<Outcome>;
    fn mc_delete(&self, key: &[u8]) -> Result<Outcome>;
    /// `(name, value)` pairs for the memcached `stats` command.
    fn mc_stats(&self) -> Vec<(String, String)>;
    fn mc_version(&self) -> &'static str;
}

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

lazy_static! {
    static ref STORE_INTERFACE: RwLock<Option<Arc<dyn MemcacheOps>>> = RwLock::new(None);
}

/// Installs the engine instance a front end should drive. Replaces
/// whatever was previously installed.
pub fn set_store_interface(store: Arc<dyn MemcacheOps>) {
    *STORE_INTERFACE.write().unwrap() = Some(store);
}

/// Returns the currently installed engine instance, if any.
pub fn get_store() -> Option<Arc<dyn MemcacheOps>> {
    STORE_INTERFACE.read().unwrap().clone()
}

pub fn clear_store_interface() {
    *STORE_INTERFACE.write().unwrap() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Fake(Mutex<Vec<u8>>);

    impl MemcacheOps for Fake {
        fn mc_get(&self, _key: &[u8]) -> Result<Option<(Vec<u8>, Timestamp)>> {
            Ok(Some((self.0.lock().unwrap().clone(), Timestamp::new(1, 1))))
        }
        fn mc_rget(
            &self,
            _start: Bound<Vec<u8>>,
            _end: Bound<Vec<u8>>,
            _max: usize,
        ) -> Result<(Vec<(Vec<u8>, Value, Timestamp)>, bool)> {
            Ok((Vec::new(), false))
        }
        fn mc_set(&self, _key: &[u8], value: Vec<u8>) -> Result<Outcome> {
            *self.0.lock().unwrap() = value;
            Ok(Outcome::Stored)
        }
        fn mc_add(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
            self.mc_set(key, value)
        }
        fn mc_replace(&self, key: &[u8], value: Vec<u8>) -> Result<Outcome> {
            self.mc_set(key, value)
        }
        fn mc_append(&self, _key: &[u8], _suffix: Vec<u8>) -> Result<Outcome> {
            Ok(Outcome::Stored)
        }
        fn mc_prepend(&self, _key: &[u8], _prefix: Vec<u8>) -> Result<Outcome> {
            Ok(Outcome::Stored)
        }
        fn mc_cas(&self, _key: &[u8], _value: Vec<u8>, _expected_cas: u64) -> Result<Outcome> {
            Ok(Outcome::Stored)
        }
        fn mc_incr(&self, _key: &[u8], _delta: u64) -> Result<Outcome> {
            Ok(Outcome::Stored)
        }
        fn mc_decr(&self, _key: &[u8], _delta: u64) -> Result<Outcome> {
            Ok(Outcome::Stored)
        }
        fn mc_delete(&self, _key: &[u8]) -> Result<Outcome> {
            Ok(Outcome::Deleted)
        }
        fn mc_stats(&self) -> Vec<(String, String)> {
            vec![("version".to_string(), ENGINE_VERSION.to_string())]
        }
        fn mc_version(&self) -> &'static str {
            ENGINE_VERSION
        }
    }

    #[test]
    fn test_register_and_fetch_store_interface() {
        clear_store_interface();
        assert!(get_store().is_none());

        set_store_interface(Arc::new(Fake(Mutex::new(Vec::new()))));
        let store = get_store().unwrap();
        store.mc_set(b"k", b"v".to_vec()).unwrap();
        let (got, _) = store.mc_get(b"k").unwrap().unwrap();
        assert_eq!(got, b"v".to_vec());

        clear_store_interface();
        assert!(get_store().is_none());
    }
}
