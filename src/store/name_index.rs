// ABOUTME: Reservation table mapping unique names to the keys that own them.
// ABOUTME: A name belongs to at most one key and a key holds at most one name.

use super::error::StoreError;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Reservations {
    by_name: HashMap<String, String>,
    by_key: HashMap<String, String>,
}

#[derive(Default)]
pub struct NameIndex {
    inner: Mutex<Reservations>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name` for `key`. Reserving the same pair again succeeds.
    pub fn reserve(&self, name: &str, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(owner) = inner.by_name.get(name) {
            if owner == key {
                return Ok(());
            }
            return Err(StoreError::NameReserved {
                name: name.to_string(),
                key: owner.clone(),
            });
        }
        if let Some(held) = inner.by_key.get(key) {
            return Err(StoreError::KeyReserved {
                key: key.to_string(),
                name: held.clone(),
            });
        }
        inner.by_name.insert(name.to_string(), key.to_string());
        inner.by_key.insert(key.to_string(), name.to_string());
        Ok(())
    }

    pub fn release_by_name(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(key) = inner.by_name.remove(name) {
            inner.by_key.remove(&key);
        }
    }

    pub fn release_by_key(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(name) = inner.by_key.remove(key) {
            inner.by_name.remove(&name);
        }
    }

    /// Key holding `name`, if reserved.
    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.lock().by_name.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_pair_reserves_twice() {
        let index = NameIndex::new();
        index.reserve("web", "c1").unwrap();
        index.reserve("web", "c1").unwrap();
        assert!(matches!(
            index.reserve("web", "c2"),
            Err(StoreError::NameReserved { .. })
        ));
        assert!(matches!(
            index.reserve("api", "c1"),
            Err(StoreError::KeyReserved { .. })
        ));
    }

    #[test]
    fn release_frees_both_sides() {
        let index = NameIndex::new();
        index.reserve("web", "c1").unwrap();
        index.release_by_key("c1");
        assert!(index.get("web").is_none());
        index.reserve("web", "c2").unwrap();
        index.release_by_name("web");
        index.reserve("api", "c2").unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(u8, u8),
        ReleaseName(u8),
        ReleaseKey(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0u8..4).prop_map(|(n, k)| Op::Reserve(n, k)),
            (0u8..4).prop_map(Op::ReleaseName),
            (0u8..4).prop_map(Op::ReleaseKey),
        ]
    }

    proptest! {
        #[test]
        fn reservations_stay_one_to_one(ops in prop::collection::vec(op(), 1..64)) {
            let index = NameIndex::new();
            let mut model: HashMap<String, String> = HashMap::new();
            for op in ops {
                match op {
                    Op::Reserve(n, k) => {
                        let (name, key) = (format!("n{n}"), format!("k{k}"));
                        let free = match model.get(&name) {
                            Some(owner) => owner == &key,
                            None => !model.values().any(|v| v == &key),
                        };
                        prop_assert_eq!(index.reserve(&name, &key).is_ok(), free);
                        if free {
                            model.insert(name, key);
                        }
                    }
                    Op::ReleaseName(n) => {
                        let name = format!("n{n}");
                        index.release_by_name(&name);
                        model.remove(&name);
                    }
                    Op::ReleaseKey(k) => {
                        let key = format!("k{k}");
                        index.release_by_key(&key);
                        model.retain(|_, v| v != &key);
                    }
                }
                for n in 0..4u8 {
                    let name = format!("n{n}");
                    prop_assert_eq!(index.get(&name), model.get(&name).cloned());
                }
            }
        }
    }
}
