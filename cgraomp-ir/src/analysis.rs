//! Analysis-result caching with the host framework's preserved-set
//! invalidation protocol: a pass reports what it preserved, and cached
//! results answer whether they survive.
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// The set of analyses a transformation preserved.
#[derive(Debug, Clone, Default)]
pub struct Preserved {
    all: bool,
    names: HashSet<&'static str>,
}

impl Preserved {
    /// Everything is preserved (the transformation changed nothing the
    /// analyses observe).
    pub fn all() -> Self {
        Preserved {
            all: true,
            names: HashSet::new(),
        }
    }

    /// Nothing is preserved.
    pub fn none() -> Self {
        Preserved::default()
    }

    pub fn preserve(mut self, name: &'static str) -> Self {
        self.names.insert(name);
        self
    }

    pub fn contains(&self, name: &'static str) -> bool {
        self.all || self.names.contains(name)
    }
}

/// A memoised analysis keyed by IR unit. The stored results answer
/// `invalidate` queries against a [Preserved] set; stale entries are
/// dropped, everything else is kept.
pub struct AnalysisCache<K, V> {
    name: &'static str,
    map: HashMap<K, V>,
}

impl<K: Eq + Hash + Copy, V> AnalysisCache<K, V> {
    pub fn new(name: &'static str) -> Self {
        AnalysisCache {
            name,
            map: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_or_insert_with(
        &mut self,
        key: K,
        compute: impl FnOnce() -> V,
    ) -> &V {
        self.map.entry(key).or_insert_with(compute)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Apply a preserved-set query for one unit. Returns true when the
    /// cached result was invalidated (and dropped).
    pub fn invalidate(&mut self, key: &K, preserved: &Preserved) -> bool {
        if preserved.contains(self.name) {
            false
        } else {
            self.map.remove(key).is_some()
        }
    }

    /// Invalidate every unit at once.
    pub fn invalidate_all(&mut self, preserved: &Preserved) {
        if !preserved.contains(self.name) {
            self.map.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserved_set_guards_cache() {
        let mut cache: AnalysisCache<u32, String> =
            AnalysisCache::new("loop-info");
        cache.get_or_insert_with(1, || "result".to_string());

        let keep = Preserved::none().preserve("loop-info");
        assert!(!cache.invalidate(&1, &keep));
        assert!(cache.get(&1).is_some());

        let drop_all = Preserved::none();
        assert!(cache.invalidate(&1, &drop_all));
        assert!(cache.get(&1).is_none());

        // Preserved::all keeps everything regardless of name.
        cache.get_or_insert_with(2, || "x".to_string());
        assert!(!cache.invalidate(&2, &Preserved::all()));
    }
}
