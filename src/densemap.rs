//! A map of dense integer key to value, used as the node arena.

use std::marker::PhantomData;

pub trait Index: From<usize> {
    fn index(&self) -> usize;
}

/// Values are only ever appended, so a key handed out once stays valid until
/// the whole map is cleared.
pub struct DenseMap<K, V> {
    vec: Vec<V>,
    key_type: PhantomData<K>,
}

impl<K, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap {
            vec: Vec::default(),
            key_type: PhantomData,
        }
    }
}

impl<K: Index, V> std::ops::Index<K> for DenseMap<K, V> {
    type Output = V;

    fn index(&self, k: K) -> &Self::Output {
        &self.vec[k.index()]
    }
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn get(&self, k: K) -> Option<&V> {
        self.vec.get(k.index())
    }

    pub fn push(&mut self, val: V) -> K {
        let id = K::from(self.vec.len());
        self.vec.push(val);
        id
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn values(&self) -> std::slice::Iter<V> {
        self.vec.iter()
    }

    /// Drop every value; all previously issued keys become dangling.
    pub fn clear(&mut self) {
        self.vec.clear();
    }
}
