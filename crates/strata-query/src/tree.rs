//! Persistent ordered sequences.
//!
//! [`ImmutableList`] is the child-list type of every SQL AST node. Lists are
//! never mutated in place: `push_back`, `push_front` and `concat` return new
//! lists and leave the receiver untouched, so subtrees can be shared freely
//! between statements. Equality and hashing are structural, which lets whole
//! statements be compared or used as map keys.

use once_cell::sync::OnceCell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// An immutable, structurally comparable sequence.
pub struct ImmutableList<T> {
    items: Arc<[T]>,
    hash: Arc<OnceCell<u64>>,
}

impl<T> ImmutableList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Take ownership of a vector
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            items: Arc::from(items),
            hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// True if both lists share the same backing storage
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

impl<T: Clone> ImmutableList<T> {
    /// Return a new list with `item` appended
    pub fn push_back(&self, item: T) -> Self {
        let mut items = Vec::with_capacity(self.items.len() + 1);
        items.extend(self.items.iter().cloned());
        items.push(item);
        Self::from_vec(items)
    }

    /// Return a new list with `item` prepended
    pub fn push_front(&self, item: T) -> Self {
        let mut items = Vec::with_capacity(self.items.len() + 1);
        items.push(item);
        items.extend(self.items.iter().cloned());
        Self::from_vec(items)
    }

    /// Return a new list holding `self` followed by `other`
    pub fn concat(&self, other: &Self) -> Self {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        self.iter().chain(other.iter()).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.to_vec()
    }
}

impl<T: Hash> ImmutableList<T> {
    /// Structural hash of the elements, computed once per list.
    pub fn structural_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let mut hasher = DefaultHasher::new();
            self.items.len().hash(&mut hasher);
            for item in self.items.iter() {
                item.hash(&mut hasher);
            }
            hasher.finish()
        })
    }
}

impl<T> Clone for ImmutableList<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            hash: Arc::clone(&self.hash),
        }
    }
}

impl<T> Default for ImmutableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for ImmutableList<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T: PartialEq> PartialEq for ImmutableList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.items[..] == other.items[..]
    }
}

impl<T: Eq> Eq for ImmutableList<T> {}

impl<T: Hash> Hash for ImmutableList<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl<T: fmt::Debug> fmt::Debug for ImmutableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<T> From<Vec<T>> for ImmutableList<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T> FromIterator<T> for ImmutableList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<'a, T> IntoIterator for &'a ImmutableList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
