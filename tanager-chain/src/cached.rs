/// A memoized value that never takes part in serialization or equality.
///
/// Used for hashes that are expensive to recompute but derivable from the
/// surrounding struct, so carrying one can never cause a consensus break.
#[derive(Clone, Copy, Eq)]
pub struct Cached<T: Copy>(Option<T>);

impl<T: Copy> Cached<T> {
    pub fn empty() -> Cached<T> {
        Cached(None)
    }

    pub fn from(value: T) -> Cached<T> {
        Cached(Some(value))
    }

    pub fn value(&self) -> Option<T> {
        self.0
    }
}

impl<T: Copy> Default for Cached<T> {
    fn default() -> Self {
        Cached::empty()
    }
}

/// Two caches are unequal only when both are populated with differing
/// values. An empty cache compares equal to anything, so structures built
/// in tests (with empty caches) compare equal to their deserialized
/// counterparts (whose caches are populated).
impl<T: PartialEq + Copy> PartialEq for Cached<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl<T: Copy + std::fmt::Debug> std::fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
