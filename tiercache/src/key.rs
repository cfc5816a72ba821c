//! Cache key normalization
//!
//! Every cache operation is addressed by a [`CacheKey`], a plain string
//! derived deterministically from the caller's key value:
//!
//! 1. strings pass through unchanged
//! 2. values implementing [`StableKey`] are asked for their own key
//! 3. anything else that is `Debug` is digested: SHA-256 over the type name
//!    and the `Debug` text, rendered as 64 lowercase hex characters
//!
//! The digest path carries a residual collision risk: two distinct types
//! whose type names and `Debug` output coincide map to the same key.
//!
//! Digested keys are also only stable within one toolchain. Neither
//! `std::any::type_name` nor derived `Debug` output is guaranteed across
//! compiler versions, so processes built with different compilers can derive
//! different keys for the same value and miss each other's entries in a
//! shared remote store. Keys that must match across builds should come from
//! a string or a [`StableKey`] implementation.

use sha2::{Digest, Sha256};
use std::fmt;

/// Normalized cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Normalize any key source
    pub fn new<K: KeySource + ?Sized>(key: &K) -> Self {
        key.cache_key()
    }

    /// Ask a value for its self-derived key
    pub fn from_stable<K: StableKey + ?Sized>(key: &K) -> Self {
        Self(key.stable_key())
    }

    /// Content digest over the type name and textual value
    pub fn digest<K: fmt::Debug + ?Sized>(key: &K) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(std::any::type_name::<K>().as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{:?}", key).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        Self(key.clone())
    }
}

/// Values that know their own cache key
pub trait StableKey {
    fn stable_key(&self) -> String;
}

/// Anything that can be normalized into a [`CacheKey`]
pub trait KeySource {
    fn cache_key(&self) -> CacheKey;
}

impl KeySource for str {
    fn cache_key(&self) -> CacheKey {
        CacheKey::from(self)
    }
}

impl KeySource for String {
    fn cache_key(&self) -> CacheKey {
        CacheKey::from(self)
    }
}

impl KeySource for CacheKey {
    fn cache_key(&self) -> CacheKey {
        self.clone()
    }
}

impl<T: KeySource + ?Sized> KeySource for &T {
    fn cache_key(&self) -> CacheKey {
        (**self).cache_key()
    }
}

/// Routes a [`StableKey`] value through its own key
#[derive(Debug, Clone, Copy)]
pub struct Stable<T>(pub T);

impl<T: StableKey> KeySource for Stable<T> {
    fn cache_key(&self) -> CacheKey {
        CacheKey::from_stable(&self.0)
    }
}

/// Routes an arbitrary `Debug` value through the content digest
#[derive(Debug, Clone, Copy)]
pub struct Digested<T>(pub T);

impl<T: fmt::Debug> KeySource for Digested<T> {
    fn cache_key(&self) -> CacheKey {
        CacheKey::digest(&self.0)
    }
}

macro_rules! digest_key_source {
    ($($ty:ty),* $(,)?) => {
        $(
            impl KeySource for $ty {
                fn cache_key(&self) -> CacheKey {
                    CacheKey::digest(self)
                }
            }
        )*
    };
}

digest_key_source!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char, uuid::Uuid,
);

#[cfg(test)]
mod tests {
    use super::*;

    struct UserId(u64);

    impl StableKey for UserId {
        fn stable_key(&self) -> String {
            format!("user:{}", self.0)
        }
    }

    #[derive(Debug)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[derive(Debug)]
    struct Other {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_string_passes_through() {
        assert_eq!(CacheKey::new("plain").as_str(), "plain");
        assert_eq!(CacheKey::new(&"owned".to_string()).as_str(), "owned");
    }

    #[test]
    fn test_stable_key_is_used() {
        assert_eq!(CacheKey::new(&Stable(UserId(42))).as_str(), "user:42");
    }

    #[test]
    fn test_digest_is_deterministic_hex() {
        let a = CacheKey::new(&Digested(Point { x: 1, y: 2 }));
        let b = CacheKey::new(&Digested(Point { x: 1, y: 2 }));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));

        let c = CacheKey::new(&Digested(Point { x: 2, y: 1 }));
        assert_ne!(a, c);
    }

    #[test]
    fn test_digest_separates_type_names() {
        // Same field text, different type names
        let point = CacheKey::digest(&Point { x: 1, y: 2 });
        let other = CacheKey::digest(&Other { x: 1, y: 2 });
        assert_ne!(point, other);
    }

    #[test]
    fn test_digest_depends_on_compiler_rendered_text() {
        let point = Point { x: 1, y: 2 };

        let mut hasher = Sha256::new();
        hasher.update(std::any::type_name::<Point>().as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{:?}", point).as_bytes());

        assert_eq!(
            CacheKey::digest(&point).as_str(),
            hex::encode(hasher.finalize())
        );
        // The stable path involves neither
        assert_eq!(CacheKey::new(&Stable(UserId(1))).as_str(), "user:1");
    }

    #[test]
    fn test_integers_are_digested() {
        let key = CacheKey::new(&7u64);
        assert_ne!(key.as_str(), "7");
        assert_eq!(key, CacheKey::new(&7u64));
        assert_ne!(key, CacheKey::new(&7i64));
    }
}
