use serde::{Deserialize, Serialize};

use crate::{data::domain::slug, error::CacheError, impl_string_newtype};

/// Suffix of the small marker object that records the last successful pull.
pub const LAST_PULLED_SUFFIX: &str = ".last-pulled";

/// Key of one cached object, e.g. `chain/ethereum`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(pub String);
impl_string_newtype!(CacheKey);

impl CacheKey {
    /// `<namespace>/<id>` with both parts slugged.
    pub fn new(namespace: &str, id: &str) -> Self {
        Self(format!("{}/{}", slug(namespace), slug(id)))
    }

    /// `<namespace>/<blake3>` over the postcard encoding of `descriptor`.
    ///
    /// Two descriptors that serialize identically share a key, so any field
    /// that changes the computed payload must be part of the descriptor.
    pub fn hashed<T: Serialize>(namespace: &str, descriptor: &T) -> Result<Self, CacheError> {
        let mut hasher = blake3::Hasher::new();
        let bytes = postcard::to_stdvec(descriptor)?;
        hasher.update(&bytes);
        Ok(Self(format!("{}/{}", slug(namespace), hasher.finalize())))
    }

    /// Key of the last-pulled marker belonging to this key.
    pub fn last_pulled(&self) -> Self {
        Self(format!("{}{LAST_PULLED_SUFFIX}", self.0))
    }
}
