use core::fmt;

use crate::error::InvalidInput;

/// Width of an [`Id`] in bytes.
pub const ID_LEN: usize = 16;

/// Content fingerprint of a blob.
///
/// Ids are compared byte-lexicographically, which is also the order in which
/// they appear in every persisted table. The digest is the first 128 bits of
/// the blake3 hash of the blob; collisions are treated as impossible at the
/// populations this crate targets.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; ID_LEN]);

impl Id {
    /// The smallest id, used as the inclusive lower edge of range scans.
    pub const MIN: Self = Self([0; ID_LEN]);

    /// Digest `blob` into its id. Deterministic across runs and platforms.
    pub fn of(blob: &[u8]) -> Self {
        let mut bytes = [0; ID_LEN];
        bytes.copy_from_slice(&blake3::hash(blob).as_bytes()[..ID_LEN]);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, InvalidInput> {
        let bytes: [u8; ID_LEN] = bytes
            .try_into()
            .map_err(|_| InvalidInput::BadIdLength { len: bytes.len() })?;
        Ok(Self(bytes))
    }

    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ID_LEN]> for Id {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

/// A blob-or-id argument of the public surface.
///
/// `Raw` data is digested (and, on mutation paths, recorded in the identity
/// table) on first use; `Id` skips both, for callers which already hold a
/// resolved id. The interior of the crate operates exclusively on [`Id`]s.
#[derive(Clone, Copy, Debug)]
pub enum Datum<'a> {
    Raw(&'a [u8]),
    Id(Id),
}

impl<'a> From<&'a [u8]> for Datum<'a> {
    fn from(blob: &'a [u8]) -> Self {
        Self::Raw(blob)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Datum<'a> {
    fn from(blob: &'a [u8; N]) -> Self {
        Self::Raw(blob)
    }
}

impl<'a> From<&'a str> for Datum<'a> {
    fn from(blob: &'a str) -> Self {
        Self::Raw(blob.as_bytes())
    }
}

impl From<Id> for Datum<'_> {
    fn from(id: Id) -> Self {
        Self::Id(id)
    }
}
