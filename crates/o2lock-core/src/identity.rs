//! Lock resource names.
//!
//! OCFS2 encodes every lock resource as a fixed-layout ASCII token:
//!
//! ```text
//! M    000000 0000000000000005 6434f530
//! type pad    inode (hex)      generation (hex)
//! [0]  [1..7] [7..23]          [23..]
//! ```
//!
//! Dentry locks (type `N`) are the exception: their inode is the last eight
//! hex characters of the token.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::IdentityError;

/// Lock type byte used by dentry locks.
pub const DENTRY_LOCK_TYPE: char = 'N';

const PAD_END: usize = 7;
const INODE_END: usize = PAD_END + 16;
const GENERATION_LEN: usize = 8;

/// Decoded identity of one lock resource.
///
/// Two identities are equal only when their raw tokens are equal, so a
/// reused inode with a new generation is a different lock.
#[derive(Clone)]
pub struct LockIdentity {
    raw: Arc<str>,
    lock_type: char,
    inode: u64,
}

impl LockIdentity {
    /// Decode a raw lock-name token.
    pub fn decode(token: &str) -> Result<Self, IdentityError> {
        if !token.is_ascii() {
            return Err(IdentityError::NotAscii {
                token: token.to_owned(),
            });
        }

        let lock_type = token.chars().next().unwrap_or_default();
        let inode_field = if lock_type == DENTRY_LOCK_TYPE {
            if token.len() < 1 + GENERATION_LEN {
                return Err(IdentityError::TooShort {
                    token: token.to_owned(),
                    len: token.len(),
                    min: 1 + GENERATION_LEN,
                });
            }
            &token[token.len() - GENERATION_LEN..]
        } else {
            if token.len() < INODE_END {
                return Err(IdentityError::TooShort {
                    token: token.to_owned(),
                    len: token.len(),
                    min: INODE_END,
                });
            }
            &token[PAD_END..INODE_END]
        };

        let inode =
            u64::from_str_radix(inode_field, 16).map_err(|_| IdentityError::InvalidInode {
                token: token.to_owned(),
                field: inode_field.to_owned(),
            })?;

        Ok(Self {
            raw: Arc::from(token),
            lock_type,
            inode,
        })
    }

    /// The full token as read from `locking_state`.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn lock_type(&self) -> char {
        self.lock_type
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// Trailing eight characters of the token.
    pub fn generation(&self) -> &str {
        let len = self.raw.len();
        &self.raw[len.saturating_sub(GENERATION_LEN)..]
    }

    /// Inode 0 marks placeholder records that carry no real lock.
    pub fn is_legal(&self) -> bool {
        self.inode != 0
    }

    /// Compact `"<type> <inode>"` label used in report rows.
    pub fn short_label(&self) -> String {
        format!("{} {}", self.lock_type, self.inode)
    }
}

impl PartialEq for LockIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for LockIdentity {}

impl Hash for LockIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for LockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for LockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockIdentity").field(&self.raw).finish()
    }
}
