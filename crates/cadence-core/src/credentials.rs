//! Credential rotation pool
//!
//! Holds the ordered API keys shared by every request of the process. The
//! cursor only ever moves forward: once a key has been rotated past it is
//! never handed out again, and advancing past the last key leaves the pool
//! exhausted for the rest of the process.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// A single API key together with its position in the pool.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    token: Arc<str>,
}

impl Credential {
    /// Position of this key in the pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// The raw key, for request headers only
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Ordered set of credentials with a monotonic cursor.
pub struct CredentialPool {
    tokens: Vec<Arc<str>>,
    cursor: Mutex<usize>,
}

impl CredentialPool {
    /// Build a pool from raw keys. Blank entries are discarded.
    pub fn new<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens: Vec<Arc<str>> = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .map(Arc::from)
            .collect();

        if tokens.is_empty() {
            return Err(Error::Config(
                "credential pool needs at least one API key".to_string(),
            ));
        }

        info!("Credential pool initialized with {} keys", tokens.len());

        Ok(Self {
            tokens,
            cursor: Mutex::new(0),
        })
    }

    /// The credential at the cursor.
    pub fn current(&self) -> Result<Credential> {
        let cursor = *self.lock();
        self.tokens
            .get(cursor)
            .map(|token| Credential {
                index: cursor,
                token: Arc::clone(token),
            })
            .ok_or(Error::PoolExhausted)
    }

    /// Advance the cursor by one. Returns whether a usable credential remains.
    pub fn rotate(&self) -> bool {
        let mut cursor = self.lock();
        if *cursor < self.tokens.len() {
            *cursor += 1;
        }
        let available = *cursor < self.tokens.len();
        if available {
            warn!(position = *cursor, "Rotated to next credential");
        } else {
            warn!("Rotated past the last credential, pool exhausted");
        }
        available
    }

    /// Advance past `failed` if the cursor still points at it.
    ///
    /// When another caller already rotated away from the same key this is a
    /// no-op, so two concurrent failures on one key advance the cursor once.
    pub fn rotate_past(&self, failed: &Credential) -> bool {
        let mut cursor = self.lock();
        if *cursor == failed.index {
            *cursor += 1;
            if *cursor < self.tokens.len() {
                warn!(
                    failed = failed.index,
                    position = *cursor,
                    "Rotated to next credential"
                );
            } else {
                warn!(failed = failed.index, "Rotated past the last credential, pool exhausted");
            }
        }
        *cursor < self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Current cursor position (equal to `len()` once exhausted)
    pub fn position(&self) -> usize {
        *self.lock()
    }

    pub fn is_exhausted(&self) -> bool {
        self.position() >= self.tokens.len()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // The guarded value is a plain index, a poisoned lock still holds a valid one.
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("len", &self.tokens.len())
            .field("position", &self.position())
            .finish()
    }
}
