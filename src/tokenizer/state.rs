//! Unloaded/Loaded lifecycle shared by the backends.

use crate::errors::{Result, TokenizerError};

/// The Loaded payload is stored only once fully built, so the state flip and
/// the data it guards become visible together.
pub(crate) enum LoadState<T> {
    Unloaded,
    Loaded(T),
}

impl<T> Default for LoadState<T> {
    fn default() -> Self {
        Self::Unloaded
    }
}

impl<T> LoadState<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Loaded payload, or `Uninitialized`.
    pub fn get(&self) -> Result<&T> {
        match self {
            Self::Loaded(inner) => Ok(inner),
            Self::Unloaded => Err(TokenizerError::Uninitialized),
        }
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            Self::Loaded(inner) => Some(inner),
            Self::Unloaded => None,
        }
    }

    pub fn set(&mut self, inner: T) {
        *self = Self::Loaded(inner);
    }
}
