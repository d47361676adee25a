//! Password hashing and verification using bcrypt
//!
//! Each digest embeds its own random salt and work factor, so digests made
//! with an older cost keep verifying after the configured cost changes.

use anyhow::{Context, Result};
use tracing::warn;

/// bcrypt hasher with a fixed work factor
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Create a hasher; `cost` is clamped into bcrypt's accepted 4..=31 range.
    pub fn new(cost: u32) -> Self {
        let clamped = cost.clamp(4, 31);
        if clamped != cost {
            warn!("bcrypt cost {} out of range, using {}", cost, clamped);
        }
        Self { cost: clamped }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a plaintext password into a self-describing bcrypt digest.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        bcrypt::hash(plaintext, self.cost).context("Failed to hash password")
    }

    /// Check a plaintext against a stored digest.
    ///
    /// A malformed digest is treated as a mismatch, never as an error.
    pub fn verify(&self, plaintext: &str, digest: &str) -> bool {
        bcrypt::verify(plaintext, digest).unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}
