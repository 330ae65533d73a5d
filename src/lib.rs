//! Acoustic fingerprinting and offset matching.
//!
//! Spectral frames go through [`peaks`], peak pairs are hashed by [`hashing`]
//! and grouped into [`fingerprint::FptEntry`] values, a reference set is
//! indexed by [`index::ReverseIndex`], and a live capture is aligned against
//! it by one of the [`matching`] strategies. [`diagnostics`] explains why a
//! match did or did not happen.

pub mod audio;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod fingerprint;
pub mod hashing;
pub mod index;
pub mod matching;
pub mod peaks;
pub mod visualize;

pub use fingerprint::FptEntry;
pub use index::ReverseIndex;
pub use matching::{CoarseToFineMatcher, FingerprintMatchResult, OffsetVotingMatcher};
pub use peaks::{Peak, SpectralFrame};

/// Application name, used for the default store file.
pub const APP_NAME: &str = "echosync";
