//! Broker client identifiers.
//!
//! Every connect attempt presents `prefix + suffix`. The default suffix is
//! a fresh pseudo-random value below `0xffff` in lower-case hex, which
//! mirrors what the deployed cameras send. Two units can collide on that
//! suffix, so a stable per-device suffix can be derived from a hardware
//! identifier instead.

use blake3::Hasher;
use rand_core::{OsRng, RngCore};

/// Domain separator for hardware-derived suffixes.
const CLIENT_ID_DOMAIN: &[u8] = b"meter-cam-client-id-v1";

/// Upper bound (exclusive) of the random suffix.
const RANDOM_SUFFIX_BOUND: u32 = 0xffff;

enum Suffix {
    Random(Box<dyn RngCore + Send>),
    Fixed(String),
}

/// Produces the client identifier for each connect attempt.
pub struct ClientIdGenerator {
    prefix: String,
    suffix: Suffix,
}

impl ClientIdGenerator {
    /// Random suffixes drawn from the OS entropy source.
    pub fn random(prefix: impl Into<String>) -> Self {
        Self::with_rng(prefix, OsRng)
    }

    /// Random suffixes drawn from `rng`.
    pub fn with_rng(prefix: impl Into<String>, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: Suffix::Random(Box::new(rng)),
        }
    }

    /// A suffix derived from a stable device identifier.
    ///
    /// The identifier is hashed so the broker never sees it; the first eight
    /// hex digits of the digest are used. Surrounding whitespace is ignored, as
    /// `/etc/machine-id` ends with a newline.
    pub fn hardware(prefix: impl Into<String>, device_id: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(CLIENT_ID_DOMAIN);
        hasher.update(device_id.trim().as_bytes());
        let suffix = hasher.finalize().to_hex()[..8].to_string();

        Self {
            prefix: prefix.into(),
            suffix: Suffix::Fixed(suffix),
        }
    }

    /// Whether every call to [`next_id`](Self::next_id) returns the same id.
    pub fn is_stable(&self) -> bool {
        matches!(self.suffix, Suffix::Fixed(_))
    }

    /// Identifier for the next connect attempt.
    pub fn next_id(&mut self) -> String {
        match &mut self.suffix {
            Suffix::Random(rng) => {
                format!("{}{:x}", self.prefix, rng.next_u32() % RANDOM_SUFFIX_BOUND)
            }
            Suffix::Fixed(suffix) => format!("{}{}", self.prefix, suffix),
        }
    }
}

impl std::fmt::Debug for ClientIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match self.suffix {
            Suffix::Random(_) => "random",
            Suffix::Fixed(_) => "hardware",
        };
        f.debug_struct("ClientIdGenerator")
            .field("prefix", &self.prefix)
            .field("source", &source)
            .finish()
    }
}
