use serde::{Deserialize, Serialize};

/// Optimistic concurrency counter of a wallet.
///
/// Opening a wallet sets it to 0. Each applied debit moves it forward by
/// one, so the number of debits a wallet has absorbed equals its version.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a wallet that has never been debited.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Version a wallet holds after one more debit.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debits_advance_one_step_at_a_time() {
        let after_two = Version::initial().next().next();
        assert_eq!(after_two, Version::new(2));
        assert!(Version::initial() < after_two);
        assert_eq!(after_two.to_string(), "v2");
    }
}
