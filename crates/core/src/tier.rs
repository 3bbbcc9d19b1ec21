//! Subscription tiers, users, and the subscription backing-store trait.
//!
//! Tiers are totally ordered (`Free < Plus < Pro`). A user at tier T may
//! access any tool whose minimum tier is `<= T`; `Tier::allows` is the only
//! comparison used for gating.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SubscriptionError;

/// A subscription level. Declaration order defines the ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Plus,
    Pro,
}

impl Tier {
    /// Every tier, lowest first.
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Plus, Tier::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Plus => "plus",
            Tier::Pro => "pro",
        }
    }

    /// Whether a caller at this tier may use something gated at `required`.
    pub fn allows(self, required: Tier) -> bool {
        self >= required
    }

    /// Parse a tier name coming from a backing store.
    ///
    /// Unknown or empty names rank as `Free` so bad data can never grant
    /// more access than the lowest tier.
    pub fn from_str_lossy(s: &str) -> Tier {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown subscription tier: '{0}' (expected free, plus or pro)")]
pub struct TierParseError(pub String);

impl FromStr for Tier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "plus" => Ok(Tier::Plus),
            "pro" => Ok(Tier::Pro),
            _ => Err(TierParseError(s.to_string())),
        }
    }
}

/// A messaging user as seen by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Platform identity (e.g. a phone number)
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub tier: Tier,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl User {
    pub fn new(id: impl Into<String>, tier: Tier) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            tier,
            active: true,
        }
    }

    /// The tier this user can actually exercise: inactive users get `Free`.
    pub fn effective_tier(&self) -> Tier {
        if self.active { self.tier } else { Tier::Free }
    }
}

/// The external store that owns user subscription records.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// A human-readable name for this backend (e.g. "in_memory").
    fn name(&self) -> &str;

    /// Look up a user by id. `Ok(None)` means the user is unknown.
    async fn lookup(&self, user_id: &str) -> Result<Option<User>, SubscriptionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(Tier::Free < Tier::Plus);
        assert!(Tier::Plus < Tier::Pro);
        assert_eq!(Tier::ALL.iter().max(), Some(&Tier::Pro));
    }

    #[test]
    fn allows_is_reflexive_and_upward() {
        assert!(Tier::Free.allows(Tier::Free));
        assert!(Tier::Pro.allows(Tier::Plus));
        assert!(!Tier::Free.allows(Tier::Pro));
        assert!(!Tier::Plus.allows(Tier::Pro));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert_eq!(" plus ".parse::<Tier>().unwrap(), Tier::Plus);
        assert!("gold".parse::<Tier>().is_err());
    }

    #[test]
    fn lossy_parse_fails_closed() {
        assert_eq!(Tier::from_str_lossy("gold"), Tier::Free);
        assert_eq!(Tier::from_str_lossy(""), Tier::Free);
        assert_eq!(Tier::from_str_lossy("pro"), Tier::Pro);
    }

    #[test]
    fn inactive_user_is_downgraded() {
        let mut user = User::new("+15550001", Tier::Pro);
        assert_eq!(user.effective_tier(), Tier::Pro);
        user.active = false;
        assert_eq!(user.effective_tier(), Tier::Free);
    }

    #[test]
    fn tier_serializes_lowercase() {
        let json = serde_json::to_string(&Tier::Plus).unwrap();
        assert_eq!(json, "\"plus\"");
    }
}
