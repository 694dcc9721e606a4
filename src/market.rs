//! Market identifiers shared across the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "yes",
            Outcome::No => "no",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A market and the venue tokens for its two outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTokens {
    /// Market (condition) identifier
    #[serde(alias = "id")]
    pub market_id: String,
    /// Token for the YES outcome
    #[serde(default)]
    pub yes_token: Option<String>,
    /// Token for the NO outcome
    #[serde(default)]
    pub no_token: Option<String>,
}

impl MarketTokens {
    pub fn new(
        market_id: impl Into<String>,
        yes_token: Option<impl Into<String>>,
        no_token: Option<impl Into<String>>,
    ) -> Self {
        Self {
            market_id: market_id.into(),
            yes_token: yes_token.map(Into::into),
            no_token: no_token.map(Into::into),
        }
    }

    pub fn yes(&self) -> Option<&str> {
        self.yes_token.as_deref()
    }

    pub fn no(&self) -> Option<&str> {
        self.no_token.as_deref()
    }

    /// Token for the given outcome, if known
    pub fn token(&self, outcome: Outcome) -> Option<&str> {
        match outcome {
            Outcome::Yes => self.yes(),
            Outcome::No => self.no(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Yes.to_string(), "yes");
        assert_eq!(Outcome::No.to_string(), "no");
    }

    #[test]
    fn test_market_tokens_accessors() {
        let market = MarketTokens::new("m1", Some("y1"), None::<String>);
        assert_eq!(market.yes(), Some("y1"));
        assert_eq!(market.no(), None);
        assert_eq!(market.token(Outcome::Yes), Some("y1"));
    }

    #[test]
    fn test_market_tokens_deserialize_id_alias() {
        let toml = r#"
            id = "0xabc"
            yes_token = "111"
            no_token = "222"
        "#;
        let market: MarketTokens = toml::from_str(toml).unwrap();
        assert_eq!(market.market_id, "0xabc");
        assert_eq!(market.no(), Some("222"));
    }
}
