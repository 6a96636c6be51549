use crate::error::LedgerError;
use crate::models::Market;
use std::collections::BTreeMap;

/// Assigns a market to a raw file from its name.
pub trait MarketRule: Send + Sync {
    fn market_for(&self, file_name: &str) -> Option<Market>;

    /// File suffixes this rule knows about, used to discover staging files.
    fn suffixes(&self) -> Vec<String>;
}

/// Maps the extension after the last `.` of a file name to a market.
#[derive(Debug, Clone)]
pub struct SuffixRule {
    by_suffix: BTreeMap<String, Market>,
}

impl SuffixRule {
    pub fn new() -> Self {
        Self {
            by_suffix: BTreeMap::new(),
        }
    }

    /// Build a rule from `SUFFIX=MARKET` assignments such as `1=Spain`.
    pub fn from_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self, LedgerError> {
        let mut rule = Self::new();
        for raw in assignments {
            let raw = raw.as_ref();
            let (suffix, market) = raw.split_once('=').ok_or_else(|| {
                LedgerError::InvalidConfig(format!("expected SUFFIX=MARKET, got '{}'", raw))
            })?;
            let suffix = suffix.trim().trim_start_matches('.');
            if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(LedgerError::InvalidConfig(format!(
                    "file suffix '{}' must be alphanumeric",
                    suffix
                )));
            }
            let market = market.parse::<Market>().map_err(LedgerError::InvalidConfig)?;
            rule.assign(suffix, market);
        }
        Ok(rule)
    }

    pub fn assign(&mut self, suffix: &str, market: Market) {
        self.by_suffix.insert(suffix.to_string(), market);
    }
}

impl Default for SuffixRule {
    /// OMIE convention: `.1` files carry Spain, `.2` files carry Portugal.
    fn default() -> Self {
        let mut rule = Self::new();
        rule.assign("1", Market::Spain);
        rule.assign("2", Market::Portugal);
        rule
    }
}

impl MarketRule for SuffixRule {
    fn market_for(&self, file_name: &str) -> Option<Market> {
        let (_, suffix) = file_name.rsplit_once('.')?;
        self.by_suffix.get(suffix).copied()
    }

    fn suffixes(&self) -> Vec<String> {
        self.by_suffix.keys().cloned().collect()
    }
}
