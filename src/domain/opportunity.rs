//! Detected trading opportunities and their deduplication fingerprints.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::MarketId;
use super::market::Side;

/// Classification of a detected mispricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    Arbitrage,
    NewsGap,
    ProbabilityEdge,
    TimeDecay,
    Liquidity,
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Arbitrage => "arbitrage",
            Self::NewsGap => "news_gap",
            Self::ProbabilityEdge => "probability_edge",
            Self::TimeDecay => "time_decay",
            Self::Liquidity => "liquidity",
        };
        write!(f, "{s}")
    }
}

/// Deduplication key: market + kind + entry price bucketed to cents.
///
/// At most one open opportunity may exist per fingerprint; re-detection
/// refreshes the existing record instead of creating a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn new(market_id: &MarketId, kind: OpportunityKind, entry_price: Decimal) -> Self {
        let bucket = (entry_price * Decimal::ONE_HUNDRED).round();
        Self(format!("{market_id}:{kind}:{bucket}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an opportunity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    /// Detected and awaiting or passing analysis.
    Open,
    /// Scored below the confidence floor. Kept for audit, never traded.
    Rejected,
    /// Acted on or expired; the fingerprint may be reused.
    Resolved,
}

/// A detected trading opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    fingerprint: Fingerprint,
    market_id: MarketId,
    kind: OpportunityKind,
    side: Side,
    entry_price: Decimal,
    edge: Decimal,
    confidence: f64,
    status: OpportunityStatus,
    detected_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    #[must_use]
    pub fn new(
        market_id: MarketId,
        kind: OpportunityKind,
        side: Side,
        entry_price: Decimal,
        edge: Decimal,
        confidence: f64,
    ) -> Self {
        let fingerprint = Fingerprint::new(&market_id, kind, entry_price);
        Self {
            fingerprint,
            market_id,
            kind,
            side,
            entry_price,
            edge,
            confidence,
            status: OpportunityStatus::Open,
            detected_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Set an expiry, typically the market's resolution date.
    #[must_use]
    pub fn with_expiry(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    #[must_use]
    pub fn kind(&self) -> OpportunityKind {
        self.kind
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub fn entry_price(&self) -> Decimal {
        self.entry_price
    }

    #[must_use]
    pub fn edge(&self) -> Decimal {
        self.edge
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    #[must_use]
    pub fn status(&self) -> OpportunityStatus {
        self.status
    }

    #[must_use]
    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == OpportunityStatus::Open
    }

    /// Refresh edge and confidence from a re-detection of the same
    /// fingerprint. Detection time is kept from the first sighting.
    pub fn refresh(&mut self, edge: Decimal, confidence: f64) {
        self.edge = edge;
        self.confidence = confidence;
    }

    /// Overwrite confidence from an analyzer score. When analyzers
    /// disagree, the lowest confidence wins.
    pub fn record_score(&mut self, confidence: f64) {
        self.confidence = self.confidence.min(confidence);
    }

    pub fn reject(&mut self) {
        self.status = OpportunityStatus::Rejected;
    }

    pub fn resolve(&mut self) {
        self.status = OpportunityStatus::Resolved;
    }

    /// True once past the expiry timestamp.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fingerprint_buckets_price_to_cents() {
        let market = MarketId::from("m1");
        let a = Fingerprint::new(&market, OpportunityKind::Arbitrage, dec!(0.521));
        let b = Fingerprint::new(&market, OpportunityKind::Arbitrage, dec!(0.519));
        let c = Fingerprint::new(&market, OpportunityKind::Arbitrage, dec!(0.54));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_distinguishes_kind() {
        let market = MarketId::from("m1");
        let arb = Fingerprint::new(&market, OpportunityKind::Arbitrage, dec!(0.52));
        let decay = Fingerprint::new(&market, OpportunityKind::TimeDecay, dec!(0.52));
        assert_ne!(arb, decay);
    }

    #[test]
    fn refresh_updates_edge_and_confidence() {
        let mut opp = Opportunity::new(
            MarketId::from("m1"),
            OpportunityKind::Arbitrage,
            Side::Yes,
            dec!(0.44),
            dec!(0.04),
            0.5,
        );
        opp.refresh(dec!(0.06), 0.8);
        assert_eq!(opp.edge(), dec!(0.06));
        assert_eq!(opp.confidence(), 0.8);
        assert!(opp.is_open());
    }

    #[test]
    fn record_score_keeps_lowest_confidence() {
        let mut opp = Opportunity::new(
            MarketId::from("m1"),
            OpportunityKind::ProbabilityEdge,
            Side::No,
            dec!(0.3),
            dec!(0.1),
            0.9,
        );
        opp.record_score(0.6);
        opp.record_score(0.8);
        assert_eq!(opp.confidence(), 0.6);
    }

    #[test]
    fn expiry_check() {
        let opp = Opportunity::new(
            MarketId::from("m1"),
            OpportunityKind::TimeDecay,
            Side::Yes,
            dec!(0.85),
            dec!(0.15),
            0.7,
        )
        .with_expiry(Utc::now() - chrono::Duration::minutes(1));
        assert!(opp.is_expired(Utc::now()));
    }
}
