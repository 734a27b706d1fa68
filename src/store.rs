//! Shared knowledge store: markets, opportunities, and strategies.
//!
//! The store exclusively owns these records. Writes to a given
//! identifier are linearizable: each write is assigned a monotonic
//! sequence number under the key's shard lock, so readers never observe
//! a torn record and last-writer-wins is well defined. Read-modify-write
//! callers pass the sequence they read; a stale sequence fails with
//! `StoreError::Conflict` and is retried with a fresh read, bounded.
//!
//! Position records are owned by the trading engine; the store only
//! indexes published position updates for query.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::bus::{Event, MessageBus};
use crate::domain::{
    Fingerprint, Market, MarketId, Opportunity, OpportunityStatus, Position, PositionId,
    StrategyBlueprint, StrategyId,
};
use crate::error::{Result, StoreError, ValidationError};

/// How many conflict retries a read-modify-write gets before the
/// failure surfaces as a validation error.
pub const CONFLICT_RETRIES: u32 = 3;

/// A record paired with its write sequence number.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub seq: u64,
    pub value: T,
}

/// The shared knowledge store.
pub struct KnowledgeStore {
    bus: Arc<MessageBus>,
    sequence: AtomicU64,
    markets: DashMap<MarketId, Versioned<Market>>,
    opportunities: DashMap<Fingerprint, Versioned<Opportunity>>,
    strategies: DashMap<StrategyId, Versioned<StrategyBlueprint>>,
    positions: DashMap<PositionId, Position>,
}

impl KnowledgeStore {
    #[must_use]
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            sequence: AtomicU64::new(1),
            markets: DashMap::new(),
            opportunities: DashMap::new(),
            strategies: DashMap::new(),
            positions: DashMap::new(),
        }
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    // -- markets ---------------------------------------------------------

    /// Upsert a market snapshot. A newer snapshot supersedes the old
    /// one; snapshots are never mutated in place.
    pub fn put_market(&self, market: Market) -> u64 {
        let seq = self.next_seq();
        self.markets
            .insert(market.id.clone(), Versioned { seq, value: market });
        seq
    }

    #[must_use]
    pub fn get_market(&self, id: &MarketId) -> Option<Market> {
        self.markets.get(id).map(|e| e.value.clone())
    }

    /// Snapshot of all current markets.
    #[must_use]
    pub fn markets(&self) -> Vec<Market> {
        self.markets.iter().map(|e| e.value.clone()).collect()
    }

    // -- opportunities ---------------------------------------------------

    /// Insert a new opportunity or refresh the open record for the same
    /// fingerprint. Returns true if a new record was created. At most
    /// one open opportunity exists per fingerprint at any time.
    pub fn upsert_opportunity(&self, opportunity: Opportunity) -> bool {
        let fingerprint = opportunity.fingerprint().clone();
        let mut created = false;
        let mut entry = self
            .opportunities
            .entry(fingerprint.clone())
            .and_modify(|existing| {
                if existing.value.is_open() {
                    existing
                        .value
                        .refresh(opportunity.edge(), opportunity.confidence());
                } else {
                    // Closed fingerprints may be re-detected fresh.
                    *existing = Versioned {
                        seq: 0,
                        value: opportunity.clone(),
                    };
                }
            })
            .or_insert_with(|| {
                created = true;
                Versioned {
                    seq: 0,
                    value: opportunity.clone(),
                }
            });
        entry.seq = self.next_seq();
        let event = if created {
            Event::OpportunityDetected(Arc::new(entry.value.clone()))
        } else {
            Event::OpportunityRefreshed(fingerprint)
        };
        drop(entry);
        self.bus.publish(event);
        created
    }

    #[must_use]
    pub fn get_opportunity(&self, fingerprint: &Fingerprint) -> Option<Versioned<Opportunity>> {
        self.opportunities.get(fingerprint).map(|e| e.clone())
    }

    /// Snapshot of opportunities matching the filter.
    #[must_use]
    pub fn opportunities<F>(&self, filter: F) -> Vec<Opportunity>
    where
        F: Fn(&Opportunity) -> bool,
    {
        self.opportunities
            .iter()
            .filter(|e| filter(&e.value))
            .map(|e| e.value.clone())
            .collect()
    }

    /// Snapshot of all open opportunities.
    #[must_use]
    pub fn open_opportunities(&self) -> Vec<Opportunity> {
        self.opportunities(Opportunity::is_open)
    }

    /// Apply a mutation to an opportunity under an optimistic sequence
    /// check. `expected_seq` must match the sequence the caller read.
    pub fn update_opportunity<F>(
        &self,
        fingerprint: &Fingerprint,
        expected_seq: u64,
        mutate: F,
    ) -> Result<u64>
    where
        F: FnOnce(&mut Opportunity),
    {
        let mut entry = self
            .opportunities
            .get_mut(fingerprint)
            .ok_or_else(|| StoreError::NotFound {
                id: fingerprint.to_string(),
            })?;
        if entry.seq != expected_seq {
            return Err(StoreError::Conflict {
                id: fingerprint.to_string(),
                expected: expected_seq,
                found: entry.seq,
            }
            .into());
        }
        mutate(&mut entry.value);
        entry.seq = self.next_seq();
        Ok(entry.seq)
    }

    /// Read-modify-write with bounded conflict retries, then surfaced
    /// as a validation error.
    pub fn update_opportunity_retrying<F>(&self, fingerprint: &Fingerprint, mutate: F) -> Result<u64>
    where
        F: Fn(&mut Opportunity),
    {
        for _ in 0..CONFLICT_RETRIES {
            let Some(current) = self.get_opportunity(fingerprint) else {
                return Err(StoreError::NotFound {
                    id: fingerprint.to_string(),
                }
                .into());
            };
            match self.update_opportunity(fingerprint, current.seq, &mutate) {
                Ok(seq) => return Ok(seq),
                Err(crate::error::Error::Store(StoreError::Conflict { .. })) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ValidationError::ConflictRetriesExhausted {
            entity: fingerprint.to_string(),
            retries: CONFLICT_RETRIES,
        }
        .into())
    }

    /// Close an opportunity so its fingerprint can be reused.
    pub fn mark_resolved(&self, fingerprint: &Fingerprint) -> Result<()> {
        let mut entry = self
            .opportunities
            .get_mut(fingerprint)
            .ok_or_else(|| StoreError::NotFound {
                id: fingerprint.to_string(),
            })?;
        entry.value.resolve();
        entry.seq = self.next_seq();
        Ok(())
    }

    /// Housekeeping: drop resolved/rejected opportunities older than
    /// the given age, and resolve expired ones. Returns records removed.
    pub fn prune_opportunities(&self, max_age_hours: i64) -> usize {
        let now = Utc::now();
        let cutoff = now - Duration::hours(max_age_hours);
        let before = self.opportunities.len();
        for mut entry in self.opportunities.iter_mut() {
            if entry.value.is_open() && entry.value.is_expired(now) {
                entry.value.resolve();
            }
        }
        self.opportunities.retain(|_, e| {
            e.value.status() == OpportunityStatus::Open || e.value.detected_at() > cutoff
        });
        let removed = before - self.opportunities.len();
        if removed > 0 {
            debug!(removed, "pruned stale opportunities");
        }
        removed
    }

    // -- strategies ------------------------------------------------------

    /// Register a blueprint and announce it. Registered blueprints are
    /// immutable; re-registering an id is a validation error.
    pub fn put_strategy(&self, blueprint: StrategyBlueprint) -> Result<u64> {
        let id = blueprint.id.clone();
        if self.strategies.contains_key(&id) {
            return Err(ValidationError::Invalid(format!(
                "strategy {id} is already registered; register a child instead"
            ))
            .into());
        }
        let seq = self.next_seq();
        let is_child = blueprint.parent.clone();
        self.strategies.insert(id.clone(), Versioned { seq, value: blueprint });
        match is_child {
            Some(parent) => self.bus.publish(Event::StrategyEvolved { parent, child: id }),
            None => self.bus.publish(Event::StrategyGenerated(id)),
        }
        Ok(seq)
    }

    #[must_use]
    pub fn get_strategy(&self, id: &StrategyId) -> Option<StrategyBlueprint> {
        self.strategies.get(id).map(|e| e.value.clone())
    }

    #[must_use]
    pub fn strategies(&self) -> Vec<StrategyBlueprint> {
        self.strategies.iter().map(|e| e.value.clone()).collect()
    }

    /// Remove a retired strategy from the registry.
    pub fn retire_strategy(&self, id: &StrategyId) -> bool {
        self.strategies.remove(id).is_some()
    }

    #[must_use]
    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    // -- position index --------------------------------------------------

    /// Index a position update published by the trading engine. The
    /// store never mutates position state itself.
    pub fn index_position(&self, position: Position) {
        self.positions.insert(position.id(), position);
    }

    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.positions.iter().map(|e| e.clone()).collect()
    }

    #[must_use]
    pub fn open_position_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    #[must_use]
    pub fn opportunity_count(&self) -> usize {
        self.opportunities.len()
    }
}
