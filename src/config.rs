//! Configuration loading from TOML files.
//!
//! All sections have defaults so the engine can run demo mode with no
//! config file at all. `Config::load` reads, parses, and validates.

use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub trading: TradingConfig,
    pub scanner: ScannerConfig,
    pub analyzer: AnalyzerConfig,
    pub evolution: EvolutionConfig,
    pub bus: BusConfig,
    pub logging: LoggingConfig,
}

/// Virtual account and position limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Starting virtual capital.
    pub initial_capital: Decimal,
    /// Max single position as a fraction of equity.
    pub max_position_size: Decimal,
    /// Portfolio drawdown fraction that trips the breaker.
    pub max_drawdown: Decimal,
    /// Fraction of the trip level at which the breaker clears.
    pub drawdown_recovery: Decimal,
    /// Slippage per unit of size/liquidity ratio.
    pub slippage_factor: Decimal,
    /// Hard cap on slippage as a fraction of the requested price.
    pub max_slippage: Decimal,
    /// Maximum simultaneously open positions.
    pub max_concurrent_positions: usize,
    /// Demo mode flag. Live execution is not implemented; `false` is
    /// rejected at validation.
    pub demo_mode: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(10000),
            max_position_size: dec!(0.2),
            max_drawdown: dec!(0.2),
            drawdown_recovery: dec!(0.8),
            slippage_factor: dec!(0.05),
            max_slippage: dec!(0.02),
            max_concurrent_positions: 10,
            demo_mode: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Seconds between market scans.
    pub scan_interval_secs: u64,
    /// YES ask + NO ask below this sum is an arbitrage.
    pub arbitrage_threshold: Decimal,
    /// Markets resolving within this many hours are time-decay candidates.
    pub time_decay_window_hours: i64,
    /// One side priced above this marks a time-decay favorite.
    pub favorite_threshold: Decimal,
    /// Liquidity below this flags thin-market mispricing checks.
    pub low_liquidity_threshold: Decimal,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 5,
            arbitrage_threshold: dec!(0.98),
            time_decay_window_hours: 24,
            favorite_threshold: dec!(0.8),
            low_liquidity_threshold: dec!(1000),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Opportunities scored below this confidence are marked rejected.
    pub confidence_floor: f64,
    /// Opportunities at or above this confidence are routed to execution.
    pub execution_threshold: f64,
    /// Bound on external probability-estimation calls.
    pub capability_timeout_millis: u64,
    /// Multiplier applied to confidence when the capability times out.
    pub timeout_confidence_penalty: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.4,
            execution_threshold: 0.7,
            capability_timeout_millis: 2_000,
            timeout_confidence_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Seconds between generator/evolver passes.
    pub interval_secs: u64,
    /// Backtest win rate a blueprint must exceed to register.
    pub min_win_rate: f64,
    /// Backtest max drawdown a blueprint must stay under.
    pub max_drawdown: f64,
    /// Trailing trade count used to rank registered strategies.
    pub performance_window: usize,
    /// Realized trades a trial child needs before promotion is considered.
    pub min_trial_samples: usize,
    /// Registry size cap.
    pub max_strategies: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            min_win_rate: 0.55,
            max_drawdown: 0.20,
            performance_window: 20,
            min_trial_samples: 5,
            max_strategies: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber queue depth before the oldest event is dropped.
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trading.initial_capital <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                field: "trading.initial_capital",
                reason: "must be positive".into(),
            }
            .into());
        }
        if self.trading.max_position_size <= Decimal::ZERO
            || self.trading.max_position_size > Decimal::ONE
        {
            return Err(ConfigError::InvalidValue {
                field: "trading.max_position_size",
                reason: "must be in (0, 1]".into(),
            }
            .into());
        }
        if self.trading.max_drawdown <= Decimal::ZERO || self.trading.max_drawdown >= Decimal::ONE
        {
            return Err(ConfigError::InvalidValue {
                field: "trading.max_drawdown",
                reason: "must be in (0, 1)".into(),
            }
            .into());
        }
        if !self.trading.demo_mode {
            return Err(ConfigError::InvalidValue {
                field: "trading.demo_mode",
                reason: "live execution is not supported".into(),
            }
            .into());
        }
        if self.scanner.arbitrage_threshold <= Decimal::ZERO
            || self.scanner.arbitrage_threshold > Decimal::ONE
        {
            return Err(ConfigError::InvalidValue {
                field: "scanner.arbitrage_threshold",
                reason: "must be in (0, 1]".into(),
            }
            .into());
        }
        if self.analyzer.confidence_floor > self.analyzer.execution_threshold {
            return Err(ConfigError::InvalidValue {
                field: "analyzer.confidence_floor",
                reason: "cannot exceed execution_threshold".into(),
            }
            .into());
        }
        if self.bus.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus.queue_capacity",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.initial_capital, dec!(10000));
        assert_eq!(config.scanner.arbitrage_threshold, dec!(0.98));
        assert_eq!(config.evolution.min_win_rate, 0.55);
    }

    #[test]
    fn parses_partial_toml() {
        let toml = r#"
            [trading]
            initial_capital = "5000"
            max_position_size = "0.1"

            [scanner]
            scan_interval_secs = 2
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.trading.initial_capital, dec!(5000));
        assert_eq!(config.trading.max_position_size, dec!(0.1));
        assert_eq!(config.scanner.scan_interval_secs, 2);
        // Untouched sections keep defaults
        assert_eq!(config.trading.max_drawdown, dec!(0.2));
    }

    #[test]
    fn rejects_live_mode() {
        let toml = r#"
            [trading]
            demo_mode = false
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_confidence_bounds() {
        let toml = r#"
            [analyzer]
            confidence_floor = 0.9
            execution_threshold = 0.5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
