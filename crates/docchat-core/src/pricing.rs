//! Per-model token pricing and cost estimation.
//!
//! Prices are USD per one million tokens. Models without an entry are
//! charged at the [`FALLBACK_MODEL`] rate, except local (`ollama:`)
//! models, which are free.

use std::collections::HashMap;

use serde::Deserialize;

pub const FALLBACK_MODEL: &str = "gpt-4o-mini";
pub const EMBEDDING_PRICE_MODEL: &str = "text-embedding-3-small";
const LOCAL_PREFIX: &str = "ollama:";

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelPrice {
    pub input_per_1m: f64,
    #[serde(default)]
    pub output_per_1m: f64,
}

/// Price table with built-in defaults, extendable from configuration.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut prices = HashMap::new();
        for (model, input, output) in [
            ("gpt-4o-mini", 0.15, 0.60),
            ("gpt-4o", 2.50, 10.00),
            ("gpt-4-turbo", 10.00, 30.00),
            ("text-embedding-3-small", 0.02, 0.0),
        ] {
            prices.insert(
                model.to_string(),
                ModelPrice {
                    input_per_1m: input,
                    output_per_1m: output,
                },
            );
        }
        Self { prices }
    }
}

impl PriceTable {
    /// Built-in prices overlaid with `overrides`.
    pub fn with_overrides(overrides: &HashMap<String, ModelPrice>) -> Self {
        let mut table = Self::default();
        for (model, price) in overrides {
            table.prices.insert(model.clone(), *price);
        }
        table
    }

    pub fn price_for(&self, model: &str) -> Option<ModelPrice> {
        if let Some(p) = self.prices.get(model) {
            return Some(*p);
        }
        if model.starts_with(LOCAL_PREFIX) {
            return None;
        }
        self.prices.get(FALLBACK_MODEL).copied()
    }

    /// Cost in USD, rounded to six decimals.
    pub fn estimate_cost(&self, model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
        let Some(price) = self.price_for(model) else {
            return 0.0;
        };
        let raw = (input_tokens as f64 * price.input_per_1m
            + output_tokens as f64 * price.output_per_1m)
            / 1_000_000.0;
        (raw * 1_000_000.0).round() / 1_000_000.0
    }

    /// Cost of embedding `tokens` tokens with the external embedding model.
    pub fn embedding_cost(&self, tokens: i64) -> f64 {
        self.estimate_cost(EMBEDDING_PRICE_MODEL, tokens, 0)
    }
}
