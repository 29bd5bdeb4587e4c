use std::collections::HashMap;

use tokenmeter_config::ModelPricing;

/// Maps a model and its token counts to a USD cost.
///
/// Implementations must be pure; the store calls them from whichever thread
/// is appending or backfilling.
pub trait PricingOracle: Send + Sync {
    fn cost_of(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64;
}

impl<F> PricingOracle for F
where
    F: Fn(&str, u64, u64) -> f64 + Send + Sync,
{
    fn cost_of(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self(model, input_tokens, output_tokens)
    }
}

/// Calculate the cost for a set of token counts given per-million rates.
pub fn calculate_cost(input_tokens: u64, output_tokens: u64, pricing: &ModelPricing) -> f64 {
    let input_cost = (input_tokens as f64 / 1_000_000.0) * pricing.input;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * pricing.output;
    input_cost + output_cost
}

/// Price table loaded from configuration.
///
/// Lookup tries the exact model name first, then the longest configured
/// prefix, so dated snapshots such as `gpt-4o-2024-08-06` pick up the
/// `gpt-4o` entry. Unknown models cost nothing.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: HashMap<String, ModelPricing>,
}

impl PriceTable {
    pub fn new(prices: HashMap<String, ModelPricing>) -> Self {
        Self { prices }
    }

    pub fn lookup(&self, model: &str) -> Option<&ModelPricing> {
        if let Some(p) = self.prices.get(model) {
            return Some(p);
        }
        self.prices
            .iter()
            .filter(|(name, _)| !name.is_empty() && model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, p)| p)
    }
}

impl PricingOracle for PriceTable {
    fn cost_of(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.lookup(model)
            .map(|p| calculate_cost(input_tokens, output_tokens, p))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PriceTable {
        let mut prices = HashMap::new();
        prices.insert(
            "gpt-4".to_string(),
            ModelPricing {
                input: 30.0,
                output: 30.0,
            },
        );
        prices.insert(
            "gpt-4o".to_string(),
            ModelPricing {
                input: 2.5,
                output: 10.0,
            },
        );
        PriceTable::new(prices)
    }

    #[test]
    fn test_calculate_cost() {
        let pricing = ModelPricing {
            input: 3.0,
            output: 15.0,
        };
        // 1M input × $3 + 500K output × $15 = $10.50
        let cost = calculate_cost(1_000_000, 500_000, &pricing);
        assert!((cost - 10.5).abs() < 1e-9);
    }

    #[test]
    fn exact_match_wins() {
        // 100 × 30/1M + 50 × 30/1M
        let cost = table().cost_of("gpt-4", 100, 50);
        assert!((cost - 0.0045).abs() < 1e-12);
    }

    #[test]
    fn longest_prefix_is_used() {
        let t = table();
        let p = t.lookup("gpt-4o-2024-08-06").unwrap();
        assert_eq!(p.input, 2.5);
        let p = t.lookup("gpt-4-turbo").unwrap();
        assert_eq!(p.input, 30.0);
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(table().cost_of("llama-3", 1_000_000, 1_000_000), 0.0);
        assert_eq!(table().cost_of("", 10, 10), 0.0);
    }

    #[test]
    fn closures_are_oracles() {
        let oracle = |_: &str, i: u64, o: u64| (i + o) as f64;
        assert_eq!(oracle.cost_of("any", 2, 3), 5.0);
    }
}
