use std::collections::HashMap;

/// Brokers report crypto positions without the quote separator
/// ("BTC/USD" -> "BTCUSD"). Normalised symbols are the comparison key for
/// reconciliation.
pub fn normalize_broker_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

/// Bidirectional map between configured symbols and their broker forms
#[derive(Debug, Default)]
pub struct SymbolMap {
    to_original: HashMap<String, String>,
}

impl SymbolMap {
    pub fn from_symbols<'a>(symbols: impl IntoIterator<Item = &'a String>) -> Self {
        let to_original = symbols
            .into_iter()
            .map(|s| (normalize_broker_symbol(s), s.clone()))
            .collect();
        Self { to_original }
    }

    /// Configured form for a broker-normalised symbol, falling back to the
    /// normalised form itself when unknown.
    pub fn denormalize(&self, normalized: &str) -> String {
        self.to_original
            .get(normalized)
            .cloned()
            .unwrap_or_else(|| normalized.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_separator() {
        assert_eq!(normalize_broker_symbol("BTC/USD"), "BTCUSD");
        assert_eq!(normalize_broker_symbol("AAPL"), "AAPL");
    }

    #[test]
    fn map_round_trips_configured_symbols() {
        let symbols = vec!["BTC/USD".to_string(), "ETH/USD".to_string()];
        let map = SymbolMap::from_symbols(&symbols);

        assert_eq!(map.denormalize("BTCUSD"), "BTC/USD");
        assert_eq!(map.denormalize("ETHUSD"), "ETH/USD");
        // Unknown symbols pass through
        assert_eq!(map.denormalize("DOGEUSD"), "DOGEUSD");
    }
}
