use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use signal_core::{AssetClass, Bar};
use std::path::PathBuf;

/// Cache key for one day's worth of bar history. The as-of date is part of
/// the key so cached data never straddles trading sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub lookback_days: i64,
    pub as_of: NaiveDate,
}

impl CacheKey {
    pub fn today(symbol: &str, asset_class: AssetClass, lookback_days: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            asset_class,
            lookback_days,
            as_of: Utc::now().date_naive(),
        }
    }

    fn file_name(&self) -> String {
        let safe_symbol = self.symbol.replace('/', "_");
        format!(
            "{}_{}_{}_{}.json",
            safe_symbol,
            self.asset_class.as_str(),
            self.lookback_days,
            self.as_of.format("%Y-%m-%d")
        )
    }
}

/// Two-level bar memoisation: an in-process map plus optional on-disk JSON.
/// Disabled by default; the provider only consults it when the operator opts
/// in via configuration.
pub struct BarCache {
    memory: DashMap<CacheKey, Vec<Bar>>,
    disk_dir: Option<PathBuf>,
}

impl BarCache {
    pub fn in_memory() -> Self {
        Self {
            memory: DashMap::new(),
            disk_dir: None,
        }
    }

    /// Cache backed by `<cache_dir>/sentinel/bars`
    pub fn with_disk() -> Self {
        let disk_dir = dirs::cache_dir().map(|d| d.join("sentinel").join("bars"));
        if let Some(dir) = &disk_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!("Failed to create bar cache dir {:?}: {}", dir, e);
            }
        }
        Self {
            memory: DashMap::new(),
            disk_dir,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<Bar>> {
        if let Some(bars) = self.memory.get(key) {
            return Some(bars.clone());
        }

        let dir = self.disk_dir.as_ref()?;
        let path = dir.join(key.file_name());
        let raw = std::fs::read_to_string(path).ok()?;
        let bars: Vec<Bar> = serde_json::from_str(&raw).ok()?;
        self.memory.insert(key.clone(), bars.clone());
        Some(bars)
    }

    pub fn put(&self, key: CacheKey, bars: &[Bar]) {
        if let Some(dir) = &self.disk_dir {
            let path = dir.join(key.file_name());
            match serde_json::to_string(bars) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(&path, json) {
                        tracing::warn!("Failed to write bar cache {:?}: {}", path, e);
                    }
                }
                Err(e) => tracing::warn!("Failed to serialize bars for cache: {}", e),
            }
        }
        self.memory.insert(key, bars.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bars() -> Vec<Bar> {
        vec![Bar {
            timestamp: chrono::Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1234.0,
        }]
    }

    #[test]
    fn memory_cache_round_trip() {
        let cache = BarCache::in_memory();
        let key = CacheKey {
            symbol: "BTC/USD".into(),
            asset_class: AssetClass::Crypto,
            lookback_days: 365,
            as_of: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        };

        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), &sample_bars());
        assert_eq!(cache.get(&key).unwrap().len(), 1);
    }

    #[test]
    fn key_differs_by_as_of_date() {
        let a = CacheKey {
            symbol: "AAPL".into(),
            asset_class: AssetClass::Equity,
            lookback_days: 90,
            as_of: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        };
        let mut b = a.clone();
        b.as_of = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        assert_ne!(a, b);
        assert_ne!(a.file_name(), b.file_name());
    }
}
