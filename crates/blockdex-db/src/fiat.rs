//! Fiat exchange rate tickers in the `fiatRates` column family.
//!
//! Keys are UTC timestamps formatted as `YYYYMMDDhhmmss`, so the
//! lexicographic key order is chronological.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use rocksdb::{Direction, IteratorMode};
use serde::{Deserialize, Serialize};

use blockdex_core::constants::FIAT_RATES_TIME_FORMAT;
use blockdex_core::error::{CodecError, IndexError};

use crate::schema::CF_FIAT_RATES;
use crate::store::{storage_err, RocksIndex};

/// Exchange rates of the coin against fiat currencies at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRatesTicker {
    pub timestamp: DateTime<Utc>,
    pub rates: BTreeMap<String, f32>,
}

impl CurrencyRatesTicker {
    fn has_currency(&self, currency: Option<&str>) -> bool {
        currency.is_none_or(|c| self.rates.contains_key(c))
    }
}

fn ticker_key(ts: &DateTime<Utc>) -> String {
    ts.format(FIAT_RATES_TIME_FORMAT).to_string()
}

fn unpack_ticker(key: &[u8], value: &[u8]) -> Result<CurrencyRatesTicker, IndexError> {
    let key = std::str::from_utf8(key).map_err(|_| CodecError::InvalidUtf8)?;
    let timestamp = NaiveDateTime::parse_from_str(key, FIAT_RATES_TIME_FORMAT)
        .map_err(|e| CodecError::InvalidData(format!("fiat rates key {key}: {e}")))?
        .and_utc();
    let rates = serde_json::from_slice(value)?;
    Ok(CurrencyRatesTicker { timestamp, rates })
}

impl RocksIndex {
    pub fn fiat_rates_store_ticker(&self, ticker: &CurrencyRatesTicker) -> Result<(), IndexError> {
        if ticker.rates.is_empty() {
            return Err(IndexError::Serialization("fiat rates ticker has no rates".into()));
        }
        let cf = self.cf_handle(CF_FIAT_RATES)?;
        let value = serde_json::to_vec(&ticker.rates)?;
        self.db().put_cf(cf, ticker_key(&ticker.timestamp), value).map_err(storage_err)
    }

    /// Ticker stored at exactly `ts` (second precision).
    pub fn fiat_rates_get_ticker(&self, ts: &DateTime<Utc>) -> Result<Option<CurrencyRatesTicker>, IndexError> {
        let key = ticker_key(ts);
        match self.get(CF_FIAT_RATES, key.as_bytes())? {
            Some(value) => Ok(Some(unpack_ticker(key.as_bytes(), &value)?)),
            None => Ok(None),
        }
    }

    /// First ticker at or after `ts`, optionally the first one that quotes
    /// `currency`.
    pub fn fiat_rates_find_ticker(
        &self,
        ts: &DateTime<Utc>,
        currency: Option<&str>,
    ) -> Result<Option<CurrencyRatesTicker>, IndexError> {
        let cf = self.cf_handle(CF_FIAT_RATES)?;
        let start = ticker_key(ts);
        for item in self.db().iterator_cf(cf, IteratorMode::From(start.as_bytes(), Direction::Forward)) {
            let (key, value) = item.map_err(storage_err)?;
            let ticker = unpack_ticker(&key, &value)?;
            if ticker.has_currency(currency) {
                return Ok(Some(ticker));
            }
        }
        Ok(None)
    }

    /// Newest ticker, optionally the newest one that quotes `currency`.
    pub fn fiat_rates_find_last_ticker(&self, currency: Option<&str>) -> Result<Option<CurrencyRatesTicker>, IndexError> {
        let cf = self.cf_handle(CF_FIAT_RATES)?;
        for item in self.db().iterator_cf(cf, IteratorMode::End) {
            let (key, value) = item.map_err(storage_err)?;
            let ticker = unpack_ticker(&key, &value)?;
            if ticker.has_currency(currency) {
                return Ok(Some(ticker));
            }
        }
        Ok(None)
    }
}
