//! Best-rate selection across providers
//!
//! Every configured provider is evaluated concurrently from the cache. The
//! winner is the quote with the strictly greatest effective rate; ties keep
//! the provider that comes first in priority order.

use crate::cache::{RateCache, RateQuote};
use crate::error::EngineResult;
use crate::metrics;
use crate::providers::ProviderKind;
use crate::transaction::RateType;

use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Selected provider and the quote that won
#[derive(Debug, Clone, PartialEq)]
pub struct BestRate {
    pub provider: ProviderKind,
    pub quote: RateQuote,
    pub effective_rate: Decimal,
}

pub struct RateAggregator {
    cache: RateCache,
    /// Iteration order doubles as the tie-break order
    providers: Vec<ProviderKind>,
}

impl RateAggregator {
    pub fn new(cache: RateCache, providers: Vec<ProviderKind>) -> Self {
        Self { cache, providers }
    }

    /// Quote from one provider if it lists both coins with the needed
    /// direction enabled and holds a fresh rate for the pair
    async fn candidate(
        &self,
        provider: ProviderKind,
        rate_type: RateType,
        from: (&str, &str),
        to: (&str, &str),
    ) -> EngineResult<Option<RateQuote>> {
        let from_info = self.cache.get_coin_info(provider, from.0, from.1).await?;
        if !from_info.map_or(false, |info| info.can_send) {
            debug!(%provider, coin = from.0, network = from.1, "No usable source coin mapping");
            return Ok(None);
        }

        let to_info = self.cache.get_coin_info(provider, to.0, to.1).await?;
        if !to_info.map_or(false, |info| info.can_receive) {
            debug!(%provider, coin = to.0, network = to.1, "No usable target coin mapping");
            return Ok(None);
        }

        self.cache.get_rate(provider, rate_type, from, to).await
    }

    /// Cached quotes hold both sides of a reference amount, so the ranking
    /// by `amount_out / amount_in` is the same whichever side the customer
    /// fixes. Direction only matters once the order is created.
    pub async fn get_best_rate(
        &self,
        rate_type: RateType,
        from: (&str, &str),
        to: (&str, &str),
    ) -> Option<BestRate> {
        let lookups = self
            .providers
            .iter()
            .map(|&provider| self.candidate(provider, rate_type, from, to));
        // join_all yields results in input order regardless of completion order
        let results = join_all(lookups).await;

        let mut best: Option<BestRate> = None;
        for (&provider, result) in self.providers.iter().zip(results) {
            let quote = match result {
                Ok(Some(quote)) => quote,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%provider, "Skipping provider during rate lookup: {}", e);
                    continue;
                }
            };

            let Some(rate) = quote.effective_rate() else {
                debug!(%provider, "Ignoring quote with zero input amount");
                continue;
            };

            if best.as_ref().map_or(true, |b| rate > b.effective_rate) {
                best = Some(BestRate {
                    provider,
                    quote,
                    effective_rate: rate,
                });
            }
        }

        metrics::record_best_rate(best.as_ref().map(|b| b.provider));
        if let Some(b) = &best {
            debug!(
                provider = %b.provider,
                rate = %b.effective_rate,
                "Best {} rate {}/{} -> {}/{}",
                rate_type.as_str(),
                from.0,
                from.1,
                to.0,
                to.1
            );
        }
        best
    }
}
