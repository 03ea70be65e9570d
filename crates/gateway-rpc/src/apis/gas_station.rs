use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use alloy_primitives::U256;
use async_trait::async_trait;
use gateway_node::{
    CfxClient,
    CfxClientProvider,
    ClientError,
};
use parking_lot::RwLock;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    context::CallContext,
    error::GatewayError,
    module::MethodHandler,
};

pub const DEFAULT_GAS_PRICE_TTL: Duration = Duration::from_secs(3);

/// Suggested gas prices, in drip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasStationPrice {
    pub min: U256,
    pub low: U256,
    pub medium: U256,
    pub high: U256,
}

impl GasStationPrice {
    /// Tiers derived from the node's current gas price.
    pub fn from_base(base: U256) -> Self {
        let scaled = |percent: u64| base.saturating_mul(U256::from(percent)) / U256::from(100);
        Self {
            min: base,
            low: base,
            medium: scaled(110),
            high: scaled(125),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    fetched_at: Instant,
    price: GasStationPrice,
}

/// Serves gas price suggestions, refreshing from the upstream at most once
/// per `ttl`.
#[derive(Debug)]
pub struct GasStationHandler {
    ttl: Duration,
    cached: RwLock<Option<CachedPrice>>,
}

impl Default for GasStationHandler {
    fn default() -> Self {
        Self::new(DEFAULT_GAS_PRICE_TTL)
    }
}

impl GasStationHandler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Cached suggestion if still fresh.
    pub fn cached(&self) -> Option<GasStationPrice> {
        let cached = *self.cached.read();
        cached
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.price)
    }

    pub async fn price(&self, client: &CfxClient) -> Result<GasStationPrice, ClientError> {
        if let Some(price) = self.cached() {
            return Ok(price);
        }

        let base = client.gas_price().await?;
        let price = GasStationPrice::from_base(base);
        debug!(%base, "Refreshed gas station price");
        *self.cached.write() = Some(CachedPrice {
            fetched_at: Instant::now(),
            price,
        });
        Ok(price)
    }
}

/// `gasstation_price` handler.
pub struct GasStationPriceMethod {
    provider: Arc<CfxClientProvider>,
    handler: Arc<GasStationHandler>,
}

impl GasStationPriceMethod {
    pub fn new(provider: Arc<CfxClientProvider>, handler: Arc<GasStationHandler>) -> Self {
        Self { provider, handler }
    }
}

#[async_trait]
impl MethodHandler for GasStationPriceMethod {
    async fn call(&self, ctx: &CallContext, _params: Value) -> Result<Value, GatewayError> {
        if let Some(price) = self.handler.cached() {
            return serde_json::to_value(price).map_err(|e| GatewayError::Internal(e.to_string()));
        }

        let client = self
            .provider
            .get_client_by_ip(ctx.identity.as_deref())
            .await?;
        let price = self.handler.price(&client).await?;
        serde_json::to_value(price).map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        Mock,
        MockServer,
        ResponseTemplate,
        matchers::{
            body_partial_json,
            method,
        },
    };

    async fn mock_node(gas_price: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "cfx_clientVersion"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "conflux-rust/v2.4.0"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "cfx_gasPrice"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": gas_price
            })))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn tiers_scale_base_price() {
        let price = GasStationPrice::from_base(U256::from(1_000_000_000u64));
        assert_eq!(price.min, U256::from(1_000_000_000u64));
        assert_eq!(price.medium, U256::from(1_100_000_000u64));
        assert_eq!(price.high, U256::from(1_250_000_000u64));

        let json = serde_json::to_value(price).unwrap();
        assert_eq!(json["min"], json!("0x3b9aca00"));
    }

    #[tokio::test]
    async fn price_is_cached_within_ttl() {
        let server = mock_node("0x3b9aca00").await;
        let client = CfxClient::connect(&server.uri(), None).await.unwrap();
        let handler = GasStationHandler::new(Duration::from_secs(60));

        assert!(handler.cached().is_none());
        let first = handler.price(&client).await.unwrap();
        let second = handler.price(&client).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.low, U256::from(1_000_000_000u64));
        assert_eq!(handler.cached(), Some(first));
    }

    #[test]
    fn expired_price_is_not_served() {
        let handler = GasStationHandler::new(Duration::ZERO);
        *handler.cached.write() = Some(CachedPrice {
            fetched_at: Instant::now(),
            price: GasStationPrice::from_base(U256::from(1u64)),
        });
        assert!(handler.cached().is_none());
    }
}
