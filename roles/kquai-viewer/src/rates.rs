//! Quai/Qi conversion lookups against the node's current rate.

use kquai_metrics::BigUint;
use quai_rpc::{
    hex::{biguint_from_value, encode_biguint},
    CallOptions, RpcBatchClient,
};
use serde_json::json;
use std::{str::FromStr, sync::Arc};

use crate::{config::MethodNames, error::ViewerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    QuaiToQi,
    QiToQuai,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::QuaiToQi => "quai_to_qi",
            Direction::QiToQuai => "qi_to_quai",
        }
    }
}

impl FromStr for Direction {
    type Err = ViewerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quai_to_qi" => Ok(Direction::QuaiToQi),
            "qi_to_quai" => Ok(Direction::QiToQuai),
            other => Err(ViewerError::InvalidRequest(format!(
                "unknown conversion direction: {}",
                other
            ))),
        }
    }
}

pub struct ConversionRates {
    client: Arc<RpcBatchClient>,
    methods: MethodNames,
    options: CallOptions,
}

impl ConversionRates {
    pub fn new(client: Arc<RpcBatchClient>, methods: MethodNames, options: CallOptions) -> Self {
        Self {
            client,
            methods,
            options,
        }
    }

    /// Convert `amount` at the rate of the latest block.
    pub async fn convert(
        &self,
        direction: Direction,
        amount: &BigUint,
    ) -> Result<BigUint, ViewerError> {
        let method = match direction {
            Direction::QuaiToQi => &self.methods.quai_to_qi,
            Direction::QiToQuai => &self.methods.qi_to_quai,
        };
        let result = self
            .client
            .call(method, json!([encode_biguint(amount), "latest"]), &self.options)
            .await?;
        Ok(biguint_from_value(&result)?)
    }

    pub async fn quai_to_qi(&self, amount: &BigUint) -> Result<BigUint, ViewerError> {
        self.convert(Direction::QuaiToQi, amount).await
    }

    pub async fn qi_to_quai(&self, amount: &BigUint) -> Result<BigUint, ViewerError> {
        self.convert(Direction::QiToQuai, amount).await
    }
}
