// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Key-value store clients shared by the arcade services.
//!
//! Both services talk to the store only through [`KvStore`], so handlers can
//! be exercised against [`InMemoryKvStore`] while deployments use
//! [`DynamoKvStore`].

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{
    Client as DynamoClient,
    types::{AttributeValue, ReturnValue},
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::env_or;

const VALUE_ATTRIBUTE: &str = "value";

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored under `key`, `None` when absent.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Overwrite `key` unconditionally.
    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()>;

    /// Atomically add one to the integer under `key` (absent counts as zero)
    /// and return the new value.
    async fn incr(&self, key: &str) -> anyhow::Result<i64>;
}

/// Process-local store used when no DynamoDB endpoint is configured.
#[derive(Default)]
pub struct InMemoryKvStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        let mut values = self.values.write().await;
        let current = match values.get(key) {
            None => 0,
            Some(value) => value
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("value at {key} is not an integer"))?,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("value at {key} would overflow"))?;
        values.insert(key.to_string(), Value::from(next));
        Ok(next)
    }
}

/// DynamoDB-backed store.
///
/// Every key is one item: the partition key attribute holds the key and the
/// `value` attribute holds the payload. Integers are kept as `N` so that
/// `ADD` increments and plain reads see the same number; everything else is
/// serialized JSON in an `S` attribute.
#[derive(Clone)]
pub struct DynamoKvStore {
    client: DynamoClient,
    table_name: String,
    key_attribute: String,
}

impl DynamoKvStore {
    pub fn new(
        client: DynamoClient,
        table_name: impl Into<String>,
        key_attribute: impl Into<String>,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            key_attribute: key_attribute.into(),
        }
    }

    pub async fn from_env() -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(endpoint) = std::env::var("DYNAMODB_ENDPOINT") {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        Self::new(
            DynamoClient::new(&config),
            env_or("ARCADE_KV_TABLE", "arcade_kv"),
            env_or("ARCADE_KV_KEY_ATTRIBUTE", "key"),
        )
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn key_value(key: &str) -> AttributeValue {
        AttributeValue::S(key.to_string())
    }
}

#[async_trait]
impl KvStore for DynamoKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(&self.key_attribute, Self::key_value(key))
            .consistent_read(true)
            .send()
            .await
            .with_context(|| format!("failed to get {key} from {}", self.table_name))?;

        output
            .item()
            .and_then(|item| item.get(VALUE_ATTRIBUTE))
            .map(|attribute| decode_value(key, attribute))
            .transpose()
    }

    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item(&self.key_attribute, Self::key_value(key))
            .item(VALUE_ATTRIBUTE, encode_value(value)?)
            .send()
            .await
            .with_context(|| format!("failed to put {key} into {}", self.table_name))?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        let output = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(&self.key_attribute, Self::key_value(key))
            .update_expression("ADD #value :one")
            .expression_attribute_names("#value", VALUE_ATTRIBUTE)
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .with_context(|| format!("failed to increment {key} in {}", self.table_name))?;

        let attribute = output
            .attributes()
            .and_then(|attributes| attributes.get(VALUE_ATTRIBUTE))
            .ok_or_else(|| anyhow::anyhow!("increment of {key} returned no value"))?;
        decode_value(key, attribute)?
            .as_i64()
            .ok_or_else(|| anyhow::anyhow!("value at {key} is not an integer"))
    }
}

fn encode_value(value: &Value) -> anyhow::Result<AttributeValue> {
    if value.is_i64() || value.is_u64() {
        return Ok(AttributeValue::N(value.to_string()));
    }
    let payload = serde_json::to_string(value).context("failed to encode store value")?;
    Ok(AttributeValue::S(payload))
}

fn decode_value(key: &str, attribute: &AttributeValue) -> anyhow::Result<Value> {
    match attribute {
        AttributeValue::N(number) => number
            .parse::<i64>()
            .map(Value::from)
            .with_context(|| format!("value at {key} is not an integer: {number}")),
        AttributeValue::S(payload) => serde_json::from_str(payload)
            .with_context(|| format!("value at {key} is not valid JSON")),
        other => Err(anyhow::anyhow!(
            "unsupported attribute type stored at {key}: {other:?}"
        )),
    }
}

/// Build the store the services share for the lifetime of the process.
///
/// DynamoDB is used when `DYNAMODB_ENDPOINT` or `AWS_REGION` is set; otherwise
/// values live in memory and are lost on restart.
pub async fn load_kv_store() -> Arc<dyn KvStore> {
    if std::env::var("DYNAMODB_ENDPOINT").is_err() && std::env::var("AWS_REGION").is_err() {
        warn!("no DynamoDB configuration found; using in-memory key-value store");
        return Arc::new(InMemoryKvStore::new());
    }

    let store = DynamoKvStore::from_env().await;
    info!(table_name = %store.table_name(), "DynamoDB key-value store enabled");
    Arc::new(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_get_returns_none_for_absent_key() {
        let store = InMemoryKvStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_set_overwrites_previous_value() {
        let store = InMemoryKvStore::new();
        store.set("board", &json!([1, 2])).await.unwrap();
        store.set("board", &json!([])).await.unwrap();
        assert_eq!(store.get("board").await.unwrap(), Some(json!([])));
    }

    #[tokio::test]
    async fn in_memory_incr_treats_absent_as_zero() {
        let store = InMemoryKvStore::new();
        assert_eq!(store.incr("plays").await.unwrap(), 1);
        assert_eq!(store.incr("plays").await.unwrap(), 2);
        assert_eq!(store.get("plays").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn in_memory_incr_continues_from_set_integer() {
        let store = InMemoryKvStore::new();
        store.set("plays", &json!(50)).await.unwrap();
        assert_eq!(store.incr("plays").await.unwrap(), 51);
    }

    #[tokio::test]
    async fn in_memory_incr_rejects_non_integer_values() {
        let store = InMemoryKvStore::new();
        store.set("board", &json!(["x"])).await.unwrap();
        let error = store.incr("board").await.unwrap_err();
        assert!(error.to_string().contains("not an integer"));
    }

    #[test]
    fn integers_are_encoded_as_numbers() {
        assert_eq!(
            encode_value(&json!(50)).unwrap(),
            AttributeValue::N("50".to_string())
        );
    }

    #[test]
    fn non_integers_are_encoded_as_json_strings() {
        let encoded = encode_value(&json!([{"initials": "ACE", "score": 9}])).unwrap();
        let AttributeValue::S(payload) = &encoded else {
            panic!("expected string attribute, got {encoded:?}");
        };
        assert_eq!(
            serde_json::from_str::<Value>(payload).unwrap(),
            json!([{"initials": "ACE", "score": 9}])
        );
    }

    #[test]
    fn decode_reads_numbers_and_json_payloads() {
        assert_eq!(
            decode_value("plays", &AttributeValue::N("7".to_string())).unwrap(),
            json!(7)
        );
        assert_eq!(
            decode_value("board", &AttributeValue::S("[]".to_string())).unwrap(),
            json!([])
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_value("board", &AttributeValue::S("{not json".to_string())).is_err());
        assert!(decode_value("plays", &AttributeValue::Bool(true)).is_err());
    }
}
