//! RediSearch-backed retrieval store.
//!
//! One hash per record under `{index}:` with the full record as JSON, the
//! lexical text, a server tag, and the embedding vector as a little-endian
//! f32 blob. KNN runs through `FT.SEARCH` with a vector query; the lexical
//! side is a plain `FT.SEARCH` text query with scores.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::debug;

use super::{tokenize, RetrievalStore};
use crate::{
    error::{RetrievalError, RetrievalResult},
    record::ToolRecord,
};

pub struct RedisStore {
    pool: Pool,
    index: String,
    prefix: String,
    index_ready: AtomicBool,
}

impl RedisStore {
    pub fn new(url: &str, index: impl Into<String>, pool_max: usize) -> RetrievalResult<Self> {
        let index = index.into();
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_max.max(1)));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| RetrievalError::Store(format!("create redis pool: {}", e)))?;

        Ok(Self {
            prefix: format!("{}:", index),
            pool,
            index,
            index_ready: AtomicBool::new(false),
        })
    }

    async fn conn(&self) -> RetrievalResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| RetrievalError::Store(format!("redis connection: {}", e)))
    }

    fn record_key(&self, server_id: &str, name: &str) -> String {
        format!("{}{}:{}", self.prefix, server_id, name)
    }

    /// Create the search index if it does not exist yet.
    async fn ensure_index(
        &self,
        conn: &mut deadpool_redis::Connection,
        dim: usize,
    ) -> RetrievalResult<()> {
        if self.index_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let result = redis::cmd("FT.CREATE")
            .arg(&self.index)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg(&self.prefix)
            .arg("SCHEMA")
            .arg("server")
            .arg("TAG")
            .arg("text")
            .arg("TEXT")
            .arg("vector")
            .arg("VECTOR")
            .arg("FLAT")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(dim)
            .arg("DISTANCE_METRIC")
            .arg("COSINE")
            .query_async::<()>(conn)
            .await;

        match result {
            Ok(()) => {
                debug!(index = %self.index, dim, "Created search index");
                self.index_ready.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) if e.to_string().contains("already exists") => {
                self.index_ready.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => Err(RetrievalError::Store(format!("create index: {}", e))),
        }
    }
}

#[async_trait]
impl RetrievalStore for RedisStore {
    async fn upsert(&self, records: Vec<ToolRecord>) -> RetrievalResult<()> {
        let Some(dim) = records
            .iter()
            .map(|r| r.vector.len())
            .find(|len| *len > 0)
        else {
            return Err(RetrievalError::Store(
                "records must carry embedding vectors".into(),
            ));
        };

        let mut conn = self.conn().await?;
        self.ensure_index(&mut conn, dim).await?;

        let mut pipe = redis::pipe();
        for record in &records {
            let json = serde_json::to_string(record)
                .map_err(|e| RetrievalError::Store(format!("serialize record: {}", e)))?;
            let text = format!(
                "{} {} {}",
                record.name,
                record.description,
                record.keywords.join(" ")
            );
            pipe.cmd("HSET")
                .arg(self.record_key(&record.server_id, &record.name))
                .arg("json")
                .arg(json)
                .arg("server")
                .arg(&record.server_id)
                .arg("text")
                .arg(text)
                .arg("vector")
                .arg(vector_blob(&record.vector));
        }

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| RetrievalError::Store(format!("upsert: {}", e)))
    }

    async fn fetch(&self, server_id: &str, name: &str) -> RetrievalResult<Option<ToolRecord>> {
        let mut conn = self.conn().await?;
        let json: Option<String> = redis::cmd("HGET")
            .arg(self.record_key(server_id, name))
            .arg("json")
            .query_async(&mut conn)
            .await
            .map_err(|e| RetrievalError::Store(format!("fetch: {}", e)))?;

        match json {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| RetrievalError::Store(format!("parse record: {}", e))),
            None => Ok(None),
        }
    }

    async fn knn_search(
        &self,
        vector: &[f32],
        k: usize,
        server_filter: Option<&str>,
    ) -> RetrievalResult<Vec<(ToolRecord, f32)>> {
        if k == 0 || vector.is_empty() {
            return Ok(vec![]);
        }

        let query = knn_query(k, server_filter);
        let mut conn = self.conn().await?;
        let reply: redis::Value = redis::cmd("FT.SEARCH")
            .arg(&self.index)
            .arg(&query)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(vector_blob(vector))
            .arg("SORTBY")
            .arg("dist")
            .arg("ASC")
            .arg("RETURN")
            .arg(2)
            .arg("json")
            .arg("dist")
            .arg("LIMIT")
            .arg(0)
            .arg(k)
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await
            .map_err(|e| RetrievalError::Store(format!("knn search: {}", e)))?;

        Ok(parse_search_reply(&reply, "dist", false))
    }

    async fn text_search(
        &self,
        query: &str,
        server_filter: Option<&str>,
    ) -> RetrievalResult<Vec<(ToolRecord, f32)>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(vec![]);
        }

        let query = text_query(&terms, server_filter);
        let mut conn = self.conn().await?;
        let result = redis::cmd("FT.SEARCH")
            .arg(&self.index)
            .arg(&query)
            .arg("WITHSCORES")
            .arg("RETURN")
            .arg(1)
            .arg("json")
            .query_async::<redis::Value>(&mut conn)
            .await;

        match result {
            Ok(reply) => Ok(parse_search_reply(&reply, "", true)),
            // An unbuilt index is a zero contribution, not a failure.
            Err(e) if e.to_string().contains("no such index") => Ok(vec![]),
            Err(e) => Err(RetrievalError::Store(format!("text search: {}", e))),
        }
    }

    async fn count(&self) -> RetrievalResult<usize> {
        let mut conn = self.conn().await?;
        let result = redis::cmd("FT.SEARCH")
            .arg(&self.index)
            .arg("*")
            .arg("LIMIT")
            .arg(0)
            .arg(0)
            .query_async::<redis::Value>(&mut conn)
            .await;

        match result {
            Ok(redis::Value::Array(items)) => Ok(items
                .first()
                .and_then(value_to_i64)
                .unwrap_or(0)
                .max(0) as usize),
            Ok(_) => Ok(0),
            Err(e) if e.to_string().contains("no such index") => Ok(0),
            Err(e) => Err(RetrievalError::Store(format!("count: {}", e))),
        }
    }

    async fn clear(&self) -> RetrievalResult<()> {
        let mut conn = self.conn().await?;
        let result = redis::cmd("FT.DROPINDEX")
            .arg(&self.index)
            .arg("DD")
            .query_async::<()>(&mut conn)
            .await;

        self.index_ready.store(false, Ordering::Release);
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("no such index") => Ok(()),
            Err(e) => Err(RetrievalError::Store(format!("clear: {}", e))),
        }
    }
}

/// Encode a vector as the little-endian f32 blob RediSearch expects.
fn vector_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Escape a value for use inside a TAG filter.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if !c.is_ascii_alphanumeric() {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn knn_query(k: usize, server_filter: Option<&str>) -> String {
    match server_filter {
        Some(server) => format!(
            "(@server:{{{}}})=>[KNN {} @vector $vec AS dist]",
            escape_tag(server),
            k
        ),
        None => format!("*=>[KNN {} @vector $vec AS dist]", k),
    }
}

fn text_query(terms: &[String], server_filter: Option<&str>) -> String {
    let alternation = terms.join("|");
    match server_filter {
        Some(server) => format!("(@server:{{{}}}) @text:({})", escape_tag(server), alternation),
        None => format!("@text:({})", alternation),
    }
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(i) => Some(i.to_string()),
        redis::Value::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

fn value_to_i64(value: &redis::Value) -> Option<i64> {
    match value {
        redis::Value::Int(i) => Some(*i),
        other => value_to_string(other)?.parse().ok(),
    }
}

/// Parse an `FT.SEARCH` reply into records with a score.
///
/// Layout is `[total, key, (score,) fields, key, (score,) fields, ...]`;
/// `with_scores` selects the WITHSCORES layout, otherwise the score is read
/// from the named return field. Malformed entries are skipped.
fn parse_search_reply(
    reply: &redis::Value,
    score_field: &str,
    with_scores: bool,
) -> Vec<(ToolRecord, f32)> {
    let redis::Value::Array(items) = reply else {
        return vec![];
    };

    let mut results = Vec::new();
    let mut cursor = 1; // skip the total count

    while cursor < items.len() {
        // Document key
        cursor += 1;

        let mut score = if with_scores {
            let value = items
                .get(cursor)
                .and_then(value_to_string)
                .and_then(|s| s.parse::<f32>().ok());
            cursor += 1;
            value
        } else {
            None
        };

        let Some(redis::Value::Array(fields)) = items.get(cursor) else {
            break;
        };
        cursor += 1;

        let mut json = None;
        let mut pairs = fields.chunks_exact(2);
        for pair in &mut pairs {
            let Some(field) = value_to_string(&pair[0]) else {
                continue;
            };
            if field == "json" {
                json = value_to_string(&pair[1]);
            } else if !with_scores && field == score_field {
                score = value_to_string(&pair[1]).and_then(|s| s.parse::<f32>().ok());
            }
        }

        let Some(json) = json else { continue };
        let Ok(record) = serde_json::from_str::<ToolRecord>(&json) else {
            continue;
        };
        results.push((record, score.unwrap_or(0.0)));
    }

    results
}
