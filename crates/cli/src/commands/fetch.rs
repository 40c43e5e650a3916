//! Resource and collection reads.
//!
//! # Usage
//!
//! ```bash
//! # Fetch a resource through the cache
//! fairway fetch "rest/v1/courses?select=*" --ttl 3600
//!
//! # Query a collection
//! fairway query check_ins --eq user_id=42 --order created_at.desc --limit 20
//! ```

use std::time::Duration;

use clap::Args;
use fairway_client::FairwayClient;
use fairway_client::data::{FilterOp, Order, Query};
use fairway_client::error::Result;
use fairway_client::fetch::FetchOptions;
use serde_json::Value;

/// Per-call fetch overrides.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Cache lifetime in seconds
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Bypass the cache lookup (the result is still stored)
    #[arg(long)]
    pub skip_cache: bool,

    /// Retries after the first attempt
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Store the result under this key instead of the resource path
    #[arg(long)]
    pub cache_key: Option<String>,
}

impl FetchArgs {
    fn apply(&self, mut options: FetchOptions) -> FetchOptions {
        if let Some(ttl) = self.ttl {
            options = options.with_ttl(Duration::from_secs(ttl));
        }
        if let Some(retries) = self.retries {
            options = options.with_max_retries(retries);
        }
        if let Some(timeout) = self.timeout {
            options = options.with_timeout(Duration::from_secs(timeout));
        }
        if let Some(key) = &self.cache_key {
            options = options.with_cache_key(key.clone());
        }
        options.with_skip_cache(self.skip_cache)
    }
}

/// Collection query arguments.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Collection name
    pub collection: String,

    /// Columns to select
    #[arg(long, default_value = "*")]
    pub select: String,

    /// Equality filter, `column=value` (repeatable)
    #[arg(long = "eq", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,

    /// Sort key, `column` or `column.desc` (repeatable)
    #[arg(long = "order", value_parser = parse_order)]
    pub order: Vec<(String, Order)>,

    #[arg(long)]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

impl QueryArgs {
    fn query(&self) -> Query {
        let mut query = Query::new(&self.collection).select(&self.select);
        for (column, value) in &self.filters {
            query = query.filter(column, FilterOp::Eq, value);
        }
        for (column, direction) in &self.order {
            query = query.order(column, *direction);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

/// Fetch a resource and print it.
pub async fn resource(client: &FairwayClient, path: &str, args: &FetchArgs) -> Result<()> {
    let fetcher = client.fetcher();
    let value = fetcher.fetch_value(path, args.apply(fetcher.options())).await?;
    print_json(&value);
    Ok(())
}

/// Query a collection and print the rows.
pub async fn collection(client: &FairwayClient, args: &QueryArgs) -> Result<()> {
    let options = args.fetch.apply(client.fetcher().options());
    let rows: Vec<Value> = client.data().select(&args.query(), options).await?;
    tracing::info!(rows = rows.len(), collection = %args.collection, "Query complete");
    print_json(&Value::Array(rows));
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_json(value: &Value) {
    println!("{value:#}");
}

fn parse_filter(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .filter(|(column, _)| !column.is_empty())
        .map(|(column, value)| (column.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected column=value, got '{s}'"))
}

fn parse_order(s: &str) -> std::result::Result<(String, Order), String> {
    let (column, direction) = match s.rsplit_once('.') {
        Some((column, "desc")) => (column, Order::Desc),
        Some((column, "asc")) => (column, Order::Asc),
        _ => (s, Order::Asc),
    };
    if column.is_empty() {
        return Err(format!("expected column or column.desc, got '{s}'"));
    }
    Ok((column.to_string(), direction))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            parse_filter("user_id=42").unwrap(),
            ("user_id".to_string(), "42".to_string())
        );
        assert_eq!(
            parse_filter("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_filter("user_id").is_err());
        assert!(parse_filter("=42").is_err());
    }

    #[test]
    fn test_parse_order() {
        assert_eq!(
            parse_order("created_at.desc").unwrap(),
            ("created_at".to_string(), Order::Desc)
        );
        assert_eq!(
            parse_order("name").unwrap(),
            ("name".to_string(), Order::Asc)
        );
        assert!(parse_order(".desc").is_err());
    }

    #[test]
    fn test_query_args_build_path() {
        let args = QueryArgs {
            collection: "check_ins".to_string(),
            select: "*".to_string(),
            filters: vec![("user_id".to_string(), "42".to_string())],
            order: vec![("created_at".to_string(), Order::Desc)],
            limit: Some(5),
            fetch: FetchArgs {
                ttl: None,
                skip_cache: false,
                retries: None,
                timeout: None,
                cache_key: None,
            },
        };
        assert_eq!(
            args.query().path(),
            "rest/v1/check_ins?select=*&user_id=eq.42&order=created_at.desc&limit=5"
        );
    }

    #[test]
    fn test_fetch_args_override_defaults() {
        let args = FetchArgs {
            ttl: Some(60),
            skip_cache: true,
            retries: Some(0),
            timeout: None,
            cache_key: Some("courses".to_string()),
        };
        let options = args.apply(FetchOptions::default());
        assert_eq!(options.ttl, Duration::from_secs(60));
        assert!(options.skip_cache);
        assert_eq!(options.max_retries, 0);
        assert_eq!(options.cache_key.as_deref(), Some("courses"));
        assert_eq!(options.timeout, FetchOptions::default().timeout);
    }
}
