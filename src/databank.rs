//! Data bank: every extracted item across the library, searchable.
//!
//! Items are joined with their parent document so each row carries the
//! document title and source. Stats aggregate by type, by source and by tag
//! (tags are exploded from `tags_json` with `json_each`).

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::HubError;
use crate::models::{format_ts_iso, ItemType};
use crate::search::{paging, Page};

const TOP_TAGS: i64 = 20;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataBankQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default, alias = "type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataBankItem {
    pub id: String,
    pub document_id: String,
    pub document_title: String,
    pub document_source: String,
    pub item_type: String,
    pub body: String,
    pub context: Option<String>,
    pub significance: Option<String>,
    pub page: Option<i64>,
    pub tags: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataBankStats {
    pub total_items: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_source: BTreeMap<String, i64>,
    pub top_tags: Vec<TagCount>,
}

const ITEM_SELECT: &str = r#"SELECT i.id, i.document_id, d.title AS document_title, d.source AS document_source,
       i.item_type, i.body, i.context, i.significance, i.page, i.tags_json, i.created_at
   FROM extracted_items i JOIN documents d ON d.id = i.document_id"#;

fn item_from_row(r: &SqliteRow) -> DataBankItem {
    let tags: String = r.get("tags_json");
    DataBankItem {
        id: r.get("id"),
        document_id: r.get("document_id"),
        document_title: r.get("document_title"),
        document_source: r.get("document_source"),
        item_type: r.get("item_type"),
        body: r.get("body"),
        context: r.get("context"),
        significance: r.get("significance"),
        page: r.get("page"),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        created_at: format_ts_iso(r.get("created_at")),
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, q: &'a DataBankQuery) -> Result<(), HubError> {
    qb.push(" WHERE 1 = 1");
    if let Some(search) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        qb.push(" AND (i.body LIKE ")
            .push_bind(pattern.clone())
            .push(" OR i.context LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(kind) = q.item_type.as_deref().filter(|s| !s.is_empty()) {
        let kind: ItemType = kind
            .parse()
            .map_err(|_| HubError::BadRequest(format!("unknown item type: '{}'", kind)))?;
        qb.push(" AND i.item_type = ").push_bind(kind.as_str());
    }
    if let Some(doc) = q.document_id.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND i.document_id = ").push_bind(doc);
    }
    if let Some(source) = q.source.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND d.source = ").push_bind(source);
    }
    if let Some(tag) = q.tag.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(i.tags_json) t WHERE t.value = ")
            .push_bind(tag)
            .push(")");
    }
    Ok(())
}

pub async fn list_items(pool: &SqlitePool, q: &DataBankQuery) -> Result<Page<DataBankItem>, HubError> {
    let (page, limit) = paging(q.page, q.limit);

    let mut count = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM extracted_items i JOIN documents d ON d.id = i.document_id",
    );
    push_filters(&mut count, q)?;
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(ITEM_SELECT);
    push_filters(&mut qb, q)?;
    qb.push(" ORDER BY i.created_at DESC, i.document_id ASC, i.position ASC");
    qb.push(" LIMIT ").push_bind(limit);
    qb.push(" OFFSET ").push_bind((page - 1) * limit);

    let items = qb
        .build()
        .fetch_all(pool)
        .await?
        .iter()
        .map(item_from_row)
        .collect();

    Ok(Page {
        has_more: page * limit < total,
        items,
        total,
        page,
        limit,
    })
}

pub async fn get_item(pool: &SqlitePool, id: &str) -> Result<DataBankItem, HubError> {
    let row = sqlx::query(&format!("{} WHERE i.id = ?", ITEM_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HubError::ItemNotFound(id.to_string()))?;
    Ok(item_from_row(&row))
}

/// Every tag in use with its item count, most used first.
pub async fn all_tags(pool: &SqlitePool) -> Result<Vec<TagCount>, HubError> {
    tag_counts(pool, None).await
}

async fn tag_counts(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<TagCount>, HubError> {
    let rows = sqlx::query(
        r#"SELECT t.value AS tag, COUNT(*) AS n
           FROM extracted_items i, json_each(i.tags_json) t
           GROUP BY t.value
           ORDER BY n DESC, tag ASC
           LIMIT ?"#,
    )
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| TagCount {
            tag: r.get("tag"),
            count: r.get("n"),
        })
        .collect())
}

pub async fn databank_stats(pool: &SqlitePool) -> Result<DataBankStats, HubError> {
    let total_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM extracted_items")
        .fetch_one(pool)
        .await?;

    let mut by_type: BTreeMap<String, i64> =
        ItemType::ALL.iter().map(|t| (t.as_str().to_string(), 0)).collect();
    for r in sqlx::query("SELECT item_type, COUNT(*) AS n FROM extracted_items GROUP BY item_type")
        .fetch_all(pool)
        .await?
    {
        by_type.insert(r.get("item_type"), r.get("n"));
    }

    let mut by_source = BTreeMap::new();
    for r in sqlx::query(
        r#"SELECT d.source, COUNT(*) AS n
           FROM extracted_items i JOIN documents d ON d.id = i.document_id
           GROUP BY d.source"#,
    )
    .fetch_all(pool)
    .await?
    {
        by_source.insert(r.get::<String, _>("source"), r.get::<i64, _>("n"));
    }

    let top_tags = tag_counts(pool, Some(TOP_TAGS)).await?;

    Ok(DataBankStats {
        total_items,
        by_type,
        by_source,
        top_tags,
    })
}

/// CLI entry point for `hub databank`. With `stats` set, prints aggregates
/// instead of items.
pub async fn run_databank(config: &Config, q: DataBankQuery, stats: bool) -> Result<()> {
    let pool = db::connect(config).await?;

    if stats {
        let s = databank_stats(&pool).await;
        pool.close().await;
        let s = s?;
        println!("Data bank: {} items", s.total_items);
        println!();
        println!("  By type:");
        for (kind, n) in &s.by_type {
            println!("    {:<16} {:>6}", kind, n);
        }
        println!();
        println!("  By source:");
        for (source, n) in &s.by_source {
            println!("    {:<16} {:>6}", source, n);
        }
        if !s.top_tags.is_empty() {
            println!();
            println!("  Top tags:");
            for t in &s.top_tags {
                println!("    {:<16} {:>6}", t.tag, t.count);
            }
        }
        return Ok(());
    }

    let result = list_items(&pool, &q).await;
    pool.close().await;
    let page = match result {
        Ok(p) => p,
        Err(HubError::BadRequest(msg)) => bail!(msg),
        Err(e) => return Err(e.into()),
    };

    if page.items.is_empty() {
        println!("No items.");
        return Ok(());
    }
    for item in &page.items {
        let loc = item.page.map(|p| format!(", p.{}", p)).unwrap_or_default();
        println!("[{}] {}", item.item_type, item.body);
        println!("    {} ({}{})", item.document_title, item.document_source, loc);
        if !item.tags.is_empty() {
            println!("    tags: {}", item.tags.join(", "));
        }
    }
    println!();
    println!(
        "page {}: {} of {} items{}",
        page.page,
        page.items.len(),
        page.total,
        if page.has_more { " (more available)" } else { "" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::open(&tmp.path().join("hub.sqlite")).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO documents (id, bundle_key, title, source, category, page_count, bundle_path, state, content_hash, created_at, updated_at)
             VALUES ('d1', 'k1', 'Energy Outlook', 'IEA', 'Research', 10, '/tmp/k1', 'completed', 'h', 1, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (id, kind, body, tags, pos) in [
            ("i1", "finding", "Solar capacity doubled", r#"["energy","solar"]"#, 0),
            ("i2", "statistic", "42% growth in storage", r#"["energy"]"#, 1),
            ("i3", "quote", "The transition is irreversible", "[]", 2),
        ] {
            sqlx::query(
                "INSERT INTO extracted_items (id, document_id, item_type, body, tags_json, position, created_at)
                 VALUES (?, 'd1', ?, ?, ?, ?, 1)",
            )
            .bind(id)
            .bind(kind)
            .bind(body)
            .bind(tags)
            .bind(pos)
            .execute(&pool)
            .await
            .unwrap();
        }
        (tmp, pool)
    }

    #[tokio::test]
    async fn filters_by_tag_and_type() {
        let (_tmp, pool) = seeded().await;

        let q = DataBankQuery {
            tag: Some("energy".into()),
            ..Default::default()
        };
        let page = list_items(&pool, &q).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].document_title, "Energy Outlook");

        let q = DataBankQuery {
            item_type: Some("quote".into()),
            ..Default::default()
        };
        let page = list_items(&pool, &q).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(!page.has_more);

        let q = DataBankQuery {
            item_type: Some("rumour".into()),
            ..Default::default()
        };
        assert!(matches!(list_items(&pool, &q).await, Err(HubError::BadRequest(_))));
    }

    #[tokio::test]
    async fn stats_aggregate_tags() {
        let (_tmp, pool) = seeded().await;
        let s = databank_stats(&pool).await.unwrap();
        assert_eq!(s.total_items, 3);
        assert_eq!(s.by_type.get("finding"), Some(&1));
        assert_eq!(s.by_type.get("recommendation"), Some(&0));
        assert_eq!(s.by_source.get("IEA"), Some(&3));
        assert_eq!(s.top_tags[0].tag, "energy");
        assert_eq!(s.top_tags[0].count, 2);

        let tags = all_tags(&pool).await.unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].tag, "solar");
    }

    #[tokio::test]
    async fn item_lookup() {
        let (_tmp, pool) = seeded().await;
        let item = get_item(&pool, "i2").await.unwrap();
        assert_eq!(item.item_type, "statistic");
        assert_eq!(item.tags, vec!["energy".to_string()]);
        assert!(matches!(get_item(&pool, "zz").await, Err(HubError::ItemNotFound(_))));
    }
}
