//! Tolerant decoding of loosely-typed provider JSON into `CatalogItem`s.
//!
//! Providers disagree on field names and nesting. Each field is looked up
//! under its known aliases; a record missing an identifier, a title or a
//! modification time is skipped rather than stored with blanks.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::Value;

use super::{ItemPage, PageRequest, UpstreamError};
use crate::catalog::{normalize_tags, CatalogItem, Tag};

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Outcome of decoding a single raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedItem {
    Item(CatalogItem),
    /// Tombstone: the provider deleted the record with this id.
    Removed(String),
    /// Required field missing; carries the field name.
    Skipped(&'static str),
}

/// Decode a full page body.
///
/// The body must be an object with an `items` array; anything else is
/// `Malformed`. `totalPages` may sit at the top level or under `pagination`.
pub fn decode_page(request: &PageRequest, body: &[u8]) -> Result<ItemPage, UpstreamError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| UpstreamError::malformed(request, format!("invalid JSON: {}", e)))?;

    let root = value
        .as_object()
        .ok_or_else(|| UpstreamError::malformed(request, "body is not a JSON object"))?;

    let items = root
        .get("items")
        .or_else(|| root.get("data").and_then(|d| d.get("items")))
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::malformed(request, "missing items array"))?;

    let total_pages = root
        .get("totalPages")
        .or_else(|| root.get("total_pages"))
        .or_else(|| root.get("pagination").and_then(|p| p.get("totalPages")))
        .or_else(|| {
            root.get("data")
                .and_then(|d| d.get("params"))
                .and_then(|p| p.get("pagination"))
                .and_then(|p| p.get("totalPages"))
        })
        .and_then(as_u64)
        .map(|n| n.min(u32::MAX as u64) as u32);

    let mut page = ItemPage {
        page: request.page,
        total_pages,
        ..ItemPage::default()
    };

    for raw in items {
        match decode_item(raw) {
            DecodedItem::Item(item) => page.items.push(item),
            DecodedItem::Removed(id) => page.removed.push(id),
            DecodedItem::Skipped(_) => page.skipped += 1,
        }
    }

    Ok(page)
}

/// Decode one raw record.
pub fn decode_item(raw: &Value) -> DecodedItem {
    let Some(id) = first_string(raw, &["id", "_id"]) else {
        return DecodedItem::Skipped("id");
    };

    if raw.get("deleted").and_then(Value::as_bool) == Some(true) {
        return DecodedItem::Removed(id);
    }

    let Some(title) = first_string(raw, &["title", "name"]) else {
        return DecodedItem::Skipped("title");
    };

    let modified = raw
        .get("modifiedAt")
        .or_else(|| raw.get("updatedAt"))
        .or_else(|| raw.get("modified").and_then(|m| m.get("time").or(Some(m))))
        .and_then(parse_timestamp);
    let Some(upstream_modified_at) = modified else {
        return DecodedItem::Skipped("modifiedAt");
    };

    let slug = first_string(raw, &["slug"]).unwrap_or_else(|| id.clone());
    let original_title =
        first_string(raw, &["originalTitle", "origin_name", "original_title"]).unwrap_or_default();

    DecodedItem::Item(CatalogItem {
        id,
        slug,
        title,
        original_title,
        year: raw.get("year").and_then(as_u64).and_then(|y| i32::try_from(y).ok()),
        kind: first_string(raw, &["type"]),
        categories: decode_tags(raw, &["categories", "category"]),
        countries: decode_tags(raw, &["countries", "country"]),
        upstream_modified_at,
        last_synced_at: None,
    })
}

/// Lowercase ASCII slug: runs of other characters become a single dash.
pub fn slugify(name: &str) -> String {
    NON_SLUG_CHARS
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        // Epoch seconds, or milliseconds when implausibly large for seconds.
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw > 100_000_000_000 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

fn decode_tags(raw: &Value, keys: &[&str]) -> Vec<Tag> {
    let Some(list) = keys.iter().find_map(|k| raw.get(*k)) else {
        return Vec::new();
    };

    let entries: Vec<&Value> = match list {
        Value::Array(values) => values.iter().collect(),
        other => vec![other],
    };

    let tags = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(Tag::new(name.trim(), slugify(name))),
            Value::Object(_) => {
                let name = first_string(entry, &["name"])?;
                let slug = first_string(entry, &["slug"]).unwrap_or_else(|| slugify(&name));
                Some(Tag::new(name, slug))
            }
            _ => None,
        })
        .collect();

    normalize_tags(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> PageRequest {
        PageRequest::new("/items", 1)
    }

    #[test]
    fn test_decode_canonical_item() {
        let raw = json!({
            "id": "abc",
            "slug": "one-piece",
            "title": "One Piece",
            "originalTitle": "ワンピース",
            "year": 1999,
            "type": "series",
            "categories": [{"name": "Action", "slug": "action"}],
            "countries": [{"name": "Japan", "slug": "japan"}],
            "modifiedAt": "2024-05-01T10:00:00Z"
        });

        let DecodedItem::Item(item) = decode_item(&raw) else {
            panic!("expected item");
        };
        assert_eq!(item.id, "abc");
        assert_eq!(item.slug, "one-piece");
        assert_eq!(item.original_title, "ワンピース");
        assert_eq!(item.year, Some(1999));
        assert_eq!(item.kind.as_deref(), Some("series"));
        assert!(item.has_category("action"));
        assert!(item.has_country("japan"));
        assert_eq!(item.upstream_modified_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_decode_alias_fields() {
        let raw = json!({
            "_id": "x1",
            "name": "Naruto",
            "origin_name": "Naruto Original",
            "category": [{"name": "Hành Động"}],
            "country": "Japan",
            "modified": {"time": "2024-01-02T03:04:05.000Z"}
        });

        let DecodedItem::Item(item) = decode_item(&raw) else {
            panic!("expected item");
        };
        assert_eq!(item.id, "x1");
        assert_eq!(item.slug, "x1"); // falls back to id
        assert_eq!(item.title, "Naruto");
        assert_eq!(item.original_title, "Naruto Original");
        assert_eq!(item.categories[0].slug, "h-nh-ng");
        assert_eq!(item.countries, vec![Tag::new("Japan", "japan")]);
    }

    #[test]
    fn test_decode_naive_and_epoch_timestamps() {
        let naive = json!({"id": 1, "title": "A", "updatedAt": "2024-03-01 12:00:00"});
        let epoch = json!({"id": 2, "title": "B", "modifiedAt": 1_700_000_000});
        let millis = json!({"id": 3, "title": "C", "modifiedAt": 1_700_000_000_000_i64});

        for raw in [naive, epoch, millis] {
            assert!(matches!(decode_item(&raw), DecodedItem::Item(_)));
        }
    }

    #[test]
    fn test_decode_skips_missing_required_fields() {
        assert_eq!(
            decode_item(&json!({"title": "No id", "modifiedAt": "2024-01-01T00:00:00Z"})),
            DecodedItem::Skipped("id")
        );
        assert_eq!(
            decode_item(&json!({"id": "a", "title": "  ", "modifiedAt": "2024-01-01T00:00:00Z"})),
            DecodedItem::Skipped("title")
        );
        assert_eq!(
            decode_item(&json!({"id": "a", "title": "T", "modifiedAt": "yesterday"})),
            DecodedItem::Skipped("modifiedAt")
        );
    }

    #[test]
    fn test_decode_tombstone() {
        let raw = json!({"id": "gone", "deleted": true});
        assert_eq!(decode_item(&raw), DecodedItem::Removed("gone".to_string()));
    }

    #[test]
    fn test_decode_page_counts_and_total_pages() {
        let body = json!({
            "items": [
                {"id": "a", "title": "A", "modifiedAt": "2024-01-01T00:00:00Z"},
                {"id": "b", "deleted": true},
                {"title": "missing id"}
            ],
            "pagination": {"totalPages": "12"}
        });
        let page = decode_page(&request(), body.to_string().as_bytes()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.removed, vec!["b"]);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.total_pages, Some(12));
    }

    #[test]
    fn test_decode_page_without_total_pages() {
        let page = decode_page(&request(), br#"{"items": []}"#).unwrap();
        assert!(page.is_empty());
        assert_eq!(page.total_pages, None);
    }

    #[test]
    fn test_decode_page_rejects_garbage() {
        let err = decode_page(&request(), b"<html>oops</html>").unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed { .. }));

        let err = decode_page(&request(), br#"{"results": []}"#).unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed { .. }));

        let err = decode_page(&request(), b"[1, 2, 3]").unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed { .. }));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Science Fiction"), "science-fiction");
        assert_eq!(slugify("  --Hello, World!-- "), "hello-world");
        assert_eq!(slugify("K-Drama 2024"), "k-drama-2024");
    }
}
