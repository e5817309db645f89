//! Cache key generators and entity invalidation groups.
//!
//! Keys are plain strings of the form `<entity>:<identifier or params>`.
//! Parameter objects are rendered with `stable_stringify`, so structurally
//! identical queries always map to the same key whatever their field order.

use serde::Serialize;

use crate::utils::stable_stringify;

/// Entity types with grouped invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Articles,
    Categories,
    Authors,
    Tags,
    Search,
}

impl EntityKind {
    /// Tag attached to every entry of this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            EntityKind::Articles => "articles",
            EntityKind::Categories => "categories",
            EntityKind::Authors => "authors",
            EntityKind::Tags => "tags",
            EntityKind::Search => "search",
        }
    }

    /// Regex source matching this kind's list/query keys, e.g. `^articles:`.
    pub fn key_pattern(&self) -> String {
        format!("^{}:", self.tag())
    }
}

/// Detail key for one article.
pub fn article(slug: &str) -> String {
    format!("article:{}", slug)
}

/// Tag attached to entries that depend on a single article.
pub fn article_tag(slug: &str) -> String {
    format!("article-{}", slug)
}

/// Key for an article listing query.
pub fn articles<P: Serialize + ?Sized>(params: &P) -> String {
    format!("articles:{}", stable_stringify(params))
}

pub fn category(slug: &str) -> String {
    format!("category:{}", slug)
}

pub fn categories() -> String {
    "categories:all".to_string()
}

pub fn author(id: &str) -> String {
    format!("author:{}", id)
}

pub fn authors() -> String {
    "authors:all".to_string()
}

pub fn tag(slug: &str) -> String {
    format!("tag:{}", slug)
}

pub fn tags() -> String {
    "tags:all".to_string()
}

/// Key for a search query with its filter params.
pub fn search<P: Serialize + ?Sized>(query: &str, params: &P) -> String {
    format!("search:{}:{}", query.trim(), stable_stringify(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::collections::HashMap;

    #[test]
    fn test_articles_key_is_order_independent() {
        let a = json!({
            "page": 1,
            "pageSize": 10,
            "filters": {"category": "news", "featured": true}
        });
        let b = json!({
            "filters": {"featured": true, "category": "news"},
            "pageSize": 10,
            "page": 1
        });
        assert_eq!(articles(&a), articles(&b));
        assert!(articles(&a).starts_with("articles:"));
    }

    #[test]
    fn test_articles_key_from_structs_and_maps_agree() {
        #[derive(Serialize)]
        struct Params {
            page: u32,
            sort: &'static str,
        }

        let mut map = HashMap::new();
        map.insert("sort", json!("publishedAt:desc"));
        map.insert("page", json!(2));

        let from_struct = articles(&Params {
            page: 2,
            sort: "publishedAt:desc",
        });
        assert_eq!(from_struct, articles(&map));
    }

    #[test]
    fn test_distinct_params_give_distinct_keys() {
        assert_ne!(articles(&json!({"page": 1})), articles(&json!({"page": 2})));
        assert_eq!(articles(&BTreeMap::<String, u32>::new()), "articles:{}");
    }

    #[test]
    fn test_entity_keys() {
        assert_eq!(article("hello-world"), "article:hello-world");
        assert_eq!(category("news"), "category:news");
        assert_eq!(author("42"), "author:42");
        assert_eq!(tag("rust"), "tag:rust");
        assert_eq!(
            search(" rust ", &json!({"limit": 5})),
            r#"search:rust:{"limit":5}"#
        );
    }

    #[test]
    fn test_entity_kind_groups() {
        assert_eq!(EntityKind::Articles.tag(), "articles");
        assert_eq!(EntityKind::Articles.key_pattern(), "^articles:");

        let matches = |kind: EntityKind, key: &str| {
            regex::Regex::new(&kind.key_pattern()).unwrap().is_match(key)
        };
        assert!(matches(EntityKind::Categories, &categories()));
        assert!(matches(EntityKind::Authors, &authors()));
        assert!(matches(EntityKind::Tags, &tags()));
        assert!(!matches(EntityKind::Articles, &article("a")));
    }
}
