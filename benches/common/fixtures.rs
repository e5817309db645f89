use newsdesk_cache::keys;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Article payload used by the benchmarks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchArticle {
    pub id: u64,
    pub slug: String,
    pub title: String,
    pub category: String,
    pub body: String,
}

impl BenchArticle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            slug: format!("article-{}", id),
            title: format!("Headline number {}", id),
            category: format!("category-{}", id % 12),
            body: "Lorem ipsum dolor sit amet. ".repeat(8),
        }
    }

    /// Tags the article is cached under: its category and the articles group.
    pub fn tags(&self) -> Vec<String> {
        vec!["articles".to_string(), self.category.clone()]
    }
}

/// Generate article keys for different workload patterns
#[derive(Clone)]
pub struct KeyGenerator {
    num_keys: usize,
}

impl KeyGenerator {
    pub fn new(num_keys: usize) -> Self {
        Self { num_keys }
    }

    /// Detail keys for every article, in id order.
    pub fn sequential(&self) -> Vec<String> {
        (0..self.num_keys)
            .map(|i| keys::article(&format!("article-{}", i)))
            .collect()
    }

    /// Keys with a skewed distribution: 80% of reads go to 20% of articles.
    pub fn zipf_random(&self, count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let hot = (self.num_keys / 5).max(1);
        (0..count)
            .map(|_| {
                let id = if rng.gen_bool(0.8) || hot == self.num_keys {
                    rng.gen_range(0..hot)
                } else {
                    rng.gen_range(hot..self.num_keys)
                };
                keys::article(&format!("article-{}", id))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generator() {
        let key_gen = KeyGenerator::new(100);

        let seq = key_gen.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0], "article:article-0");

        let zipf = key_gen.zipf_random(100);
        assert_eq!(zipf.len(), 100);
    }

    #[test]
    fn test_article_tags() {
        let article = BenchArticle::new(13);
        assert_eq!(article.tags(), vec!["articles", "category-1"]);
    }
}
