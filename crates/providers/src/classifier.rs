//! Embedding-based complexity classifier feeding the Strategy Router (C6).
//!
//! Uses cosine similarity between a prompt's embedding and two reference
//! centroids ("simple" and "complex") to produce a continuous complexity
//! score, then buckets that score against `RouterThresholds` into one of
//! the router's mode tiers (`simple` / `standard` / `complex`).
//! Embeddings are fetched from an Ollama-compatible endpoint and cached
//! in-memory with TTL-based eviction.

use parking_lot::RwLock;
use shannon_domain::config::{ClassifierConfig, RouterThresholds};
use shannon_domain::error::{Error, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maximum number of cached embeddings before eviction runs.
const CACHE_MAX_ENTRIES: usize = 10_000;

/// Timeout for individual embedding requests.
const EMBEDDING_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout for batch initialization (fetching all reference embeddings).
const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Approximate chars-per-token multiplier for agentic-length detection.
const CHARS_PER_TOKEN: usize = 4;

/// Complexity tier a task is classified into, matching
/// `RouterConfig::mode_defaults`'s keys (`"simple"`, `"standard"`,
/// `"complex"`). `supervisor` is chosen by the decomposition step, not by
/// this classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComplexityTier {
    Simple,
    Standard,
    Complex,
}

impl ComplexityTier {
    pub fn as_mode_str(&self) -> &'static str {
        match self {
            ComplexityTier::Simple => "simple",
            ComplexityTier::Standard => "standard",
            ComplexityTier::Complex => "complex",
        }
    }
}

/// Reference prompts used to build the two centroids at startup.
pub fn default_reference_prompts() -> HashMap<&'static str, Vec<&'static str>> {
    let mut prompts = HashMap::new();

    prompts.insert(
        "simple",
        vec![
            "What is the capital of France?",
            "Convert 5 miles to kilometers",
            "What time is it in Tokyo?",
            "Define the word 'ephemeral'",
            "How many cups in a gallon?",
            "What year was the Eiffel Tower built?",
        ],
    );

    prompts.insert(
        "complex",
        vec![
            "Write a Python script that scrapes a website and stores the data in a SQLite database with proper error handling",
            "Design a REST API for a multi-tenant SaaS application with rate limiting and authentication",
            "Build a data pipeline that ingests CSV files, validates schemas, transforms data, and loads into a warehouse",
            "Debug this distributed system issue where messages are being processed out of order",
            "Compare and critically evaluate three architectures for a high-traffic e-commerce checkout flow",
            "Design a consensus protocol for a Byzantine fault-tolerant distributed system and justify its safety properties",
        ],
    );

    prompts
}

// ── Vector math ─────────────────────────────────────────────────────

/// Cosine similarity between two vectors. Returns `0.0` if either vector
/// has zero magnitude or the lengths mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        tracing::warn!(
            len_a = a.len(),
            len_b = b.len(),
            "cosine_similarity: mismatched vector lengths, returning 0.0"
        );
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Compute the centroid (element-wise average) of a set of vectors.
pub fn compute_centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    if vectors.is_empty() {
        return Vec::new();
    }

    let dim = vectors[0].len();
    let count = vectors.len() as f32;

    let mut centroid = vec![0.0f32; dim];
    for v in vectors {
        for (acc, val) in centroid.iter_mut().zip(v.iter()) {
            *acc += val;
        }
    }
    for val in &mut centroid {
        *val /= count;
    }

    centroid
}

/// A prompt's complexity score: cosine similarity to the "complex"
/// centroid minus similarity to the "simple" centroid, roughly in
/// `[-1.0, 1.0]` (higher is more complex).
pub fn complexity_score(embedding: &[f32], simple_centroid: &[f32], complex_centroid: &[f32]) -> f64 {
    let simple_sim = cosine_similarity(embedding, simple_centroid);
    let complex_sim = cosine_similarity(embedding, complex_centroid);
    (complex_sim - simple_sim) as f64
}

/// Bucket a complexity score (and prompt length) into a [`ComplexityTier`]
/// using the router's configured thresholds.
pub fn bucket_score(score: f64, prompt_len: usize, thresholds: &RouterThresholds) -> ComplexityTier {
    let char_threshold = thresholds.escalate_token_threshold * CHARS_PER_TOKEN;
    if prompt_len > char_threshold {
        return ComplexityTier::Complex;
    }
    if score <= thresholds.simple_max_score {
        ComplexityTier::Simple
    } else if score >= thresholds.complex_min_score {
        ComplexityTier::Complex
    } else {
        ComplexityTier::Standard
    }
}

// ── Cache entry ──────────────────────────────────────────────────────

struct CachedEmbedding {
    embedding: Vec<f32>,
    expires_at: Instant,
}

/// Result of classifying a prompt.
#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub tier: ComplexityTier,
    pub score: f64,
    pub latency_ms: u64,
}

/// Embedding-based complexity classifier.
///
/// Maintains pre-computed "simple"/"complex" centroids and classifies
/// incoming prompts by comparing their embeddings against those centroids.
pub struct EmbeddingClassifier {
    config: ClassifierConfig,
    thresholds: RouterThresholds,
    simple_centroid: Vec<f32>,
    complex_centroid: Vec<f32>,
    http: reqwest::Client,
    cache: RwLock<HashMap<u64, CachedEmbedding>>,
}

impl EmbeddingClassifier {
    /// Create a classifier with pre-computed centroids (useful for testing
    /// or when centroids are loaded from a snapshot).
    pub fn with_centroids(
        config: ClassifierConfig,
        thresholds: RouterThresholds,
        simple_centroid: Vec<f32>,
        complex_centroid: Vec<f32>,
    ) -> Self {
        Self {
            config,
            thresholds,
            simple_centroid,
            complex_centroid,
            http: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Initialize the classifier by fetching embeddings for all reference
    /// prompts and building the two centroids. Makes HTTP calls to the
    /// configured embedding endpoint.
    pub async fn initialize(config: ClassifierConfig, thresholds: RouterThresholds) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(BATCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let reference_prompts = default_reference_prompts();

        let simple_texts = reference_prompts.get("simple").cloned().unwrap_or_default();
        let complex_texts = reference_prompts.get("complex").cloned().unwrap_or_default();

        let simple_embeddings = Self::fetch_embeddings_batch(&http, &config, &simple_texts).await?;
        let complex_embeddings = Self::fetch_embeddings_batch(&http, &config, &complex_texts).await?;

        let simple_centroid = compute_centroid(&simple_embeddings);
        let complex_centroid = compute_centroid(&complex_embeddings);

        tracing::info!("complexity classifier initialized with simple/complex centroids");

        Ok(Self {
            config,
            thresholds,
            simple_centroid,
            complex_centroid,
            http,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Classify a prompt into a complexity tier.
    pub async fn classify(&self, prompt: &str) -> Result<ClassifyResult> {
        let start = Instant::now();

        let cache_key = hash_prompt(prompt);
        let embedding = if let Some(cached) = self.get_cached(cache_key) {
            cached
        } else {
            let embedding = Self::fetch_embedding(&self.http, &self.config, prompt).await?;
            self.put_cached(cache_key, &embedding);
            embedding
        };

        let score = complexity_score(&embedding, &self.simple_centroid, &self.complex_centroid);
        let tier = bucket_score(score, prompt.len(), &self.thresholds);

        Ok(ClassifyResult {
            tier,
            score,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn fetch_embedding(http: &reqwest::Client, config: &ClassifierConfig, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", config.endpoint.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": config.model,
            "prompt": text,
        });

        let resp = http
            .post(&url)
            .timeout(EMBEDDING_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("embedding request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "embedding endpoint '{}' returned HTTP {status}: {body_text}",
                config.provider
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("failed to parse embedding response: {e}")))?;

        let embedding = json
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                Error::UpstreamUnavailable(format!(
                    "embedding endpoint '{}' response missing 'embedding' array",
                    config.provider
                ))
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        Ok(embedding)
    }

    async fn fetch_embeddings_batch(http: &reqwest::Client, config: &ClassifierConfig, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            let embedding = Self::fetch_embedding(http, config, text).await?;
            results.push(embedding);
        }
        Ok(results)
    }

    /// Check whether the embedding endpoint is reachable.
    pub async fn health_check(&self) -> bool {
        Self::fetch_embedding(&self.http, &self.config, "health check").await.is_ok()
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn get_cached(&self, key: u64) -> Option<Vec<f32>> {
        let cache = self.cache.read();
        cache.get(&key).and_then(|entry| {
            if Instant::now() < entry.expires_at {
                Some(entry.embedding.clone())
            } else {
                None
            }
        })
    }

    fn put_cached(&self, key: u64, embedding: &[f32]) {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let entry = CachedEmbedding {
            embedding: embedding.to_vec(),
            expires_at: Instant::now() + ttl,
        };

        let mut cache = self.cache.write();
        if cache.len() >= CACHE_MAX_ENTRIES {
            let now = Instant::now();
            cache.retain(|_, v| v.expires_at > now);
        }
        cache.insert(key, entry);
    }
}

fn hash_prompt(prompt: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    prompt.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_vector_returns_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn compute_centroid_average() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let centroid = compute_centroid(&vectors);
        assert!((centroid[0] - 0.5).abs() < 1e-6);
        assert!((centroid[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn compute_centroid_empty_returns_empty() {
        let vectors: Vec<Vec<f32>> = vec![];
        assert!(compute_centroid(&vectors).is_empty());
    }

    #[test]
    fn bucket_score_below_simple_max_is_simple() {
        let thresholds = RouterThresholds { simple_max_score: 0.3, complex_min_score: 0.6, escalate_token_threshold: 8000 };
        assert_eq!(bucket_score(0.1, 10, &thresholds), ComplexityTier::Simple);
    }

    #[test]
    fn bucket_score_above_complex_min_is_complex() {
        let thresholds = RouterThresholds { simple_max_score: 0.3, complex_min_score: 0.6, escalate_token_threshold: 8000 };
        assert_eq!(bucket_score(0.8, 10, &thresholds), ComplexityTier::Complex);
    }

    #[test]
    fn bucket_score_between_thresholds_is_standard() {
        let thresholds = RouterThresholds { simple_max_score: 0.3, complex_min_score: 0.6, escalate_token_threshold: 8000 };
        assert_eq!(bucket_score(0.45, 10, &thresholds), ComplexityTier::Standard);
    }

    #[test]
    fn bucket_score_long_prompt_escalates_to_complex() {
        let thresholds = RouterThresholds { simple_max_score: 0.9, complex_min_score: 0.95, escalate_token_threshold: 100 };
        // 100 tokens * 4 chars = 400 char threshold; score would otherwise be Simple.
        assert_eq!(bucket_score(0.1, 500, &thresholds), ComplexityTier::Complex);
    }

    #[test]
    fn cache_stores_and_retrieves() {
        let classifier = EmbeddingClassifier::with_centroids(
            ClassifierConfig { cache_ttl_secs: 300, ..ClassifierConfig::default() },
            RouterThresholds::default(),
            vec![1.0, 0.0],
            vec![0.0, 1.0],
        );
        let key = hash_prompt("test prompt");
        let embedding = vec![1.0, 2.0, 3.0];
        classifier.put_cached(key, &embedding);
        assert_eq!(classifier.get_cached(key), Some(embedding));
    }

    #[test]
    fn cache_returns_none_for_missing() {
        let classifier = EmbeddingClassifier::with_centroids(
            ClassifierConfig::default(),
            RouterThresholds::default(),
            vec![],
            vec![],
        );
        assert!(classifier.get_cached(999).is_none());
    }

    #[test]
    fn hash_prompt_deterministic() {
        let h1 = hash_prompt("hello world");
        let h2 = hash_prompt("hello world");
        let h3 = hash_prompt("different prompt");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn default_reference_prompts_has_both_tiers() {
        let prompts = default_reference_prompts();
        assert!(prompts.contains_key("simple"));
        assert!(prompts.contains_key("complex"));
    }
}
