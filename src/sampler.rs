//! Diversity sampler (C6): chunk a document, embed the chunks, and pick a
//! diverse, duplicate-free subset via farthest-point sampling over cosine
//! distance.
//!
//! Sampling is stateful across calls: [`SamplerState`] remembers which
//! positions have already been handed out so a follow-up [`request_more`]
//! call returns genuinely new material instead of re-surfacing earlier
//! picks.

use async_trait::async_trait;
use std::collections::HashSet;

/// Window size and stride for [`chunk`], in characters.
pub const CHUNK_SIZE: usize = 200;
pub const OVERLAP: usize = 10;

/// A contiguous slice of the source text. `source[start..end] == content`
/// always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub start: usize,
    pub end: usize,
}

/// A chunk paired with its embedding and source position, returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Vignette {
    pub content: String,
    pub position: (usize, usize),
    pub embedding: Vec<f32>,
}

/// Batch embedding provider. The sampler never calls a model itself — it
/// only needs a same-length array of vectors back for an array of texts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;
}

/// Split `source` into overlapping [`CHUNK_SIZE`]-character windows
/// advancing by `CHUNK_SIZE - OVERLAP` characters at a time.
///
/// Operates on Unicode scalar values (`chars()`), not bytes, so `start`/
/// `end` index into the character sequence rather than raw byte offsets —
/// `source[start..end]` only coincides with byte slicing for ASCII input.
pub fn chunk(source: &str) -> Vec<Chunk> {
    let chars: Vec<char> = source.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let stride = CHUNK_SIZE - OVERLAP;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + CHUNK_SIZE).min(chars.len());
        let content: String = chars[start..end].iter().collect();
        chunks.push(Chunk { content, start, end });

        if end == chars.len() {
            break;
        }
        start += stride;
    }

    chunks
}

/// `dot(a,b) / (||a|| * ||b||)`. Zero when either magnitude is zero, the
/// vectors differ in length, or any element is non-finite — never `NaN`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    if a.iter().chain(b.iter()).any(|x| !x.is_finite()) {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Accumulated state across a chain of [`sample`]/[`request_more`] calls
/// against one document. Cheap to clone: chunk content and embeddings are
/// shared via the caller's ownership, not duplicated per call.
#[derive(Debug, Clone)]
pub struct SamplerState {
    pub raw_data: String,
    pub all_chunks: Vec<Chunk>,
    pub all_embeddings: Vec<Vec<f32>>,
    pub provided_indices: HashSet<usize>,
}

/// Result of a sampling call.
#[derive(Debug, Clone)]
pub struct SampleResult {
    pub vignettes: Vec<Vignette>,
    pub state: SamplerState,
    pub has_more: bool,
}

/// Chunk, embed, and select an initial diverse sample of up to `k`
/// vignettes from `source`. `seed` fixes the uniformly-random first pick
/// for reproducibility; `None` draws from [`rand::random`].
///
/// Returns an error if `source` chunks to nothing (an empty or
/// whitespace-exhausted document) — sampling from zero chunks has no
/// well-defined result.
pub async fn sample(
    provider: &dyn EmbeddingProvider,
    source: &str,
    k: usize,
    seed: Option<u64>,
) -> crate::Result<SampleResult> {
    let all_chunks = chunk(source);
    if all_chunks.is_empty() {
        return Err(crate::Error::invalid_input(
            "cannot sample: source produced no chunks",
        ));
    }

    let texts: Vec<String> = all_chunks.iter().map(|c| c.content.clone()).collect();
    let all_embeddings = provider.embed(&texts).await?;

    let state = SamplerState {
        raw_data: source.to_string(),
        all_chunks,
        all_embeddings,
        provided_indices: HashSet::new(),
    };

    request_more_seeded(state, k, seed).await
}

/// Request `k` more vignettes, drawn only from chunks not already handed
/// out on this state chain. Returns `Err` without mutating `state` when
/// `k == 0`. When every chunk has already been provided, returns an
/// empty, `has_more: false` result rather than an error.
pub async fn request_more(state: SamplerState, k: usize) -> crate::Result<SampleResult> {
    request_more_seeded(state, k, None).await
}

async fn request_more_seeded(
    state: SamplerState,
    k: usize,
    seed: Option<u64>,
) -> crate::Result<SampleResult> {
    if k == 0 {
        return Err(crate::Error::invalid_input("Count must be greater than 0"));
    }

    let remaining: Vec<usize> = (0..state.all_chunks.len())
        .filter(|i| !state.provided_indices.contains(i))
        .collect();

    if remaining.is_empty() {
        return Ok(SampleResult {
            vignettes: Vec::new(),
            has_more: false,
            state,
        });
    }

    let selected = farthest_point_sample(&state.all_embeddings, &remaining, k, seed);

    let mut provided_indices = state.provided_indices.clone();
    let vignettes: Vec<Vignette> = selected
        .iter()
        .map(|&i| Vignette {
            content: state.all_chunks[i].content.clone(),
            position: (state.all_chunks[i].start, state.all_chunks[i].end),
            embedding: state.all_embeddings[i].clone(),
        })
        .collect();
    provided_indices.extend(&selected);

    let has_more = provided_indices.len() < state.all_chunks.len();

    Ok(SampleResult {
        vignettes,
        has_more,
        state: SamplerState {
            provided_indices,
            ..state
        },
    })
}

/// Greedy farthest-point selection over `candidates` (indices into
/// `embeddings`), stopping at `min(k, candidates.len())`. The first pick
/// is uniform-random over `candidates`; each subsequent pick maximizes
/// its minimum cosine distance to everything already chosen.
fn farthest_point_sample(
    embeddings: &[Vec<f32>],
    candidates: &[usize],
    k: usize,
    seed: Option<u64>,
) -> Vec<usize> {
    let count = k.min(candidates.len());
    if count == 0 {
        return Vec::new();
    }

    let first_pick = match seed {
        Some(s) => {
            use rand::SeedableRng;
            use rand::Rng;
            let mut rng = rand::rngs::StdRng::seed_from_u64(s);
            rng.gen_range(0..candidates.len())
        }
        None => rand::random::<usize>() % candidates.len(),
    };

    let mut selected = vec![candidates[first_pick]];
    let mut remaining: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| i != candidates[first_pick])
        .collect();

    while selected.len() < count && !remaining.is_empty() {
        let (best_pos, _) = remaining
            .iter()
            .enumerate()
            .map(|(pos, &candidate)| {
                let min_dist = selected
                    .iter()
                    .map(|&s| cosine_distance(&embeddings[candidate], &embeddings[s]))
                    .fold(f32::INFINITY, f32::min);
                (pos, min_dist)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .expect("remaining is non-empty");

        selected.push(remaining.remove(best_pos));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEmbeddingProvider;

    #[async_trait]
    impl EmbeddingProvider for StubEmbeddingProvider {
        async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
            // Deterministic per-text vector so selection is exercisable:
            // the sum of char codes mod a few primes, spread across 3 dims.
            Ok(texts
                .iter()
                .map(|t| {
                    let sum: u32 = t.bytes().map(|b| b as u32).sum();
                    vec![
                        (sum % 97) as f32,
                        (sum % 89) as f32,
                        (sum % 83) as f32,
                    ]
                })
                .collect())
        }
    }

    #[test]
    fn test_chunk_invariant_holds() {
        let source = "a".repeat(450);
        let chunks = chunk(&source);
        let chars: Vec<char> = source.chars().collect();
        for c in &chunks {
            let expected: String = chars[c.start..c.end].iter().collect();
            assert_eq!(expected, c.content);
        }
    }

    #[test]
    fn test_chunk_overlap() {
        let source = "x".repeat(500);
        let chunks = chunk(&source);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].end - chunks[0].start, CHUNK_SIZE);
        // consecutive windows advance by stride, creating OVERLAP shared chars
        assert_eq!(chunks[1].start, chunks[0].start + (CHUNK_SIZE - OVERLAP));
    }

    #[test]
    fn test_chunk_empty_source() {
        assert!(chunk("").is_empty());
    }

    #[test]
    fn test_cosine_similarity_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_magnitude() {
        let zero = vec![0.0, 0.0];
        let other = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&zero, &other), 0.0);
    }

    #[test]
    fn test_cosine_similarity_unequal_length() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_non_finite() {
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[f32::INFINITY, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_sample_empty_source_errors() {
        let provider = StubEmbeddingProvider;
        let result = sample(&provider, "", 3, Some(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sample_exhaustion_then_request_more_empty() {
        let provider = StubEmbeddingProvider;
        let result = sample(&provider, "Short.", 1, Some(42)).await.unwrap();
        assert_eq!(result.vignettes.len(), 1);

        let again = request_more(result.state, 10).await.unwrap();
        assert!(again.vignettes.is_empty());
        assert!(!again.has_more);
    }

    #[tokio::test]
    async fn test_request_more_k_zero_is_error_and_does_not_mutate() {
        let provider = StubEmbeddingProvider;
        let result = sample(&provider, &"word ".repeat(100), 2, Some(7))
            .await
            .unwrap();
        let provided_before = result.state.provided_indices.clone();

        let err = request_more(result.state.clone(), 0).await;
        assert!(err.is_err());
        assert_eq!(result.state.provided_indices, provided_before);
    }

    #[tokio::test]
    async fn test_no_duplicate_positions_across_calls() {
        let provider = StubEmbeddingProvider;
        let source = "word ".repeat(200);
        let first = sample(&provider, &source, 3, Some(5)).await.unwrap();
        let mut seen: HashSet<(usize, usize)> =
            first.vignettes.iter().map(|v| v.position).collect();

        let second = request_more(first.state, 3).await.unwrap();
        for v in &second.vignettes {
            assert!(!seen.contains(&v.position));
            seen.insert(v.position);
        }
    }

    #[tokio::test]
    async fn test_requesting_more_than_available_returns_all_and_clears_has_more() {
        let provider = StubEmbeddingProvider;
        let source = "word ".repeat(50);
        let total_chunks = chunk(&source).len();

        let result = sample(&provider, &source, total_chunks + 50, Some(3))
            .await
            .unwrap();

        assert_eq!(result.vignettes.len(), total_chunks);
        assert!(!result.has_more);
    }

    #[tokio::test]
    async fn test_farthest_point_sample_is_deterministic_with_seed() {
        let provider = StubEmbeddingProvider;
        let source = "word ".repeat(200);

        let a = sample(&provider, &source, 4, Some(99)).await.unwrap();
        let b = sample(&provider, &source, 4, Some(99)).await.unwrap();

        let positions_a: Vec<_> = a.vignettes.iter().map(|v| v.position).collect();
        let positions_b: Vec<_> = b.vignettes.iter().map(|v| v.position).collect();
        assert_eq!(positions_a, positions_b);
    }
}
