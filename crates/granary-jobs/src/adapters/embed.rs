//! Deterministic embedder.
//!
//! Derives a unit vector from the SHA-256 digest of each segment's content
//! and writes it through the segment store. Deterministic by construction,
//! so replays and tests see stable vectors; model-backed embedders replace
//! this adapter behind the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use granary_core::traits::Embedder;
use granary_core::{Result, ResultCode, Segment};
use granary_db::Database;

/// Expand a content digest into a unit vector of the given dimension.
pub fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    trace!(fingerprint = %hex::encode(&digest[..6]), dimension, "embedding text");

    let mut vector: Vec<f32> = (0..dimension)
        .map(|i| {
            let byte = digest[i % digest.len()];
            let scrambled = byte.wrapping_mul(31).wrapping_add((i / digest.len()) as u8);
            f32::from(scrambled) / 127.5 - 1.0
        })
        .collect();

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// [`Embedder`] writing digest-derived vectors keyed by segment id.
pub struct HashEmbedder {
    db: Arc<Database>,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(db: Arc<Database>, dimension: usize) -> Self {
        Self { db, dimension }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_segment_list(&self, segments: &[Segment]) -> Result<ResultCode> {
        let mut written = 0usize;
        for segment in segments {
            // Idempotent against already-processed input.
            let current = self.db.segments.get(&segment.kb_id, &segment.id).await?;
            if current.is_deleted || current.embedding.is_some() {
                continue;
            }
            let vector = embed_text(&current.content, self.dimension);
            self.db
                .segments
                .set_embedding(&segment.kb_id, &segment.id, vector)
                .await?;
            written += 1;
        }
        debug!(segment_count = written, "embedded segments");
        Ok(ResultCode::Success)
    }
}
