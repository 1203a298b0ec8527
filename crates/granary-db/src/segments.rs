//! Segment store and hierarchy queries.
//!
//! Segments carry a dot-separated hierarchical ordinal in
//! `position_in_doc`. Parent and sibling lookups resolve against the
//! `(document_id, position_in_doc)` index: the parent is a point lookup on
//! its exact position string, and siblings are selected from the parent's
//! children by nearest numeric neighbor, never by scanning across documents.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use granary_core::traits::{Filter, StorageEngine};
use granary_core::{table_name, EntityKind, Error, Result, Segment, SegmentPosition};

/// CRUD and hierarchy navigation for [`Segment`] records.
pub struct SegmentStore {
    engine: Arc<dyn StorageEngine>,
}

impl SegmentStore {
    const INDEXED_FIELDS: &'static [&'static str] =
        &["document_id", "position_in_doc", "is_deleted"];

    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    async fn table(&self, kb_id: &Uuid) -> Result<String> {
        let table = table_name(kb_id, EntityKind::Segments);
        self.engine
            .create_table_if_not_exists(&table, Self::INDEXED_FIELDS)
            .await?;
        Ok(table)
    }

    fn decode(row: serde_json::Value) -> Result<Segment> {
        serde_json::from_value(row).map_err(Error::from)
    }

    /// Insert a batch of segments produced by one split run.
    pub async fn insert_many(&self, segments: &[Segment]) -> Result<()> {
        for segment in segments {
            segment.position_in_doc.parse::<SegmentPosition>()?;
            let table = self.table(&segment.kb_id).await?;
            self.engine
                .insert(&table, &segment.id, &serde_json::to_value(segment)?)
                .await?;
        }
        Ok(())
    }

    pub async fn get(&self, kb_id: &Uuid, id: &Uuid) -> Result<Segment> {
        let table = self.table(kb_id).await?;
        self.engine
            .get(&table, id)
            .await?
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("segment {id}")))
    }

    /// Live segments of a document, ordered by position.
    pub async fn list_for_document(&self, kb_id: &Uuid, document_id: &Uuid) -> Result<Vec<Segment>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(
                &table,
                &Filter::new()
                    .eq("document_id", document_id.to_string())
                    .eq("is_deleted", false),
            )
            .await?;
        let mut segments = rows
            .into_iter()
            .map(Self::decode)
            .collect::<Result<Vec<Segment>>>()?;
        let mut keyed: Vec<(SegmentPosition, Segment)> = segments
            .drain(..)
            .map(|s| Ok((s.position_in_doc.parse::<SegmentPosition>()?, s)))
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, s)| s).collect())
    }

    /// Point lookup of a live segment by exact position.
    async fn get_by_position(
        &self,
        kb_id: &Uuid,
        document_id: &Uuid,
        position: &SegmentPosition,
    ) -> Result<Option<Segment>> {
        let table = self.table(kb_id).await?;
        let rows = self
            .engine
            .query(
                &table,
                &Filter::new()
                    .eq("document_id", document_id.to_string())
                    .eq("position_in_doc", position.to_string())
                    .eq("is_deleted", false),
            )
            .await?;
        rows.into_iter().next().map(Self::decode).transpose()
    }

    /// The segment's parent, or `None` for top-level segments.
    pub async fn get_parent_segment(&self, segment: &Segment) -> Result<Option<Segment>> {
        let position: SegmentPosition = segment.position_in_doc.parse()?;
        match position.parent() {
            Some(parent) => {
                self.get_by_position(&segment.kb_id, &segment.document_id, &parent)
                    .await
            }
            None => Ok(None),
        }
    }

    /// Nearest sibling strictly below this segment's last ordinal, or
    /// `None` when it is the first child (not necessarily `n-1`).
    pub async fn get_older_sibling_segment(&self, segment: &Segment) -> Result<Option<Segment>> {
        self.nearest_sibling(segment, SiblingDirection::Older).await
    }

    /// Nearest sibling strictly above this segment's last ordinal, or
    /// `None` when it is the last child.
    pub async fn get_younger_sibling_segment(&self, segment: &Segment) -> Result<Option<Segment>> {
        self.nearest_sibling(segment, SiblingDirection::Younger).await
    }

    async fn nearest_sibling(
        &self,
        segment: &Segment,
        direction: SiblingDirection,
    ) -> Result<Option<Segment>> {
        let position: SegmentPosition = segment.position_in_doc.parse()?;
        let siblings = self
            .list_for_document(&segment.kb_id, &segment.document_id)
            .await?;

        let mut best: Option<(u64, Segment)> = None;
        for candidate in siblings {
            if candidate.id == segment.id {
                continue;
            }
            let candidate_pos: SegmentPosition = candidate.position_in_doc.parse()?;
            if !candidate_pos.is_sibling_of(&position) {
                continue;
            }
            let ordinal = candidate_pos.last();
            let eligible = match direction {
                SiblingDirection::Older => ordinal < position.last(),
                SiblingDirection::Younger => ordinal > position.last(),
            };
            if !eligible {
                continue;
            }
            let better = match (&best, direction) {
                (None, _) => true,
                (Some((current, _)), SiblingDirection::Older) => ordinal > *current,
                (Some((current, _)), SiblingDirection::Younger) => ordinal < *current,
            };
            if better {
                best = Some((ordinal, candidate));
            }
        }
        Ok(best.map(|(_, s)| s))
    }

    /// Write the computed embedding vector for one segment.
    pub async fn set_embedding(&self, kb_id: &Uuid, id: &Uuid, vector: Vec<f32>) -> Result<()> {
        let mut segment = self.get(kb_id, id).await?;
        segment.embedding = Some(vector);
        self.update(&segment).await
    }

    /// Full-record update (read-modify-write).
    pub async fn update(&self, segment: &Segment) -> Result<()> {
        let table = self.table(&segment.kb_id).await?;
        let found = self
            .engine
            .update(&table, &segment.id, &serde_json::to_value(segment)?)
            .await?;
        if !found {
            return Err(Error::NotFound(format!("segment {}", segment.id)));
        }
        Ok(())
    }

    /// Soft-delete every live segment of a document (and with them their
    /// vectors, which live on the segment row). Returns the count.
    pub async fn soft_delete_for_document(&self, kb_id: &Uuid, document_id: &Uuid) -> Result<u64> {
        let segments = self.list_for_document(kb_id, document_id).await?;
        let count = segments.len() as u64;
        for mut segment in segments {
            segment.is_deleted = true;
            self.update(&segment).await?;
        }
        if count > 0 {
            debug!(document_id = %document_id, segment_count = count, "soft-deleted segments");
        }
        Ok(count)
    }
}

#[derive(Debug, Clone, Copy)]
enum SiblingDirection {
    Older,
    Younger,
}
