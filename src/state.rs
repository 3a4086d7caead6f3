use log::info;

use crate::data::model::{AcceptedSample, SampleRecord};
use crate::data::store::dedup_by_geometry;
use crate::pipeline::{PointOutcome, PointStatus};

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Everything a run accumulates across reference points.
#[derive(Debug, Default)]
pub struct RunState {
    /// Kept samples in processing order, duplicates included.
    pub samples: Vec<AcceptedSample>,

    pub points_processed: usize,

    /// Points whose mask held no pixel; they contribute nothing.
    pub points_without_candidates: usize,

    /// Points whose reference pixel had no usable observation.
    pub points_without_reference: usize,

    pub candidates_proposed: usize,
    pub candidates_accepted: usize,
    pub candidates_rejected: usize,

    /// Candidates rejected because their series could not be aligned.
    pub candidates_unusable: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one reference point's outcome into the run.
    pub fn record(&mut self, outcome: PointOutcome) {
        self.points_processed += 1;
        match outcome.status {
            PointStatus::NoCandidates => self.points_without_candidates += 1,
            PointStatus::ReferenceUnusable => self.points_without_reference += 1,
            PointStatus::Cleaned => {}
        }
        self.candidates_proposed += outcome.candidates;
        self.candidates_accepted += outcome.accepted();
        self.candidates_rejected += outcome.candidates - outcome.accepted();
        self.candidates_unusable += outcome.unusable.len();
        self.samples.extend(outcome.samples);
    }

    /// Collate the run: one sample per exact geometry, first occurrence wins.
    pub fn finalize(self) -> Vec<AcceptedSample> {
        info!(
            "{} points processed ({} without candidates, {} with an unusable reference); \
             {} candidates proposed, {} accepted, {} rejected ({} unusable)",
            self.points_processed,
            self.points_without_candidates,
            self.points_without_reference,
            self.candidates_proposed,
            self.candidates_accepted,
            self.candidates_rejected,
            self.candidates_unusable
        );
        let samples = dedup_by_geometry(self.samples);
        info!("{} samples after geometry deduplication", samples.len());
        samples
    }
}

/// The vector records of collated samples.
pub fn records(samples: &[AcceptedSample]) -> Vec<SampleRecord> {
    samples.iter().map(|s| s.record.clone()).collect()
}
