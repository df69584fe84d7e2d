use crate::error::{Result, SceneError};
use crate::math::bounding_box::BoundingBox;

/// Which reconstruction family to run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ReconstructionMethod {
    /// Implicit-field reconstruction from confidence-weighted oriented points.
    #[default]
    Implicit,
    /// Sample-scale reconstruction: each point contributes at its own scale.
    SampleScale,
}

/// Cell width used when neither resolution knob is set.
pub const DEFAULT_CELL_WIDTH: f32 = 0.1;

/// Configuration for the reconstruction driver and solvers.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconstructionParameters {
    pub method: ReconstructionMethod,
    /// Target width of the finest cells, meters. Mutually exclusive with
    /// `octree_depth`.
    pub min_cell_width: Option<f32>,
    /// Resolution as a power-of-two subdivision of the input extent.
    /// Mutually exclusive with `min_cell_width`.
    pub octree_depth: Option<u32>,
    /// Minimum sample weight for a cell to contribute surface. Raise for
    /// noisier data.
    pub min_samples_per_cell: f32,
    pub bspline_degree: u32,
    /// Exponent applied to per-sample confidence; 0 disables confidence
    /// weighting entirely.
    pub confidence_exponent: f32,
    /// Sample-density cutoff for the strict surface trim.
    pub trimmer_level: f32,
    /// Lower cutoff used by the lenient re-trim path.
    pub trimmer_level_lenient: f32,
    /// Output clip box.
    pub envelope: Option<BoundingBox>,
    /// Hint: also hand the envelope to the solver to bound its domain.
    pub pass_envelope_to_solver: bool,
    /// Cull disconnected islands smaller than this ratio of the largest
    /// island's bounding diagonal. Zero disables.
    pub min_island_ratio: f32,
}

impl Default for ReconstructionParameters {
    fn default() -> Self {
        Self {
            method: ReconstructionMethod::Implicit,
            min_cell_width: None,
            octree_depth: None,
            min_samples_per_cell: 1.0,
            bspline_degree: 2,
            confidence_exponent: 1.0,
            trimmer_level: 1.0,
            trimmer_level_lenient: 0.5,
            envelope: None,
            pass_envelope_to_solver: false,
            min_island_ratio: 0.1,
        }
    }
}

impl ReconstructionParameters {
    pub fn validate(&self) -> Result<()> {
        if self.min_cell_width.is_some() && self.octree_depth.is_some() {
            return Err(SceneError::InvalidArg(
                "min cell width and octree depth are mutually exclusive".into(),
            ));
        }
        if let Some(w) = self.min_cell_width
            && w <= 0.0
        {
            return Err(SceneError::InvalidArg(format!(
                "min cell width must be positive, got {w}"
            )));
        }
        Ok(())
    }

    /// Resolves the working cell width against the input bounds.
    pub fn cell_width(&self, bounds: &BoundingBox) -> f32 {
        if let Some(w) = self.min_cell_width {
            return w;
        }
        if let Some(depth) = self.octree_depth {
            let extent = bounds.size().x.max(bounds.size().y).max(1e-3);
            return extent / (1u32 << depth.min(24)) as f32;
        }
        DEFAULT_CELL_WIDTH
    }
}
