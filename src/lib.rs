//! Scene-geometry reconstruction core for planetary rover mapping.
//!
//! Fuses many per-observation 3D point clouds (stereo / structured-light
//! wedges) with a coarser orbital elevation grid into a single coherent
//! triangle mesh over a configurable square region around the scene origin.
//!
//! The top-level entry point is [scene::SceneBuilder]; it runs after
//! external alignment has established rigid transforms for each observation
//! and before mesh tiling and texturing.

// MODULE DECLARATION //

/// General math utilities.
pub mod math {
    /// Axis-aligned bounding boxes; Z is vertical throughout.
    pub mod bounding_box;
    /// Methods for asserting values are within a given delta, for unit tests.
    pub mod delta;
}

/// Mesh data structures and hygiene operations.
pub mod mesh {
    /// Planar triangulations used as 2D inside/outside masks.
    pub mod mask;
    /// Acceleration structures for XY vertex and face queries.
    pub mod operator;
    /// Meshes built from regular 2D lattices.
    pub mod organized;
    /// TriangleMesh and related types for handling and operating on 3D geometry.
    pub mod trimesh;
}

/// Wedge observations and point-cloud construction.
pub mod cloud {
    /// Per-wedge point-cloud building.
    pub mod builder;
    /// Grid-bucketed outlier-resistant multi-cloud fusion.
    pub mod combine;
    /// Wedge descriptors and rasters.
    pub mod wedge;
}

/// Orbital elevation data.
pub mod orbital {
    /// DEM sampling: subrects, organized meshes, point clouds.
    pub mod dem;
    /// The fill cloud of last resort and its height adjustment.
    pub mod fill;
}

/// Surface reconstruction: solvers, trims and masks.
pub mod recon {
    /// Reconstruction sequencing around the solver seams.
    pub mod driver;
    /// XY occupancy hull used as the strict trim mask.
    pub mod hull;
    /// Reconstruction configuration.
    pub mod params;
    /// Shrink-wrap boundary extraction for the lenient re-trim mask.
    pub mod shrinkwrap;
    /// Solver seams and the built-in field reconstructors.
    pub mod solver;
}

/// UV atlasing and the surface-precedence texture warp.
pub mod atlas;
/// Sewing and height-blending the orbital periphery onto the surface.
pub mod blend;
/// Mesh decimation.
pub mod decimate;
/// Error taxonomy for a scene-mesh run.
pub mod error;
/// The top-level scene driver.
pub mod scene;
