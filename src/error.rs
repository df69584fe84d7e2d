use thiserror::Error;

/// Fatal failure kinds for a scene-mesh run.
///
/// Per-wedge problems are logged and skipped rather than surfaced here;
/// a `SceneError` aborts the whole run.
#[derive(Error, Debug)]
pub enum SceneError {
    /// An option combination the core cannot honor.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// No wedges were collected, or every wedge yielded zero kept points.
    #[error("no usable input points")]
    NoInput,

    /// The reconstruction solver errored or returned an empty mesh.
    #[error("surface reconstruction failed: {0}")]
    ReconstructionFailed(String),

    /// A clip stage removed every face.
    #[error("mesh empty after clip")]
    EmptyAfterClip,

    /// A clean stage removed every face.
    #[error("mesh empty after clean")]
    EmptyAfterClean,

    /// Decimation removed every face.
    #[error("mesh empty after decimate")]
    EmptyAfterDecimate,

    /// Lenient re-trim mask construction failed. Non-fatal: the driver logs
    /// it and proceeds with the strict hull trim alone.
    #[error("mask construction failed: {0}")]
    MaskFailed(String),

    /// The abort flag tripped between phases.
    #[error("run aborted")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, SceneError>;
