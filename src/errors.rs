use thiserror::Error;

/// Flat error type for every fallible operation in the crate.
///
/// Mirrors the shape of the teacher's `NyxError`: one flat enum, one
/// `#[error(...)]` message per failure kind from the error-handling design
/// (undefined input, structural mismatch, physical out-of-range, numerical,
/// iteration budget exhausted).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AstrodyneError {
    #[error("undefined input: {0}")]
    UndefinedInput(String),

    #[error("subset `{0}` is not present in the broker")]
    MissingSubset(String),

    #[error("a subset named `{0}` already exists with a different definition")]
    ConflictingSubset(String),

    #[error("coordinate vector size {got} does not match broker total size {expected}")]
    SizeMismatch { expected: usize, got: usize },

    #[error("states do not share a broker/frame and cannot be combined")]
    FrameStructureMismatch,

    #[error("altitude {altitude_m} m is below the minimum propagation radius ({min_altitude_m} m); re-entry")]
    Reentry { altitude_m: f64, min_altitude_m: f64 },

    #[error("eccentricity {0} is outside the valid range [0, 0.99)")]
    InvalidEccentricity(f64),

    #[error("inclination {0} rad is outside the valid range [0, pi)")]
    InvalidInclination(f64),

    #[error("perigee radius {0} m is below the minimum radius")]
    PerigeeBelowMinimumRadius(f64),

    #[error("central body gravity requested on a body that is not the environment's central body")]
    NotCentralBody,

    #[error("third-body gravity requested on the environment's central body")]
    ThirdBodyIsCentralBody,

    #[error("body has no {0} model defined")]
    UndefinedModel(&'static str),

    #[error("adaptive step size underflowed below the minimum step")]
    StepSizeUnderflow,

    #[error("scalar root solver failed to converge within its iteration budget")]
    RootNotConverged,

    #[error("dynamics evaluation failed at instant {epoch}: {source}")]
    DynamicsFailure {
        epoch: String,
        source: Box<AstrodyneError>,
    },

    #[error("Gauss-Newton iteration diverged (RMS increased); reporting best-so-far estimate")]
    Divergence,

    #[error("maximum iteration count ({0}) reached before convergence")]
    IterationBudgetExhausted(usize),

    #[error("singular normal-equation matrix in least-squares solve")]
    SingularNormalEquations,
}
