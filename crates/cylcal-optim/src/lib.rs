//! Nonlinear optimization for cylindrical rig calibration.
//!
//! Two optimizers live here:
//! - the intrinsic bundle adjustment ([`intrinsics`]), a Levenberg-Marquardt
//!   problem over camera matrix, rational distortion, and per-image poses,
//!   solved through tiny-solver;
//! - the distortion refiner ([`refine`]), which fits a 2×10 polynomial warp
//!   ([`warp`]) on top of the calibrated camera with the derivative-free
//!   Powell minimizer ([`powell`]).

/// 2×10 polynomial distortion warp.
pub mod warp;
/// Derivative-free direction-set minimization (Powell / Brent).
pub mod powell;
/// Linear pose initialization (DLT PnP).
pub mod pnp;
/// Reprojection residual factors for tiny-solver.
pub mod factors;
/// Intrinsic bundle adjustment.
pub mod intrinsics;
/// Polynomial distortion refinement.
pub mod refine;

pub use intrinsics::*;
pub use powell::{minimize, MinimizeOptions, MinimizeResult, SearchMethod};
pub use refine::*;
pub use warp::PolyWarp;
