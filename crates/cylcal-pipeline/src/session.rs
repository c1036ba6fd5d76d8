//! Calibration session model and staged workflow.
//!
//! A session owns everything accumulated for one rig: the corner cloud, the
//! per-image detections and correspondences, and the staged results. Stages
//! run strictly in order: images are appended first, then intrinsics, then
//! distortion refinement, then the report. The session is exclusively owned
//! by the workflow driving it; share it behind a single lock if it must
//! cross threads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cylcal_core::correspondence::{build_correspondences, filter_cloud};
use cylcal_core::{
    CalibError, CornerDetector, CornerId, CorrespondenceView, CylinderRig, Detection, ImageSize,
    Iso3, Pt3, Real,
};
use cylcal_optim::warp::WARP_PARAMS;
use cylcal_optim::{
    aggregate_warps, calibrate_intrinsics, refine_image, refine_joint, IntrinsicsResult, PolyWarp,
};

use crate::config::{RefineMode, SessionConfig};
use crate::quality;
use crate::report::{CalibrationReport, ImageReport};

/// One calibration image and everything derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationImage {
    pub name: String,
    pub detection: Detection,
    /// Rig cloud restricted to the detected ids; its key set equals the
    /// detection key set intersected with the rig ids.
    pub filtered_cloud: BTreeMap<CornerId, Pt3>,
    /// Index-aligned 3D/2D arrays, fixed ascending-id order.
    pub correspondences: CorrespondenceView,
    pub cam_from_rig: Option<Iso3>,
    /// RMS error under the rational model, set by intrinsic calibration.
    pub baseline_error: Option<Real>,
    pub refined_warp: Option<PolyWarp>,
    /// RMS error under the polynomial warp, set by refinement.
    pub refined_error: Option<Real>,
}

impl CalibrationImage {
    fn usable(&self, min_points: usize) -> bool {
        self.correspondences.len() >= min_points
    }
}

/// Mean warp and spread produced by distortion refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementSummary {
    pub mode: RefineMode,
    pub warp: PolyWarp,
    /// Coefficient-wise standard deviation across per-image fits; all zeros
    /// in joint mode (there is a single shared fit).
    pub coeff_spread: [Real; WARP_PARAMS],
    /// Mean of the per-image RMS errors, converged images only.
    pub mean_error: Real,
    pub per_image_errors: Vec<Real>,
    pub converged_images: usize,
}

/// Accumulating state of one calibration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSession {
    pub rig: CylinderRig,
    /// Full rig corner cloud, computed once at construction.
    cloud: BTreeMap<CornerId, Pt3>,
    pub image_size: ImageSize,
    pub images: Vec<CalibrationImage>,
    pub intrinsics: Option<IntrinsicsResult>,
    pub refinement: Option<RefinementSummary>,
    pub config: SessionConfig,
}

impl CalibrationSession {
    pub fn new(rig: CylinderRig, image_size: ImageSize, config: SessionConfig) -> Self {
        Self {
            cloud: rig.corner_cloud(),
            rig,
            image_size,
            images: Vec::new(),
            intrinsics: None,
            refinement: None,
            config,
        }
    }

    pub fn cloud(&self) -> &BTreeMap<CornerId, Pt3> {
        &self.cloud
    }

    /// Append a detection. Empty intersections are kept (for reporting) but
    /// logged and later excluded from calibration.
    pub fn add_image(&mut self, name: impl Into<String>, detection: Detection) -> usize {
        let name = name.into();
        let filtered_cloud = filter_cloud(&self.cloud, &detection);
        let correspondences = build_correspondences(&self.cloud, &detection);
        if correspondences.is_empty() {
            log::warn!("{name}: no rig corners matched; image excluded from calibration");
        } else {
            log::info!(
                "{name}: {} of {} corners detected",
                correspondences.len(),
                self.rig.max_detectable_corners()
            );
        }
        self.images.push(CalibrationImage {
            name,
            detection,
            filtered_cloud,
            correspondences,
            cam_from_rig: None,
            baseline_error: None,
            refined_warp: None,
            refined_error: None,
        });
        self.images.len() - 1
    }

    /// Run a corner detector on an image and append the result.
    pub fn detect_and_add<I, D: CornerDetector<I>>(
        &mut self,
        name: impl Into<String>,
        image: &I,
        detector: &D,
    ) -> Result<usize, CalibError> {
        let detection = detector.detect(image, &self.config.dictionary, &self.rig.board_spec())?;
        Ok(self.add_image(name, detection))
    }

    fn usable_indices(&self) -> Vec<usize> {
        let min = self.config.solver.min_points_per_image.max(6);
        self.images
            .iter()
            .enumerate()
            .filter_map(|(i, img)| {
                if img.usable(min) {
                    Some(i)
                } else {
                    log::warn!(
                        "{}: only {} correspondences (< {min}); excluded from calibration",
                        img.name,
                        img.correspondences.len()
                    );
                    None
                }
            })
            .collect()
    }

    /// Stage two: intrinsic bundle adjustment over all usable images.
    ///
    /// Writes the recovered pose and baseline RMS error back onto each
    /// participating image. Fatal when fewer than the configured minimum of
    /// images survives the per-image point check.
    pub fn calibrate_intrinsics(&mut self) -> Result<&IntrinsicsResult, CalibError> {
        let usable = self.usable_indices();
        if usable.len() < self.config.solver.min_images.max(1) {
            return Err(CalibError::IntrinsicCalibrationFailure {
                num_images: usable.len(),
                reason: format!(
                    "{} of {} images usable, need at least {}",
                    usable.len(),
                    self.images.len(),
                    self.config.solver.min_images.max(1)
                ),
            });
        }

        let views: Vec<CorrespondenceView> = usable
            .iter()
            .map(|&i| self.images[i].correspondences.clone())
            .collect();
        log::info!("calibrating intrinsics over {} images", views.len());
        let result = calibrate_intrinsics(&views, self.image_size, &self.config.solver)?;

        for (slot, &i) in usable.iter().enumerate() {
            self.images[i].cam_from_rig = Some(result.cam_from_rig[slot]);
            self.images[i].baseline_error = Some(result.per_view_errors[slot]);
        }
        self.intrinsics = Some(result);
        Ok(self.intrinsics.as_ref().unwrap())
    }

    /// Stage three: fit the polynomial warp on top of the calibrated camera.
    ///
    /// Per-image mode tolerates individual non-convergence: the failing image
    /// keeps its baseline numbers, is excluded from the aggregate, and the
    /// session proceeds. Joint mode is all-or-nothing.
    pub fn refine_distortion(&mut self) -> Result<&RefinementSummary, CalibError> {
        let Some(intrinsics) = self.intrinsics.clone() else {
            return Err(CalibError::IntrinsicCalibrationFailure {
                num_images: self.images.len(),
                reason: "distortion refinement requested before intrinsic calibration".to_string(),
            });
        };
        let k = intrinsics.camera_matrix;

        let calibrated: Vec<usize> = (0..self.images.len())
            .filter(|&i| self.images[i].cam_from_rig.is_some())
            .collect();

        let summary = match self.config.mode {
            RefineMode::PerImage => {
                let mut warps = Vec::new();
                let mut errors = Vec::new();
                for &i in &calibrated {
                    let image = &self.images[i];
                    let pose = image.cam_from_rig.as_ref().unwrap();
                    match refine_image(
                        &image.correspondences,
                        pose,
                        &k,
                        &image.name,
                        &self.config.refine,
                    ) {
                        Ok(refined) => {
                            warps.push(refined.warp);
                            errors.push(refined.error);
                            let image = &mut self.images[i];
                            image.refined_warp = Some(refined.warp);
                            image.refined_error = Some(refined.error);
                        }
                        Err(err @ CalibError::OptimizationFailure { .. }) => {
                            log::warn!("{err}; image excluded from warp aggregation");
                        }
                        Err(err) => return Err(err),
                    }
                }
                if warps.is_empty() {
                    return Err(CalibError::OptimizationFailure {
                        image: "all images".to_string(),
                        reason: "no per-image warp fit converged".to_string(),
                    });
                }
                let (warp, coeff_spread) = aggregate_warps(&warps);
                RefinementSummary {
                    mode: RefineMode::PerImage,
                    warp,
                    coeff_spread,
                    mean_error: errors.iter().sum::<Real>() / errors.len() as Real,
                    per_image_errors: errors,
                    converged_images: warps.len(),
                }
            }
            RefineMode::Joint => {
                let views: Vec<CorrespondenceView> = calibrated
                    .iter()
                    .map(|&i| self.images[i].correspondences.clone())
                    .collect();
                let poses: Vec<Iso3> = calibrated
                    .iter()
                    .map(|&i| self.images[i].cam_from_rig.unwrap())
                    .collect();
                let joint = refine_joint(&views, &poses, &k, &self.config.refine)?;
                for (slot, &i) in calibrated.iter().enumerate() {
                    self.images[i].refined_warp = Some(joint.warp);
                    self.images[i].refined_error = Some(joint.per_image_errors[slot]);
                }
                RefinementSummary {
                    mode: RefineMode::Joint,
                    warp: joint.warp,
                    coeff_spread: [0.0; WARP_PARAMS],
                    mean_error: joint.joint_error,
                    per_image_errors: joint.per_image_errors,
                    converged_images: calibrated.len(),
                }
            }
        };

        log::info!(
            "distortion refinement done: mean rms {:.4} px over {} images",
            summary.mean_error,
            summary.converged_images
        );
        self.refinement = Some(summary);
        Ok(self.refinement.as_ref().unwrap())
    }

    /// Final stage: assemble the serializable report.
    pub fn finalize(&self) -> Result<CalibrationReport, CalibError> {
        let Some(intrinsics) = &self.intrinsics else {
            return Err(CalibError::IntrinsicCalibrationFailure {
                num_images: self.images.len(),
                reason: "report requested before intrinsic calibration".to_string(),
            });
        };

        let max_detectable = self.rig.max_detectable_corners();
        let images = self
            .images
            .iter()
            .map(|img| ImageReport {
                name: img.name.clone(),
                detected: img.detection.len(),
                max_detectable,
                quality_index: quality::quality_index(img.detection.len(), max_detectable),
                baseline_error: img.baseline_error,
                refined_error: img.refined_error,
            })
            .collect();

        Ok(CalibrationReport {
            rig: self.rig,
            image_size: self.image_size,
            camera_matrix: intrinsics.camera_matrix,
            distortion: intrinsics.distortion,
            overall_error: intrinsics.overall_error,
            intrinsic_variation: quality::intrinsic_variation_table(intrinsics),
            images,
            refinement: self.refinement.clone(),
        })
    }
}
