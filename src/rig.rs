//! Stereo rig geometry
//!
//! Places one virtual pinhole camera per eye so that a textured quad of the
//! eye image, `W x H` units large, exactly fills the camera's vertical field
//! of view. All functions are pure.

use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::capture::frame::{Eye, EYE_COUNT};
use crate::error::{Error, Result};

/// Far clip = plane distance times this, keeping the plane inside the frustum.
pub const FAR_CLIP_FACTOR: f64 = 1.01;

pub const NEAR_CLIP: f64 = 0.1;

/// Externally calibrated stereo pair, read-only to the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibration {
    /// Eye indices of the pair; the first one carries the relative transform.
    pub camera_ids: [usize; 2],
    pub translation: Vector3<f64>,
    /// Rodrigues rotation vector (axis times angle in radians).
    pub rotation: Vector3<f64>,
    /// Calibrated focal length per eye index, in pixels.
    pub focal_lengths: [f64; EYE_COUNT],
}

impl StereoCalibration {
    pub fn transform(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            UnitQuaternion::from_scaled_axis(self.rotation),
        )
    }
}

/// How the virtual camera of each eye is to be dimensioned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewTarget {
    /// Place the image plane at this distance and derive the field of view.
    PlaneDistance(f64),
    /// The host renderer already fixed the vertical field of view (degrees)
    /// and viewport aspect; derive the plane distance.
    FieldOfView { degrees: f64, viewport_aspect: f64 },
    /// Use the calibrated focal length of each eye as the projection.
    CalibratedFocalLength { viewport_aspect: f64 },
}

/// Vertical field of view, in degrees, under which a plane of `height` units
/// at `plane_distance` is seen.
pub fn field_of_view(height: f64, plane_distance: f64) -> f64 {
    (2.0 * (0.5 * height / plane_distance).atan()).to_degrees()
}

/// Focal length in pixels of an image `height` pixels tall seen under `fov_degrees`.
pub fn focal_length(height: f64, fov_degrees: f64) -> f64 {
    0.5 * height / (fov_degrees.to_radians() / 2.0).tan()
}

/// Plane distance for `fov_degrees`, corrected for the mismatch between the
/// image aspect and the viewport aspect.
pub fn plane_distance(
    height: f64,
    fov_degrees: f64,
    image_aspect: f64,
    viewport_aspect: f64,
) -> f64 {
    focal_length(height, fov_degrees) * (image_aspect / viewport_aspect)
}

/// `[[f, 0, W/2], [0, f, H/2], [0, 0, 1]]`
pub fn rectified_camera_matrix(focal: f64, width: f64, height: f64) -> Matrix3<f64> {
    Matrix3::new(
        focal, 0.0, width / 2.0, //
        0.0, focal, height / 2.0, //
        0.0, 0.0, 1.0,
    )
}

/// Virtual camera and image plane of one eye.
#[derive(Debug, Clone, PartialEq)]
pub struct EyeRig {
    pub eye: Eye,
    /// Vertical field of view in degrees.
    pub field_of_view: f64,
    pub focal_length: f64,
    pub plane_distance: f64,
    pub near_clip: f64,
    pub far_clip: f64,
    /// Scale of the unit image quad: `(W, H, 1)`.
    pub plane_scale: Vector3<f64>,
    /// Camera pose relative to the rig origin.
    pub transform: Isometry3<f64>,
    /// Rectified intrinsics for downstream pose estimation.
    pub camera_matrix: Matrix3<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StereoRig {
    pub eyes: [EyeRig; EYE_COUNT],
}

impl StereoRig {
    pub fn eye(&self, eye: Eye) -> &EyeRig {
        &self.eyes[eye.index()]
    }
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidGeometry(format!("{} must be positive, got {}", name, value)))
    }
}

fn check_target(target: ViewTarget) -> Result<()> {
    match target {
        ViewTarget::PlaneDistance(distance) => require_positive("plane distance", distance),
        ViewTarget::FieldOfView {
            degrees,
            viewport_aspect,
        } => {
            if !(degrees > 0.0 && degrees < 180.0) {
                return Err(Error::InvalidGeometry(format!(
                    "field of view must lie strictly between 0 and 180 degrees, got {}",
                    degrees
                )));
            }
            require_positive("viewport aspect", viewport_aspect)
        }
        ViewTarget::CalibratedFocalLength { viewport_aspect } => {
            require_positive("viewport aspect", viewport_aspect)
        }
    }
}

/// Fails with [`Error::InvalidGeometry`] on an empty image or a target that
/// would yield a non-finite projection.
pub fn solve_eye(
    eye: Eye,
    width: u32,
    height: u32,
    target: ViewTarget,
    calibration: Option<&StereoCalibration>,
) -> Result<EyeRig> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidGeometry(format!(
            "empty {}x{} image",
            width, height
        )));
    }
    check_target(target)?;
    let (w, h) = (width as f64, height as f64);
    let image_aspect = w / h;

    let (fov, plane) = match target {
        ViewTarget::PlaneDistance(distance) => (field_of_view(h, distance), distance),
        ViewTarget::FieldOfView {
            degrees,
            viewport_aspect,
        } => (degrees, plane_distance(h, degrees, image_aspect, viewport_aspect)),
        ViewTarget::CalibratedFocalLength { viewport_aspect } => {
            let calibration = calibration.ok_or(Error::MissingCalibration)?;
            require_positive("calibrated focal length", calibration.focal_lengths[eye.index()])?;
            let degrees = field_of_view(h, calibration.focal_lengths[eye.index()]);
            (degrees, plane_distance(h, degrees, image_aspect, viewport_aspect))
        }
    };
    let focal = focal_length(h, fov);

    let transform = match calibration {
        Some(calibration) if calibration.camera_ids[0] == eye.index() => calibration.transform(),
        _ => Isometry3::identity(),
    };

    Ok(EyeRig {
        eye,
        field_of_view: fov,
        focal_length: focal,
        plane_distance: plane,
        near_clip: NEAR_CLIP,
        far_clip: plane * FAR_CLIP_FACTOR,
        plane_scale: Vector3::new(w, h, 1.0),
        transform,
        camera_matrix: rectified_camera_matrix(focal, w, h),
    })
}

pub fn solve(
    width: u32,
    height: u32,
    target: ViewTarget,
    calibration: Option<&StereoCalibration>,
) -> Result<StereoRig> {
    Ok(StereoRig {
        eyes: [
            solve_eye(Eye::Left, width, height, target, calibration)?,
            solve_eye(Eye::Right, width, height, target, calibration)?,
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn calibration() -> StereoCalibration {
        StereoCalibration {
            camera_ids: [0, 1],
            translation: Vector3::new(-0.064, 0.0, 0.0),
            rotation: Vector3::new(0.0, 0.02, 0.0),
            focal_lengths: [430.0, 432.0],
        }
    }

    #[test]
    fn fov_and_distance_round_trip() {
        let fov = field_of_view(950.0, 500.0);
        assert_relative_eq!(fov, 87.062_398_571, epsilon = 1e-6);
        assert_relative_eq!(focal_length(950.0, fov), 500.0, epsilon = 1e-3);
    }

    #[test]
    fn plane_distance_corrects_aspect_mismatch() {
        let image_aspect = 960.0 / 950.0;
        let same = plane_distance(950.0, 90.0, image_aspect, image_aspect);
        assert_relative_eq!(same, 475.0, epsilon = 1e-9);

        let wide = plane_distance(950.0, 90.0, image_aspect, 2.0 * image_aspect);
        assert_relative_eq!(wide, 237.5, epsilon = 1e-9);
    }

    #[test]
    fn far_clip_keeps_plane_inside_frustum() {
        let rig = solve_eye(Eye::Left, 960, 950, ViewTarget::PlaneDistance(500.0), None).unwrap();
        assert_relative_eq!(rig.far_clip, 505.0, epsilon = 1e-9);
        assert!(rig.far_clip > rig.plane_distance);
        assert_eq!(rig.plane_scale, Vector3::new(960.0, 950.0, 1.0));
    }

    #[test]
    fn camera_matrix_is_centred_pinhole() {
        let rig = solve_eye(Eye::Right, 960, 950, ViewTarget::PlaneDistance(500.0), None).unwrap();
        let k = rig.camera_matrix;
        assert_relative_eq!(k[(0, 0)], 500.0, epsilon = 1e-9);
        assert_relative_eq!(k[(1, 1)], 500.0, epsilon = 1e-9);
        assert_relative_eq!(k[(0, 2)], 480.0);
        assert_relative_eq!(k[(1, 2)], 475.0);
        assert_eq!(k[(2, 2)], 1.0);
        assert_eq!(k[(1, 0)], 0.0);
    }

    #[test]
    fn without_calibration_both_eyes_sit_at_origin() {
        let rig = solve(
            960,
            950,
            ViewTarget::FieldOfView {
                degrees: 90.0,
                viewport_aspect: 1.0,
            },
            None,
        )
        .unwrap();
        for eye in &rig.eyes {
            assert_eq!(eye.transform, Isometry3::identity());
        }
    }

    #[test]
    fn calibration_places_first_camera_only() {
        let calibration = calibration();
        let rig = solve(960, 950, ViewTarget::PlaneDistance(500.0), Some(&calibration)).unwrap();

        let left = rig.eye(Eye::Left);
        assert_relative_eq!(left.transform.translation.vector, calibration.translation);
        assert_relative_eq!(
            left.transform.rotation.scaled_axis(),
            calibration.rotation,
            epsilon = 1e-12
        );
        assert_eq!(rig.eye(Eye::Right).transform, Isometry3::identity());
    }

    #[test]
    fn calibrated_focal_length_drives_projection() {
        let calibration = calibration();
        let target = ViewTarget::CalibratedFocalLength {
            viewport_aspect: 960.0 / 950.0,
        };
        let rig = solve(960, 950, target, Some(&calibration)).unwrap();
        assert_relative_eq!(rig.eye(Eye::Left).focal_length, 430.0, epsilon = 1e-9);
        assert_relative_eq!(rig.eye(Eye::Right).plane_distance, 432.0, epsilon = 1e-9);

        assert!(matches!(
            solve(960, 950, target, None),
            Err(Error::MissingCalibration)
        ));
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let fov = |degrees| ViewTarget::FieldOfView {
            degrees,
            viewport_aspect: 1.0,
        };
        for target in [
            fov(0.0),
            fov(180.0),
            fov(f64::NAN),
            ViewTarget::PlaneDistance(0.0),
            ViewTarget::PlaneDistance(-500.0),
            ViewTarget::PlaneDistance(f64::INFINITY),
            ViewTarget::FieldOfView {
                degrees: 90.0,
                viewport_aspect: 0.0,
            },
        ] {
            assert!(
                matches!(solve(960, 950, target, None), Err(Error::InvalidGeometry(_))),
                "{:?} was accepted",
                target
            );
        }

        let distance = ViewTarget::PlaneDistance(500.0);
        assert!(matches!(solve(960, 0, distance, None), Err(Error::InvalidGeometry(_))));
        assert!(matches!(solve(0, 950, distance, None), Err(Error::InvalidGeometry(_))));

        let mut calibration = calibration();
        calibration.focal_lengths[1] = 0.0;
        let target = ViewTarget::CalibratedFocalLength {
            viewport_aspect: 1.0,
        };
        assert!(matches!(
            solve(960, 950, target, Some(&calibration)),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn valid_geometry_is_finite() {
        let rig = solve(
            320,
            240,
            ViewTarget::FieldOfView {
                degrees: 179.0,
                viewport_aspect: 4.0 / 3.0,
            },
            None,
        )
        .unwrap();
        for eye in &rig.eyes {
            assert!(eye.plane_distance.is_finite() && eye.plane_distance > 0.0);
            assert!(eye.camera_matrix.iter().all(|v| v.is_finite()));
        }
    }
}
