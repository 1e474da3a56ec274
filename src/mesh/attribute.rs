//! Meshing parameters, numeric constants and the per-face context.
//!
//! # Examples
//!
//! ```rust
//! use facemesh::mesh::attribute::{MeshParameters, MeshParametersBuilder};
//!
//! let params = MeshParametersBuilder::default()
//!     .linear_deflection(0.1)
//!     .angular_deflection(0.3)
//!     .build()
//!     .unwrap();
//! assert_eq!(params.max_control_passes, 11);
//!
//! assert!(MeshParametersBuilder::default().linear_deflection(-1.0).build().is_err());
//! assert_eq!(MeshParameters::default().linear_deflection, 0.01);
//! ```

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::algorithms::node_insertion::NodeInsertionMode;
use crate::geometry::classifier::PolygonClassifier;
use crate::geometry::geom_tool::TANGENT_ANGLE_DEGREES;
use crate::geometry::range_splitter::ParamDomain;

/// Invalid meshing configuration.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MeshParametersError {
    /// A deflection is zero, negative or not finite.
    #[error("{name} must be finite and positive, got {value}")]
    InvalidDeflection {
        /// Field name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },
    /// The control loop needs at least one pass.
    #[error("max_control_passes must be at least 1")]
    NoControlPass,
    /// A builder field was never set and has no default.
    #[error("Missing field: {0}")]
    UninitializedField(&'static str),
}

impl From<derive_builder::UninitializedFieldError> for MeshParametersError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Self::UninitializedField(err.field_name())
    }
}

/// Named numeric thresholds of the mesher.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshConstants {
    /// Crossings at a smaller angle are treated as noise, radians.
    pub tangent_angle: f64,
    /// Parametric step used as minimal element size.
    pub uv_deflection: f64,
    /// Parametric confusion.
    pub pconfusion: f64,
    /// 3D confusion; also the minimal normal length of a valid triangle.
    pub confusion: f64,
    /// Minimal 2D area (as a cross product) of a valid triangle.
    pub min_area_2d: f64,
    /// Minimal squared 3D edge length of a valid triangle.
    pub min_sq_length_3d: f64,
    /// Grid cell size as a multiple of the UV tolerance.
    pub cell_factor: f64,
}

impl Default for MeshConstants {
    fn default() -> Self {
        Self {
            tangent_angle: TANGENT_ANGLE_DEGREES.to_radians(),
            uv_deflection: 1e-5,
            pconfusion: 1e-9,
            confusion: 1e-7,
            min_area_2d: 1e-9,
            min_sq_length_3d: 1e-12,
            cell_factor: 14.0,
        }
    }
}

impl MeshConstants {
    /// Smallest loop area accepted around a boundary crossing: `π·tol²`.
    #[must_use]
    pub fn self_loop_area(tolerance: f64) -> f64 {
        PI * tolerance * tolerance
    }
}

/// User-facing meshing configuration.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate", error = "MeshParametersError"))]
#[serde(default)]
pub struct MeshParameters {
    /// Maximal angle between consecutive segments, radians.
    #[builder(default = "0.5")]
    pub angular_deflection: f64,
    /// Maximal chordal deviation.
    #[builder(default = "0.01")]
    pub linear_deflection: f64,
    /// Deflection is relative to the size of each edge.
    #[builder(default)]
    pub relative: bool,
    /// Reuse discretizations of edges shared with faces meshed earlier.
    #[builder(default)]
    pub with_share: bool,
    /// Minimal element size.
    #[builder(default = "1e-5")]
    pub min_size: f64,
    /// Insert the isolated vertices of faces.
    #[builder(default = "true")]
    pub internal_vertices_mode: bool,
    /// Refine until the surface deflection is met.
    #[builder(default = "true")]
    pub control_surface_deflection: bool,
    /// When surface nodes enter the triangulation.
    #[builder(default)]
    pub node_insertion_mode: NodeInsertionMode,
    /// Budget of control passes. The last pass only measures.
    #[builder(default = "11")]
    pub max_control_passes: usize,
    /// Numeric thresholds.
    #[builder(default)]
    pub constants: MeshConstants,
}

impl Default for MeshParameters {
    fn default() -> Self {
        Self {
            angular_deflection: 0.5,
            linear_deflection: 0.01,
            relative: false,
            with_share: false,
            min_size: 1e-5,
            internal_vertices_mode: true,
            control_surface_deflection: true,
            node_insertion_mode: NodeInsertionMode::default(),
            max_control_passes: 11,
            constants: MeshConstants::default(),
        }
    }
}

fn check_deflection(name: &'static str, value: f64) -> Result<(), MeshParametersError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(MeshParametersError::InvalidDeflection { name, value })
    }
}

impl MeshParameters {
    /// Checks the deflections and the pass budget.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), MeshParametersError> {
        check_deflection("angular_deflection", self.angular_deflection)?;
        check_deflection("linear_deflection", self.linear_deflection)?;
        if self.max_control_passes == 0 {
            return Err(MeshParametersError::NoControlPass);
        }
        Ok(())
    }
}

impl MeshParametersBuilder {
    fn validate(&self) -> Result<(), MeshParametersError> {
        if let Some(value) = self.angular_deflection {
            check_deflection("angular_deflection", value)?;
        }
        if let Some(value) = self.linear_deflection {
            check_deflection("linear_deflection", value)?;
        }
        if self.max_control_passes == Some(0) {
            return Err(MeshParametersError::NoControlPass);
        }
        Ok(())
    }
}

/// Per-face context derived from the face and the parameters.
#[derive(Clone, Debug)]
pub struct FaceAttribute {
    /// Target surface deflection.
    pub face_deflection: f64,
    /// Parametric extent and normalization.
    pub domain: ParamDomain,
    /// UV tolerance per direction, in face parameters.
    pub tolerance: [f64; 2],
    /// Grid cell size per direction, in normalized coordinates.
    pub cell_size: [f64; 2],
    /// Trimmed-domain classifier, in face parameters.
    pub classifier: PolygonClassifier,
}

impl FaceAttribute {
    /// UV tolerance mapped to normalized coordinates.
    #[must_use]
    pub fn normalized_tolerance(&self) -> [f64; 2] {
        let [du, dv] = self.domain.delta();
        [self.tolerance[0] / du, self.tolerance[1] / dv]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_builder() {
        let built = MeshParametersBuilder::default().build().unwrap();
        assert_eq!(built, MeshParameters::default());
        assert!(built.validate().is_ok());
        assert_eq!(built.node_insertion_mode, NodeInsertionMode::PostProcess);
        approx::assert_relative_eq!(built.constants.tangent_angle, 5.0_f64.to_radians());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            MeshParametersBuilder::default().angular_deflection(f64::NAN).build(),
            Err(MeshParametersError::InvalidDeflection { name: "angular_deflection", .. })
        ));
        assert_eq!(
            MeshParametersBuilder::default().max_control_passes(0).build(),
            Err(MeshParametersError::NoControlPass)
        );
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let params: MeshParameters = serde_json::from_str(r#"{"linear_deflection": 0.2}"#).unwrap();
        approx::assert_relative_eq!(params.linear_deflection, 0.2);
        assert!(params.internal_vertices_mode);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(serde_json::from_str::<MeshParameters>(&json).unwrap(), params);
    }

    #[test]
    fn test_self_loop_area() {
        approx::assert_relative_eq!(MeshConstants::self_loop_area(2.0), 4.0 * PI);
    }
}
