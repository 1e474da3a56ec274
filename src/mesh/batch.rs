//! Meshing of several faces with one configuration.
//!
//! Faces are independent except for the edges they share, which go through
//! the caller's [`SharedEdgeProvider`]. With the `parallel` feature faces are
//! meshed on the rayon pool; results keep the input order either way.
//!
//! # Examples
//!
//! ```rust
//! use facemesh::core::progress::ProgressRange;
//! use facemesh::geometry::surface::{Frame, Plane};
//! use facemesh::mesh::attribute::MeshParameters;
//! use facemesh::mesh::batch::mesh_faces;
//! use facemesh::mesh::face::Face;
//! use facemesh::mesh::shared_edges::SharedEdgeProvider;
//! use std::sync::Arc;
//!
//! let plane = Arc::new(Plane::new(Frame::default()));
//! let faces = vec![
//!     Face::rectangle(plane.clone(), [0.0, 1.0], [0.0, 1.0]),
//!     Face::without_surface(),
//! ];
//! let results = mesh_faces(&faces, &MeshParameters::default(), &SharedEdgeProvider::new(), &ProgressRange::new());
//! assert!(results[0].is_ok());
//! assert!(results[1].is_err());
//! ```

use super::attribute::MeshParameters;
use super::face::Face;
use super::fast_discret_face::{FaceMeshError, FaceMeshResult, FastDiscretFace};
use super::shared_edges::SharedEdgeProvider;
use crate::core::progress::ProgressRange;

/// Meshes every face, one result per face in input order.
///
/// A failing face does not stop the others. Cancelling `progress` makes the
/// remaining faces return early with [`MeshStatus::cancelled`] set.
///
/// [`MeshStatus::cancelled`]: super::fast_discret_face::MeshStatus::cancelled
pub fn mesh_faces(
    faces: &[Face],
    params: &MeshParameters,
    provider: &SharedEdgeProvider,
    progress: &ProgressRange,
) -> Vec<Result<FaceMeshResult, FaceMeshError>> {
    let driver = FastDiscretFace::new(params)
        .with_shared_edges(provider)
        .with_progress(progress);
    let mesh_one = |face: &Face| {
        let result = driver.add(face);
        if let Err(err) = &result {
            tracing::warn!(face = %face.id, error = %err, "face not meshed");
        }
        result
    };
    tracing::debug!(faces = faces.len(), parallel = cfg!(feature = "parallel"), "meshing faces");

    #[cfg(feature = "parallel")]
    {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
        faces.par_iter().map(mesh_one).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        faces.iter().map(mesh_one).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::surface::{Frame, Plane, SurfaceEvaluator};
    use crate::mesh::attribute::MeshParametersBuilder;
    use crate::mesh::face::{FaceEdge, Wire};
    use nalgebra::Point2;
    use std::sync::Arc;

    #[test]
    fn test_adjacent_faces_share_their_common_edge() {
        let plane: Arc<dyn SurfaceEvaluator> = Arc::new(Plane::new(Frame::default()));
        let common = FaceEdge::segment(Point2::new(1.0, 0.0), Point2::new(1.0, 1.0));
        let left = Face::new(Arc::clone(&plane)).with_wire(Wire::new(vec![
            FaceEdge::segment(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)),
            common.clone(),
            FaceEdge::segment(Point2::new(1.0, 1.0), Point2::new(0.0, 1.0)),
            FaceEdge::segment(Point2::new(0.0, 1.0), Point2::new(0.0, 0.0)),
        ]));
        let right = Face::new(plane).with_wire(Wire::new(vec![
            FaceEdge::segment(Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)),
            FaceEdge::segment(Point2::new(2.0, 0.0), Point2::new(2.0, 1.0)),
            FaceEdge::segment(Point2::new(2.0, 1.0), Point2::new(1.0, 1.0)),
            common.with_orientation(crate::mesh::face::EdgeOrientation::Reversed),
        ]));
        let params = MeshParametersBuilder::default().with_share(true).build().unwrap();
        let provider = SharedEdgeProvider::new();
        let results = mesh_faces(&[left, right], &params, &provider, &ProgressRange::new());
        assert_eq!(provider.len(), 7);
        for result in results {
            let result = result.unwrap();
            assert_eq!(result.triangulation.nb_triangles(), 2);
        }
    }

    #[test]
    fn test_cancelled_batch_returns_cancelled_results() {
        let plane: Arc<dyn SurfaceEvaluator> = Arc::new(Plane::new(Frame::default()));
        let faces: Vec<Face> = (0..3)
            .map(|i| Face::rectangle(Arc::clone(&plane), [f64::from(i), f64::from(i) + 1.0], [0.0, 1.0]))
            .collect();
        let progress = ProgressRange::new();
        progress.cancel();
        let results = mesh_faces(&faces, &MeshParameters::default(), &SharedEdgeProvider::new(), &progress);
        assert_eq!(results.len(), 3);
        for result in results {
            let result = result.unwrap();
            assert!(result.status.cancelled);
            assert!(result.triangulation.is_empty());
        }
    }
}
