//! YOLO v1 detection loss for the Burn deep learning framework.
//!
//! Computes the composite training loss of a single-stage grid detector from a
//! dense prediction grid and a matching target grid, both shaped
//! `[batch, S, S, B*5 + C]`:
//!
//! ```text
//! loss = (l_coord * localization + object_confidence + l_noobj * no_object + class) / batch
//! ```
//!
//! ## Layers
//!
//! - **Geometry** ([`compute_iou`]): pairwise IoU between corner-form boxes
//! - **Box coding** ([`center_to_corners`], [`find_best_matches`]): grid-relative
//!   boxes to unit-square corners, and the responsible box of each object cell
//! - **Masking** ([`CellMasks`], [`split_object_cells`], [`no_object_confidences`]):
//!   object/no-object decomposition of the grid
//! - **Aggregation** ([`YoloLoss`]): the four sum-of-squared-error terms
//!
//! All operations are plain Burn tensor ops, so the loss is differentiable
//! under `Autodiff<B>`; the matched IoU targets are constants.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::{backend::NdArray, tensor::Tensor};
//! use yolo_loss::YoloLossConfig;
//!
//! let device = Default::default();
//! let loss = YoloLossConfig::yolo_v1().init();
//!
//! let predictions = Tensor::<NdArray, 4>::zeros([1, 7, 7, 30], &device);
//! let targets = Tensor::<NdArray, 4>::zeros([1, 7, 7, 30], &device);
//!
//! let total = loss.forward(predictions, targets).expect("shapes match");
//! assert_eq!(total.dims(), [1]);
//! ```

mod box_coding;
mod error;
mod iou;
mod masking;
mod yolo_loss;

pub use box_coding::{center_to_corners, find_best_matches, select_responsible, BestMatches};
pub use error::{YoloLossError, YoloLossResult};
pub use iou::compute_iou;
pub use masking::{
    confidence_columns, no_object_confidences, split_object_cells, CellMasks, ObjectCells,
};
pub use yolo_loss::{LossSummary, YoloLoss, YoloLossConfig, YoloLossOutput};

/// Width of one `(x, y, w, h, conf)` box record.
pub const BOX_RECORD_LEN: usize = 5;

/// Offset of the confidence field inside a box record.
pub const CONFIDENCE_OFFSET: usize = 4;
