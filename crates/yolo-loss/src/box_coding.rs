//! Box coding and responsible-box selection.
//!
//! Boxes in the grid tensors are `(x, y, w, h, conf)` records with the center
//! in cell-relative units and the size in image units. IoU is measured in the
//! unit square, so the center is first divided by the grid size `S`:
//! ```text
//! x1 = x / S - w / 2    y1 = y / S - h / 2
//! x2 = x / S + w / 2    y2 = y / S + h / 2
//! ```

use burn::tensor::{backend::Backend, ElementConversion, Tensor, TensorData};
use tracing::debug;

use crate::{
    error::{YoloLossError, YoloLossResult},
    iou::compute_iou,
    BOX_RECORD_LEN, CONFIDENCE_OFFSET,
};

/// Converts center-form boxes to unit-square corner form.
///
/// Only the first four columns are read, so full `(x, y, w, h, conf)` records
/// can be passed directly.
///
/// # Shapes
///
/// - boxes: `[R, >=4]` as `(x, y, w, h, ..)`
/// - output: `[R, 4]` as `(x1, y1, x2, y2)`
pub fn center_to_corners<B: Backend>(boxes: Tensor<B, 2>, grid_size: usize) -> Tensor<B, 2> {
    let [rows, _] = boxes.dims();
    let center = boxes.clone().slice([0..rows, 0..2]).div_scalar(grid_size as f64);
    let half_size = boxes.slice([0..rows, 2..4]).mul_scalar(0.5);

    Tensor::cat(
        vec![center.clone() - half_size.clone(), center + half_size],
        1,
    )
}

/// Outcome of matching each object cell's candidate boxes against its target.
#[derive(Debug, Clone)]
pub struct BestMatches<B: Backend> {
    /// `[K*B, 5]`, zero except the confidence slot of responsible rows, which
    /// holds the matched IoU. Built from host data, so it never carries a gradient.
    pub target_iou: Tensor<B, 2>,
    /// One flag per box row, exactly one `true` per block of `B` rows.
    pub response_mask: Vec<bool>,
    /// Index of the responsible row of each cell, in cell order.
    pub responsible_rows: Vec<usize>,
    /// IoU of the responsible row of each cell, in cell order.
    pub matched_iou: Vec<f64>,
}

impl<B: Backend> BestMatches<B> {
    /// Number of object cells that were matched.
    pub fn cell_count(&self) -> usize {
        self.responsible_rows.len()
    }

    /// Mean matched IoU over all cells, `0.0` for an empty match.
    pub fn mean_iou(&self) -> f64 {
        if self.matched_iou.is_empty() {
            return 0.0;
        }
        self.matched_iou.iter().sum::<f64>() / self.matched_iou.len() as f64
    }
}

/// Picks the responsible box of every object cell.
///
/// Rows come in consecutive blocks of `boxes_per_cell`, one block per object
/// cell, with prediction row `i` paired with target row `i`. Within a block the
/// row with the largest self-matched IoU `iou[i, i]` wins; ties go to the later
/// row.
///
/// # Shapes
///
/// - target_boxes: `[K*B, 5]`
/// - pred_boxes: `[K*B, 5]`
///
/// # Errors
///
/// [`YoloLossError::InvalidBoxes`] when the inputs differ in shape, are not
/// 5 columns wide, are empty, or the row count is not a multiple of
/// `boxes_per_cell`.
pub fn find_best_matches<B: Backend>(
    target_boxes: Tensor<B, 2>,
    pred_boxes: Tensor<B, 2>,
    grid_size: usize,
    boxes_per_cell: usize,
) -> YoloLossResult<BestMatches<B>> {
    let [rows, cols] = target_boxes.dims();
    let pred_dims = pred_boxes.dims();
    if pred_dims != [rows, cols] {
        return Err(YoloLossError::InvalidBoxes {
            reason: format!(
                "target boxes {:?} and predicted boxes {pred_dims:?} differ",
                [rows, cols]
            ),
        });
    }
    if cols != BOX_RECORD_LEN {
        return Err(YoloLossError::InvalidBoxes {
            reason: format!("expected {BOX_RECORD_LEN} columns per box, got {cols}"),
        });
    }
    if rows == 0 {
        return Err(YoloLossError::InvalidBoxes {
            reason: "no box rows to match".to_owned(),
        });
    }
    if boxes_per_cell == 0 || rows % boxes_per_cell != 0 {
        return Err(YoloLossError::InvalidBoxes {
            reason: format!("{rows} rows do not split into blocks of {boxes_per_cell}"),
        });
    }

    let device = target_boxes.device();

    // The match only picks rows and targets, so it stays out of the graph.
    let target_corners = center_to_corners(target_boxes.detach(), grid_size);
    let pred_corners = center_to_corners(pred_boxes.detach(), grid_size);
    let iou = compute_iou(target_corners, pred_corners);

    // Read back in the backend's own precision; the matched IoU becomes a target.
    let values = iou
        .into_data()
        .to_vec::<B::FloatElem>()
        .map_err(|e| YoloLossError::TensorConversion {
            reason: format!("{e:?}"),
        })?;
    let diagonal: Vec<B::FloatElem> = (0..rows).map(|i| values[i * rows + i]).collect();
    let scores: Vec<f64> = diagonal.iter().map(|&iou| iou.elem::<f64>()).collect();

    let responsible_rows = select_responsible(&scores, boxes_per_cell);

    let mut response_mask = vec![false; rows];
    let mut target_values = vec![0.0_f64.elem::<B::FloatElem>(); rows * BOX_RECORD_LEN];
    let mut matched_iou = Vec::with_capacity(responsible_rows.len());
    for &row in &responsible_rows {
        response_mask[row] = true;
        target_values[row * BOX_RECORD_LEN + CONFIDENCE_OFFSET] = diagonal[row];
        matched_iou.push(scores[row]);
    }

    let matches = BestMatches {
        target_iou: Tensor::from_data(
            TensorData::new(target_values, [rows, BOX_RECORD_LEN]),
            &device,
        ),
        response_mask,
        responsible_rows,
        matched_iou,
    };
    debug!(
        cells = matches.cell_count(),
        mean_iou = matches.mean_iou(),
        "matched responsible boxes"
    );

    Ok(matches)
}

/// Winner row of each block of `boxes_per_cell` diagonal IoU values.
///
/// A later row replaces the current best unless the best is strictly greater,
/// so ties and NaN comparisons resolve to the later row.
pub fn select_responsible(diagonal: &[f64], boxes_per_cell: usize) -> Vec<usize> {
    diagonal
        .chunks(boxes_per_cell)
        .enumerate()
        .map(|(cell, block)| {
            let best = (1..block.len()).fold(0, |best, slot| {
                if block[best] > block[slot] {
                    best
                } else {
                    slot
                }
            });
            cell * boxes_per_cell + best
        })
        .collect()
}
