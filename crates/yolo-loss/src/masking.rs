//! Object/no-object decomposition of the grid tensors.
//!
//! Grid tensors are viewed as one row per cell (`[batch * S * S, B*5 + C]`).
//! A cell holds an object when the confidence of its first box slot in the
//! target is positive; every other cell, including NaN confidences, is a
//! no-object cell. The two masks therefore partition the grid.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use yolo_extra_ops::TensorExtraOps;

use crate::{
    error::{YoloLossError, YoloLossResult},
    BOX_RECORD_LEN, CONFIDENCE_OFFSET,
};

/// Per-cell object flags read from the target confidence channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellMasks {
    object: Vec<bool>,
}

impl CellMasks {
    /// Reads the object flags from target cell rows.
    ///
    /// # Shapes
    ///
    /// - target_rows: `[cells, channels]` with `channels > 4`
    pub fn from_target_rows<B: Backend>(target_rows: Tensor<B, 2>) -> YoloLossResult<Self> {
        let [cells, channels] = target_rows.dims();
        if channels <= CONFIDENCE_OFFSET {
            return Err(YoloLossError::InsufficientChannels {
                channels,
                boxes_per_cell: 1,
                required: BOX_RECORD_LEN,
            });
        }

        let confidence = target_rows
            .slice([0..cells, CONFIDENCE_OFFSET..CONFIDENCE_OFFSET + 1])
            .into_data()
            .to_vec::<B::FloatElem>()
            .map_err(|e| YoloLossError::TensorConversion {
                reason: format!("{e:?}"),
            })?;

        Ok(Self::from_confidence(&confidence))
    }

    /// Builds masks from one target confidence value per cell.
    pub fn from_confidence<E: ElementConversion + Copy>(confidence: &[E]) -> Self {
        Self {
            object: confidence
                .iter()
                .map(|&conf| conf.elem::<f64>() > 0.0)
                .collect(),
        }
    }

    /// Number of grid cells covered.
    pub fn len(&self) -> usize {
        self.object.len()
    }

    /// `true` when no cell is covered.
    pub fn is_empty(&self) -> bool {
        self.object.is_empty()
    }

    /// `true` for cells holding an object.
    pub fn object(&self) -> &[bool] {
        &self.object
    }

    /// `true` for cells holding no object; the complement of [`Self::object`].
    pub fn no_object(&self) -> Vec<bool> {
        self.object.iter().map(|&has_object| !has_object).collect()
    }

    /// Number of cells holding an object.
    pub fn object_count(&self) -> usize {
        self.object.iter().filter(|&&has_object| has_object).count()
    }

    /// Number of cells holding no object.
    pub fn no_object_count(&self) -> usize {
        self.len() - self.object_count()
    }
}

/// Box and class views of the object cells.
#[derive(Debug, Clone)]
pub struct ObjectCells<B: Backend> {
    /// `[K*B, 5]` predicted box records, `B` consecutive rows per cell.
    pub box_pred: Tensor<B, 2>,
    /// `[K*B, 5]` target box records.
    pub box_target: Tensor<B, 2>,
    /// `[K, C]` predicted class scores, one row per cell; `None` when `C == 0`.
    pub class_pred: Option<Tensor<B, 2>>,
    /// `[K, C]` target class vectors; `None` when `C == 0`.
    pub class_target: Option<Tensor<B, 2>>,
    /// Number of object cells `K`.
    pub cells: usize,
}

/// Gathers the object cells and splits them into box rows and class rows.
///
/// Returns `None` when no cell holds an object.
///
/// # Shapes
///
/// - pred_rows, target_rows: `[cells, B*5 + C]`
pub fn split_object_cells<B: Backend>(
    pred_rows: Tensor<B, 2>,
    target_rows: Tensor<B, 2>,
    masks: &CellMasks,
    boxes_per_cell: usize,
) -> Option<ObjectCells<B>> {
    let object_pred = pred_rows.select_rows(masks.object())?;
    let object_target = target_rows.select_rows(masks.object())?;
    let [cells, channels] = object_pred.dims();
    let box_channels = boxes_per_cell * BOX_RECORD_LEN;
    let box_rows = cells * boxes_per_cell;

    let (class_pred, class_target) = if channels > box_channels {
        (
            Some(object_pred.clone().slice([0..cells, box_channels..channels])),
            Some(object_target.clone().slice([0..cells, box_channels..channels])),
        )
    } else {
        (None, None)
    };

    Some(ObjectCells {
        box_pred: object_pred
            .slice([0..cells, 0..box_channels])
            .reshape([box_rows, BOX_RECORD_LEN]),
        box_target: object_target
            .slice([0..cells, 0..box_channels])
            .reshape([box_rows, BOX_RECORD_LEN]),
        class_pred,
        class_target,
        cells,
    })
}

/// Column of the confidence slot of every box in a cell row: `4 + 5k`.
pub fn confidence_columns(boxes_per_cell: usize) -> Vec<usize> {
    (0..boxes_per_cell)
        .map(|slot| slot * BOX_RECORD_LEN + CONFIDENCE_OFFSET)
        .collect()
}

/// Confidence slots of every box of every no-object cell, as
/// `([M, B] predicted, [M, B] target)`.
///
/// Returns `None` when every cell holds an object.
pub fn no_object_confidences<B: Backend>(
    pred_rows: Tensor<B, 2>,
    target_rows: Tensor<B, 2>,
    masks: &CellMasks,
    boxes_per_cell: usize,
) -> Option<(Tensor<B, 2>, Tensor<B, 2>)> {
    let no_object = masks.no_object();
    let columns = confidence_columns(boxes_per_cell);

    let pred = pred_rows.select_rows(&no_object)?.select_columns(&columns);
    let target = target_rows.select_rows(&no_object)?.select_columns(&columns);

    Some((pred, target))
}
