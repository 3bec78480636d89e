//! Composite YOLO v1 loss.
//!
//! Four sums of squared error over a decomposed grid:
//! ```text
//! localization      = Σ_resp (x - x̂)² + (y - ŷ)² + (√w - √ŵ)² + (√h - √ĥ)²
//! object_confidence = Σ_resp (conf - IoU)²
//! no_object         = Σ_noobj Σ_slots (conf - ĉonf)²
//! class             = Σ_obj  Σ_c (p(c) - p̂(c))²
//!
//! total = (l_coord * localization + object_confidence + l_noobj * no_object + class) / batch
//! ```
//! where `resp` ranges over the responsible box of each object cell.

use std::{collections::HashMap, fmt};

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::{MseLoss, Reduction},
    tensor::{backend::Backend, ElementConversion, Tensor},
};
use tracing::{debug, trace};
use yolo_extra_ops::TensorExtraOps;

use crate::{
    box_coding::{self, BestMatches},
    error::{YoloLossError, YoloLossResult},
    masking::{self, CellMasks, ObjectCells},
    BOX_RECORD_LEN, CONFIDENCE_OFFSET,
};

/// Configuration for creating a [YOLO loss](YoloLoss).
#[derive(Config, Debug)]
pub struct YoloLossConfig {
    /// Cells per side of the detection grid (`S`). Default: 14
    #[config(default = 14)]
    pub grid_size: usize,

    /// Candidate boxes predicted per cell (`B`). Default: 2
    #[config(default = 2)]
    pub boxes_per_cell: usize,

    /// Weight of the localization term. Default: 5.0
    #[config(default = 5.0)]
    pub l_coord: f64,

    /// Weight of the no-object confidence term. Default: 0.5
    #[config(default = 0.5)]
    pub l_noobj: f64,

    /// Also regress the confidence of non-responsible boxes in object cells
    /// to zero, under `l_noobj`. Default: false
    #[config(default = false)]
    pub penalize_non_responsible: bool,
}

impl YoloLossConfig {
    /// The 7x7 grid with two boxes per cell from the original YOLO paper.
    pub fn yolo_v1() -> Self {
        Self::new().with_grid_size(7)
    }

    /// Initialize [YOLO loss](YoloLoss).
    pub fn init(&self) -> YoloLoss {
        self.assertions();
        YoloLoss {
            grid_size: self.grid_size,
            boxes_per_cell: self.boxes_per_cell,
            l_coord: self.l_coord,
            l_noobj: self.l_noobj,
            penalize_non_responsible: self.penalize_non_responsible,
        }
    }

    fn assertions(&self) {
        assert!(
            self.grid_size > 0,
            "Grid size for YoloLoss must be positive, got {}",
            self.grid_size
        );
        assert!(
            self.boxes_per_cell > 0,
            "Boxes per cell for YoloLoss must be positive, got {}",
            self.boxes_per_cell
        );
        assert!(
            self.l_coord.is_finite() && self.l_coord >= 0.0,
            "l_coord for YoloLoss must be non-negative, got {}",
            self.l_coord
        );
        assert!(
            self.l_noobj.is_finite() && self.l_noobj >= 0.0,
            "l_noobj for YoloLoss must be non-negative, got {}",
            self.l_noobj
        );
    }
}

/// YOLO v1 detection loss.
///
/// Stateless: every call is a pure function of the two grids and the
/// configuration. Targets are detached on entry and never differentiated.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct YoloLoss {
    /// Cells per side of the grid.
    pub grid_size: usize,
    /// Candidate boxes per cell.
    pub boxes_per_cell: usize,
    /// Localization weight.
    pub l_coord: f64,
    /// No-object confidence weight.
    pub l_noobj: f64,
    /// Whether non-responsible boxes of object cells join the no-object term.
    pub penalize_non_responsible: bool,
}

impl Default for YoloLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for YoloLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("grid_size", &self.grid_size)
            .add("boxes_per_cell", &self.boxes_per_cell)
            .add("l_coord", &self.l_coord)
            .add("l_noobj", &self.l_noobj)
            .add("penalize_non_responsible", &self.penalize_non_responsible)
            .optional()
    }
}

/// Every term of one loss evaluation.
///
/// `localization`, `object_confidence`, `no_object` and `class` are the raw
/// sums, before weighting and batch normalization.
#[derive(Debug, Clone)]
pub struct YoloLossOutput<B: Backend> {
    /// Weighted, batch-normalized loss. Shape `[1]`.
    pub total: Tensor<B, 1>,
    pub localization: Tensor<B, 1>,
    pub object_confidence: Tensor<B, 1>,
    pub no_object: Tensor<B, 1>,
    pub class: Tensor<B, 1>,
    pub batch_size: usize,
    pub object_cells: usize,
    pub no_object_cells: usize,
}

impl<B: Backend> YoloLossOutput<B> {
    /// Reads every term back to the host.
    pub fn summary(&self) -> LossSummary {
        let read = |tensor: &Tensor<B, 1>| tensor.clone().into_scalar().elem::<f64>();

        LossSummary {
            total: read(&self.total),
            localization: read(&self.localization),
            object_confidence: read(&self.object_confidence),
            no_object: read(&self.no_object),
            class: read(&self.class),
            object_cells: self.object_cells,
            no_object_cells: self.no_object_cells,
        }
    }
}

/// Host copy of a [`YoloLossOutput`], for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSummary {
    pub total: f64,
    pub localization: f64,
    pub object_confidence: f64,
    pub no_object: f64,
    pub class: f64,
    pub object_cells: usize,
    pub no_object_cells: usize,
}

impl LossSummary {
    /// Loss values keyed by term name.
    pub fn to_map(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("total".to_owned(), self.total),
            ("localization".to_owned(), self.localization),
            ("object_confidence".to_owned(), self.object_confidence),
            ("no_object".to_owned(), self.no_object),
            ("class".to_owned(), self.class),
        ])
    }
}

impl fmt::Display for LossSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={:.6} localization={:.6} object_confidence={:.6} no_object={:.6} class={:.6} (object_cells={}, no_object_cells={})",
            self.total,
            self.localization,
            self.object_confidence,
            self.no_object,
            self.class,
            self.object_cells,
            self.no_object_cells
        )
    }
}

/// Terms that only exist when the batch holds at least one object cell.
struct ObjectTerms<B: Backend> {
    localization: Tensor<B, 1>,
    object_confidence: Tensor<B, 1>,
    class: Tensor<B, 1>,
    non_responsible: Option<Tensor<B, 1>>,
}

impl YoloLoss {
    /// Create a new YOLO loss with default configuration.
    pub fn new() -> Self {
        YoloLossConfig::new().init()
    }

    /// Compute the total loss.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, S, S, B*5 + C]`
    /// - targets: `[batch_size, S, S, B*5 + C]`
    /// - output: `[1]`
    ///
    /// # Errors
    ///
    /// Returns a [`YoloLossError`] when the shapes disagree with each other or
    /// with the configuration, or the batch is empty.
    pub fn forward<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> YoloLossResult<Tensor<B, 1>> {
        Ok(self.forward_detailed(predictions, targets)?.total)
    }

    /// Compute the total loss together with every unweighted term.
    ///
    /// # Errors
    ///
    /// See [`Self::forward`].
    pub fn forward_detailed<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> YoloLossResult<YoloLossOutput<B>> {
        let [batch_size, rows, cols, channels] = self.check_shapes(&predictions, &targets)?;
        let cells = batch_size * rows * cols;
        let device = predictions.device();

        let pred_rows = predictions.reshape([cells, channels]);
        let target_rows = targets.detach().reshape([cells, channels]);

        let masks = CellMasks::from_target_rows(target_rows.clone())?;
        debug!(
            batch_size,
            object_cells = masks.object_count(),
            no_object_cells = masks.no_object_count(),
            "decomposed prediction grid"
        );

        let mut no_object = self.no_object_loss(pred_rows.clone(), target_rows.clone(), &masks);

        let zero = || Tensor::<B, 1>::zeros([1], &device);
        let (localization, object_confidence, class) = match masking::split_object_cells(
            pred_rows,
            target_rows,
            &masks,
            self.boxes_per_cell,
        ) {
            Some(objects) => {
                let terms = self.object_terms(objects)?;
                if let Some(non_responsible) = terms.non_responsible {
                    no_object = no_object + non_responsible;
                }
                (terms.localization, terms.object_confidence, terms.class)
            }
            None => (zero(), zero(), zero()),
        };

        let total = (localization.clone().mul_scalar(self.l_coord)
            + object_confidence.clone()
            + no_object.clone().mul_scalar(self.l_noobj)
            + class.clone())
        .div_scalar(batch_size as f64);

        let output = YoloLossOutput {
            total,
            localization,
            object_confidence,
            no_object,
            class,
            batch_size,
            object_cells: masks.object_count(),
            no_object_cells: masks.no_object_count(),
        };
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(summary = %output.summary(), "yolo loss terms");
        }

        Ok(output)
    }

    /// Matches the candidate boxes of each object cell against its target.
    ///
    /// See [`box_coding::find_best_matches`].
    pub fn find_best_matches<B: Backend>(
        &self,
        box_target: Tensor<B, 2>,
        box_pred: Tensor<B, 2>,
    ) -> YoloLossResult<BestMatches<B>> {
        box_coding::find_best_matches(box_target, box_pred, self.grid_size, self.boxes_per_cell)
    }

    /// Summed squared error over every class channel of every object cell.
    ///
    /// # Shapes
    ///
    /// - class_pred, class_target: `[K, C]`
    pub fn class_prediction_loss<B: Backend>(
        &self,
        class_pred: Tensor<B, 2>,
        class_target: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        sum_squared_error(class_pred, class_target)
    }

    /// Localization error of responsible boxes, with width and height compared
    /// through their square roots so small boxes weigh more.
    ///
    /// Negative widths or heights produce NaN, as `sqrt` would.
    ///
    /// # Shapes
    ///
    /// - box_pred_response, box_target_response: `[K, 5]`
    pub fn regression_loss<B: Backend>(
        &self,
        box_pred_response: Tensor<B, 2>,
        box_target_response: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let [rows, _] = box_pred_response.dims();

        let center = sum_squared_error(
            box_pred_response.clone().slice([0..rows, 0..2]),
            box_target_response.clone().slice([0..rows, 0..2]),
        );
        let size = sum_squared_error(
            box_pred_response.slice([0..rows, 2..4]).sqrt(),
            box_target_response.slice([0..rows, 2..4]).sqrt(),
        );

        center + size
    }

    /// Confidence error of responsible boxes against their matched IoU.
    ///
    /// # Shapes
    ///
    /// - box_pred_response, box_target_response_iou: `[K, 5]`
    pub fn contain_confidence_loss<B: Backend>(
        &self,
        box_pred_response: Tensor<B, 2>,
        box_target_response_iou: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let confidence = [CONFIDENCE_OFFSET];
        sum_squared_error(
            box_pred_response.select_columns(&confidence),
            box_target_response_iou.select_columns(&confidence),
        )
    }

    /// Confidence error over both box slots of every no-object cell.
    ///
    /// Coordinates and class scores of no-object cells are ignored. Zero when
    /// every cell holds an object.
    ///
    /// # Shapes
    ///
    /// - pred_rows, target_rows: `[cells, B*5 + C]`
    pub fn no_object_loss<B: Backend>(
        &self,
        pred_rows: Tensor<B, 2>,
        target_rows: Tensor<B, 2>,
        masks: &CellMasks,
    ) -> Tensor<B, 1> {
        let device = pred_rows.device();
        match masking::no_object_confidences(pred_rows, target_rows, masks, self.boxes_per_cell) {
            Some((pred, target)) => sum_squared_error(pred, target),
            None => Tensor::zeros([1], &device),
        }
    }

    fn object_terms<B: Backend>(&self, objects: ObjectCells<B>) -> YoloLossResult<ObjectTerms<B>> {
        let class = match (objects.class_pred, objects.class_target) {
            (Some(class_pred), Some(class_target)) => {
                self.class_prediction_loss(class_pred, class_target)
            }
            _ => Tensor::zeros([1], &objects.box_pred.device()),
        };

        let matches =
            self.find_best_matches(objects.box_target.clone(), objects.box_pred.clone())?;
        let responsible = &matches.responsible_rows;
        let (Some(box_pred_response), Some(box_target_response), Some(box_target_response_iou)) = (
            objects.box_pred.clone().take_rows(responsible),
            objects.box_target.take_rows(responsible),
            matches.target_iou.take_rows(responsible),
        ) else {
            return Err(YoloLossError::InvalidBoxes {
                reason: "object cells produced no responsible boxes".to_owned(),
            });
        };

        let localization = self.regression_loss(box_pred_response.clone(), box_target_response);
        let object_confidence =
            self.contain_confidence_loss(box_pred_response, box_target_response_iou);

        let non_responsible = if self.penalize_non_responsible {
            let others: Vec<bool> = matches.response_mask.iter().map(|&flag| !flag).collect();
            objects.box_pred.select_rows(&others).map(|rows| {
                let confidence = rows.select_columns(&[CONFIDENCE_OFFSET]);
                let target = confidence.zeros_like();
                sum_squared_error(confidence, target)
            })
        } else {
            None
        };

        Ok(ObjectTerms {
            localization,
            object_confidence,
            class,
            non_responsible,
        })
    }

    fn check_shapes<B: Backend>(
        &self,
        predictions: &Tensor<B, 4>,
        targets: &Tensor<B, 4>,
    ) -> YoloLossResult<[usize; 4]> {
        let pred_dims = predictions.dims();
        let target_dims = targets.dims();
        if pred_dims != target_dims {
            return Err(YoloLossError::IncompatibleShapes {
                pred_shape: pred_dims.to_vec(),
                target_shape: target_dims.to_vec(),
            });
        }

        let [batch_size, rows, cols, channels] = pred_dims;
        if batch_size == 0 {
            return Err(YoloLossError::EmptyBatch);
        }
        if rows != self.grid_size || cols != self.grid_size {
            return Err(YoloLossError::GridMismatch {
                expected: self.grid_size,
                rows,
                cols,
            });
        }
        let required = self.boxes_per_cell * BOX_RECORD_LEN;
        if channels < required {
            return Err(YoloLossError::InsufficientChannels {
                channels,
                boxes_per_cell: self.boxes_per_cell,
                required,
            });
        }

        Ok(pred_dims)
    }
}

/// `MseLoss` without averaging: every term is a plain sum over its selection.
fn sum_squared_error<B: Backend, const D: usize>(
    predictions: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    MseLoss::new().forward(predictions, targets, Reduction::Sum)
}
