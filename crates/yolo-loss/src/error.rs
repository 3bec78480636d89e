use thiserror::Error;

/// Errors that can occur during YOLO loss computation.
#[derive(Debug, Error)]
pub enum YoloLossError {
    /// The batch dimension is zero, so there is nothing to normalize by.
    #[error("predictions cannot be empty - batch size must be at least one")]
    EmptyBatch,

    /// Predictions and targets disagree on shape.
    #[error("incompatible tensor shapes: predictions shape {pred_shape:?} does not match targets shape {target_shape:?}")]
    IncompatibleShapes {
        pred_shape: Vec<usize>,
        target_shape: Vec<usize>,
    },

    /// The spatial dimensions are not the configured `S x S` grid.
    #[error("grid dimension mismatch: expected {expected}x{expected} cells, got {rows}x{cols}")]
    GridMismatch {
        expected: usize,
        rows: usize,
        cols: usize,
    },

    /// The trailing dimension cannot hold `B` box records.
    #[error("channel dimension {channels} is smaller than {boxes_per_cell} boxes x 5 = {required}")]
    InsufficientChannels {
        channels: usize,
        boxes_per_cell: usize,
        required: usize,
    },

    /// A box tensor has a row count or width the matcher cannot use.
    #[error("invalid box tensor: {reason}")]
    InvalidBoxes { reason: String },

    /// Reading tensor data back to the host failed.
    #[error("tensor conversion failed: {reason}")]
    TensorConversion { reason: String },
}

/// A specialized `Result` type for YOLO loss operations.
pub type YoloLossResult<T> = Result<T, YoloLossError>;
