//! # Row and column gathers
//!
//! Index-list selection along one axis of a 2D tensor. Index lists come from the
//! host, so the output size is known before the gather runs and empty
//! selections can be reported as `None` instead of producing zero-sized tensors.

use burn::{prelude::*, tensor::TensorData};

/// Builds a 1D `Int` tensor from host indices.
///
/// Returns `None` when `indices` is empty, since several backends reject
/// zero-length index tensors.
pub fn indices_tensor<B: Backend>(
    indices: &[usize],
    device: &B::Device,
) -> Option<Tensor<B, 1, Int>> {
    if indices.is_empty() {
        return None;
    }

    let values: Vec<i64> = indices.iter().map(|&index| index as i64).collect();
    let len = values.len();
    Some(Tensor::from_data(TensorData::new(values, [len]), device))
}

/// Keeps the rows of `tensor` whose entry in `mask` is `true`.
///
/// # Shapes
///
/// - tensor: `[rows, cols]`
/// - mask: `rows` entries
/// - output: `[kept, cols]`, or `None` when `kept == 0`
///
/// # Panics
///
/// If `mask.len()` differs from the number of rows.
pub fn select_rows<B: Backend>(tensor: Tensor<B, 2>, mask: &[bool]) -> Option<Tensor<B, 2>> {
    let [rows, _] = tensor.dims();
    assert_eq!(
        mask.len(),
        rows,
        "Mask length ({}) must match row count ({rows})",
        mask.len()
    );

    let kept: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(row, &keep)| keep.then_some(row))
        .collect();

    take_rows(tensor, &kept)
}

/// Gathers `rows` of `tensor` in the given order.
///
/// # Panics
///
/// If any index is out of bounds.
pub fn take_rows<B: Backend>(tensor: Tensor<B, 2>, rows: &[usize]) -> Option<Tensor<B, 2>> {
    let [row_count, _] = tensor.dims();
    assert!(
        rows.iter().all(|&row| row < row_count),
        "Row indices {rows:?} out of bounds for {row_count} rows"
    );

    let indices = indices_tensor(rows, &tensor.device())?;
    Some(tensor.select(0, indices))
}

/// Gathers `columns` of `tensor` in the given order.
///
/// # Panics
///
/// If `columns` is empty or any index is out of bounds.
pub fn select_columns<B: Backend>(tensor: Tensor<B, 2>, columns: &[usize]) -> Tensor<B, 2> {
    let [_, col_count] = tensor.dims();
    assert!(
        columns.iter().all(|&col| col < col_count),
        "Column indices {columns:?} out of bounds for {col_count} columns"
    );

    let indices = indices_tensor(columns, &tensor.device())
        .unwrap_or_else(|| panic!("At least one column must be selected"));
    tensor.select(1, indices)
}
