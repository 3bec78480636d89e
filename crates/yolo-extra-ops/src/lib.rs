//! Additional operations for the Burn deep learning framework
//!
//! Burn has no boolean `masked_select` with a dynamically sized result. This crate
//! fills that gap for row-major 2D layouts: the caller decides which rows or
//! columns to keep on the host, and the gather itself is a plain `select`, so
//! gradients flow back into exactly the picked elements.

use burn::prelude::*;

mod gather;

// Convenient re-exports
pub use gather::{indices_tensor, select_columns, select_rows, take_rows};

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend>: Sized {
    /// Keep the rows whose mask entry is `true`. Returns `None` when nothing is kept.
    fn select_rows(self, mask: &[bool]) -> Option<Self>;

    /// Keep the given rows, in the given order. Returns `None` for an empty list.
    fn take_rows(self, rows: &[usize]) -> Option<Self>;

    /// Keep the given columns, in the given order.
    fn select_columns(self, columns: &[usize]) -> Self;
}

impl<B: Backend> TensorExtraOps<B> for Tensor<B, 2> {
    fn select_rows(self, mask: &[bool]) -> Option<Self> {
        gather::select_rows(self, mask)
    }

    fn take_rows(self, rows: &[usize]) -> Option<Self> {
        gather::take_rows(self, rows)
    }

    fn select_columns(self, columns: &[usize]) -> Self {
        gather::select_columns(self, columns)
    }
}
