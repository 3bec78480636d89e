//! Pairwise Intersection over Union (IoU) between corner-form boxes.
//!
//! For boxes `a = (x1, y1, x2, y2)` and `b`:
//! ```text
//! lt    = max(a.x1y1, b.x1y1)
//! rb    = min(a.x2y2, b.x2y2)
//! inter = clamp(rb - lt, 0).w * clamp(rb - lt, 0).h
//! IoU   = inter / (area(a) + area(b) - inter)
//! ```
//!
//! A pair whose union is not positive (e.g. two zero-area boxes) has IoU `0`.

use burn::tensor::{backend::Backend, Tensor};

/// Computes the `[N, M]` IoU matrix between two sets of corner-form boxes.
///
/// # Shapes
///
/// - boxes1: `[N, 4]` as `(x1, y1, x2, y2)`
/// - boxes2: `[M, 4]` as `(x1, y1, x2, y2)`
/// - output: `[N, M]`
///
/// # Panics
///
/// If either input does not have exactly 4 columns.
pub fn compute_iou<B: Backend>(boxes1: Tensor<B, 2>, boxes2: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, cols1] = boxes1.dims();
    let [m, cols2] = boxes2.dims();
    assert!(
        cols1 == 4 && cols2 == 4,
        "Corner boxes must have 4 columns, got {cols1} and {cols2}"
    );

    // [N, 2] -> [N, 1, 2] -> [N, M, 2] and [M, 2] -> [1, M, 2] -> [N, M, 2]
    let lt1 = boxes1.clone().slice([0..n, 0..2]).reshape([n, 1, 2]).expand([n, m, 2]);
    let rb1 = boxes1.clone().slice([0..n, 2..4]).reshape([n, 1, 2]).expand([n, m, 2]);
    let lt2 = boxes2.clone().slice([0..m, 0..2]).reshape([1, m, 2]).expand([n, m, 2]);
    let rb2 = boxes2.clone().slice([0..m, 2..4]).reshape([1, m, 2]).expand([n, m, 2]);

    let lt = lt1.max_pair(lt2);
    let rb = rb1.min_pair(rb2);

    // Disjoint boxes give negative extents; clip so the overlap is zero, not negative.
    let wh = (rb - lt).clamp_min(0.0);
    let inter = wh.clone().slice([0..n, 0..m, 0..1]).reshape([n, m])
        * wh.slice([0..n, 0..m, 1..2]).reshape([n, m]);

    let area1 = box_areas(boxes1).reshape([n, 1]).expand([n, m]);
    let area2 = box_areas(boxes2).reshape([1, m]).expand([n, m]);
    let union = area1 + area2 - inter.clone();

    let degenerate = union.clone().lower_equal_elem(0.0);
    let safe_union = union.mask_fill(degenerate.clone(), 1.0);

    (inter / safe_union).mask_fill(degenerate, 0.0)
}

/// `(x2 - x1) * (y2 - y1)` for each row of a `[N, 4]` corner-form tensor.
fn box_areas<B: Backend>(boxes: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n, _] = boxes.dims();
    let width = boxes.clone().slice([0..n, 2..3]) - boxes.clone().slice([0..n, 0..1]);
    let height = boxes.clone().slice([0..n, 3..4]) - boxes.slice([0..n, 1..2]);

    (width * height).reshape([n])
}
