// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! The MxN redistribution copy engine.
//!
//! Given the payloads a sealed step holds for one variable and a reader's
//! selection, copy exactly the requested sub-array out of the contributing
//! payloads: only the intersection of each writer's region with the request
//! moves. The routines are generic over element size; nothing here is
//! duplicated per element type.
//!
//! Overlapping writer regions resolve last-arrival-wins. Elements of the
//! request no payload covers are left untouched in the destination; the
//! caller decides whether an incomplete step is an error.

use crate::selection::Selection;
use crate::step::StepPayload;

/// Copy the elements of `isect` from `src` into `dst`.
///
/// `src` is the linearized buffer of `src_sel`; `dst` the linearized buffer of
/// `dst_sel`; `isect` must be contained in both. The innermost dimension is
/// contiguous in both layouts, so the copy walks the outer dimensions
/// odometer-style and moves one innermost run per position.
pub(crate) fn copy_region(
    dst: &mut [u8],
    dst_sel: &Selection,
    src: &[u8],
    src_sel: &Selection,
    isect: &Selection,
    elem_size: usize,
) {
    let rank = isect.rank();
    let run = isect.count()[rank - 1] * elem_size;
    let mut point = isect.offset().to_vec();

    loop {
        let s = src_sel.linear_index(&point) * elem_size;
        let d = dst_sel.linear_index(&point) * elem_size;
        dst[d..d + run].copy_from_slice(&src[s..s + run]);

        // Advance the outer dimensions; rank-1 selections copy a single run.
        let mut dim = rank - 1;
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            point[dim] += 1;
            if point[dim] < isect.end(dim) {
                break;
            }
            point[dim] = isect.offset()[dim];
            if dim == 0 {
                return;
            }
        }
    }
}

/// Satisfy a reader request from a step's payloads for one variable.
///
/// Applies every intersecting payload in arrival order and returns how many
/// payloads contributed. A return of zero means the request hit a complete
/// coverage gap.
pub(crate) fn execute_read<'a>(
    payloads: impl Iterator<Item = &'a StepPayload>,
    request: &Selection,
    dst: &mut [u8],
    elem_size: usize,
) -> usize {
    let mut contributors = 0;
    for p in payloads {
        if let Some(isect) = p.selection().intersect(request) {
            tracing::trace!(
                src_offset = ?p.selection().offset(),
                isect_offset = ?isect.offset(),
                isect_count = ?isect.count(),
                "copying intersection into read buffer"
            );
            copy_region(dst, request, p.data(), p.selection(), &isect, elem_size);
            contributors += 1;
        }
    }
    contributors
}
