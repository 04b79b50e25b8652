// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::num::NonZero;

use new_zealand::nz;

// A poisoned lock means a page list was left half-updated, so no pool state can be trusted.
pub(crate) const ERR_POISONED_LOCK: &str =
    "poisoned lock - cannot continue execution because security and privacy guarantees can no longer be upheld";

/// Capacity of a standard page when the pool is not configured otherwise.
pub const DEFAULT_PAGE_SIZE: NonZero<usize> = nz!(16_384);

/// Region size at which a single multi-segment write is split into separate requests.
pub(crate) const MAX_MULTI_SEGMENT_SIZE_HINT: usize = 1024 * 1024;

/// Declared lengths above this are checked against the known input length before allocating.
pub(crate) const MAX_UNCHECKED_READ_LEN: usize = 10_240;

/// How many slices a buffer can span before vectored I/O helpers spill to the heap.
pub const MAX_INLINE_SEGMENTS: usize = 4;
