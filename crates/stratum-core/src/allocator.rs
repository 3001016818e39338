// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Address range allocation over an IPv4 prefix.
//!
//! Pure interval punching: start from the usable span of the prefix, punch
//! a hole for every reservation in address order, then hand out the first
//! free range long enough for the request. Nothing here keeps state between
//! calls; [`crate::topology::Topology`] owns the reservations and serializes
//! allocation behind its lock.

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Addresses after the network address kept for infrastructure defaults.
pub const DEFAULT_RESERVED_HEAD: u32 = 10;

/// Inclusive range of IPv4 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl AddressRange {
    /// Create a range. Bounds are not validated here.
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }

    fn from_bounds(start: u32, end: u32) -> Self {
        Self::new(Ipv4Addr::from(start), Ipv4Addr::from(end))
    }

    /// Number of addresses covered, zero when `end < start`.
    pub fn len(&self) -> u64 {
        let (start, end) = self.bounds();
        if end < start {
            0
        } else {
            u64::from(end - start) + 1
        }
    }

    /// True when the range covers no address.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `addr` lies inside the range.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.start <= addr && addr <= self.end
    }

    /// Whether both ranges share at least one address.
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    fn bounds(&self) -> (u32, u32) {
        (u32::from(self.start), u32::from(self.end))
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Carves free sub-ranges out of a prefix.
#[derive(Debug, Clone, Copy)]
pub struct AddressRangeAllocator {
    reserved_head: u32,
}

impl Default for AddressRangeAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVED_HEAD)
    }
}

impl AddressRangeAllocator {
    /// Allocator skipping `reserved_head` addresses after the network address.
    pub fn new(reserved_head: u32) -> Self {
        Self { reserved_head }
    }

    /// Size of the reserved head.
    pub fn reserved_head(&self) -> u32 {
        self.reserved_head
    }

    /// Usable span of `prefix`, or `None` when nothing is left after the
    /// network address, broadcast address and reserved head.
    pub fn usable_span(&self, prefix: Ipv4Net) -> Option<AddressRange> {
        let network = u32::from(prefix.network());
        let broadcast = u32::from(prefix.broadcast());
        let first = network.checked_add(1)?.checked_add(self.reserved_head)?;
        let last = broadcast.checked_sub(1)?;
        (first <= last).then(|| AddressRange::from_bounds(first, last))
    }

    /// Maximal free sub-ranges of `prefix` given existing reservations.
    pub fn free_ranges(
        &self,
        prefix: Ipv4Net,
        reservations: &[AddressRange],
    ) -> Result<Vec<AddressRange>> {
        for reservation in reservations {
            validate(prefix, reservation)?;
        }

        let mut sorted = reservations.to_vec();
        sorted.sort_by_key(|r| r.start);

        let mut free: Vec<AddressRange> = self.usable_span(prefix).into_iter().collect();
        for reservation in &sorted {
            free = punch(free, reservation);
        }
        Ok(free)
    }

    /// First free range of exactly `length` addresses.
    pub fn allocate(
        &self,
        prefix: Ipv4Net,
        reservations: &[AddressRange],
        length: u32,
    ) -> Result<AddressRange> {
        if length == 0 {
            return Err(CoreError::InvalidRange {
                start: prefix.network(),
                end: prefix.network(),
                reason: "requested length is zero".to_string(),
            });
        }

        self.free_ranges(prefix, reservations)?
            .into_iter()
            .find(|free| free.len() >= u64::from(length))
            .map(|free| {
                let start = u32::from(free.start);
                AddressRange::from_bounds(start, start + (length - 1))
            })
            .ok_or_else(|| CoreError::RangeExhausted {
                prefix: prefix.to_string(),
                requested: length,
            })
    }
}

fn validate(prefix: Ipv4Net, range: &AddressRange) -> Result<()> {
    let reason = if range.end < range.start {
        "end precedes start"
    } else if !prefix.contains(&range.start) || !prefix.contains(&range.end) {
        "not contained in prefix"
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidRange {
        start: range.start,
        end: range.end,
        reason: format!("{} {}", reason, prefix),
    })
}

/// Split every free range overlapping `hole` around it.
fn punch(free: Vec<AddressRange>, hole: &AddressRange) -> Vec<AddressRange> {
    let (hole_start, hole_end) = hole.bounds();
    let mut out = Vec::with_capacity(free.len() + 1);
    for range in free {
        if !range.overlaps(hole) {
            out.push(range);
            continue;
        }
        let (start, end) = range.bounds();
        if start < hole_start {
            out.push(AddressRange::from_bounds(start, hole_start - 1));
        }
        if end > hole_end {
            out.push(AddressRange::from_bounds(hole_end + 1, end));
        }
    }
    out
}
