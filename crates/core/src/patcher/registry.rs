//! Process-wide registry of live patches
//!
//! Every constructed [`Patch`](super::Patch) reserves its byte range here
//! until it is dropped, applied or not.

use std::sync::LazyLock;

use parking_lot::{Mutex, MutexGuard};
use slotmap::{new_key_type, SlotMap};

use memtools_sdk::Address;

new_key_type! {
    /// Handle for a live patch
    pub struct PatchKey;
}

/// Byte range held by a live patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Reservation {
    pub address: Address,
    pub size: usize,
}

pub(super) type LivePatches = SlotMap<PatchKey, Reservation>;

static LIVE_PATCHES: LazyLock<Mutex<LivePatches>> = LazyLock::new(|| Mutex::new(SlotMap::with_key()));

/// Lock the registry
///
/// Construction holds this across its checks and the insert.
pub(super) fn lock() -> MutexGuard<'static, LivePatches> {
    LIVE_PATCHES.lock()
}

pub(super) fn release(key: PatchKey) {
    LIVE_PATCHES.lock().remove(key);
}

/// Whether two byte ranges share at least one byte
///
/// Empty ranges never overlap. Ends are clamped to the top of the address space.
pub fn overlaps(address: Address, size: usize, other: Address, other_size: usize) -> bool {
    if size == 0 || other_size == 0 {
        return false;
    }
    let (start, end) = (address.value(), address.value().saturating_add(size));
    let (other_start, other_end) = (other.value(), other.value().saturating_add(other_size));
    start < other_end && other_start < end
}

/// First live reservation overlapping `address..address + size`
pub(super) fn find_overlap(live: &LivePatches, address: Address, size: usize) -> Option<Reservation> {
    live.values()
        .find(|reservation| overlaps(address, size, reservation.address, reservation.size))
        .copied()
}

/// Whether a patch handle is still live
pub fn is_live(key: PatchKey) -> bool {
    LIVE_PATCHES.lock().contains_key(key)
}

/// Number of live patches in the process
pub fn live_count() -> usize {
    LIVE_PATCHES.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: usize) -> Address {
        Address::new(value)
    }

    #[test]
    fn test_overlaps() {
        assert!(overlaps(at(0x100), 4, at(0x102), 4));
        assert!(overlaps(at(0x102), 4, at(0x100), 4));
        assert!(overlaps(at(0x100), 8, at(0x102), 2));
        assert!(overlaps(at(0x100), 4, at(0x100), 4));

        // adjacent ranges
        assert!(!overlaps(at(0x100), 4, at(0x104), 4));
        assert!(!overlaps(at(0x104), 4, at(0x100), 4));
        assert!(!overlaps(at(0x100), 4, at(0x200), 4));
    }

    #[test]
    fn test_overlaps_top_of_address_space() {
        assert!(overlaps(at(usize::MAX - 1), 4, at(usize::MAX), 1));
        assert!(overlaps(at(usize::MAX), 1, at(usize::MAX - 1), 4));
        assert!(!overlaps(at(usize::MAX - 8), 4, at(usize::MAX - 4), 4));
    }

    #[test]
    fn test_empty_ranges_never_overlap() {
        assert!(!overlaps(at(0x100), 0, at(0x100), 4));
        assert!(!overlaps(at(0x100), 0, at(0x0FE), 4));
        assert!(!overlaps(at(0x0FE), 4, at(0x100), 0));
        assert!(!overlaps(at(0x100), 0, at(0x100), 0));
    }

    #[test]
    fn test_find_overlap() {
        let mut live = LivePatches::with_key();
        live.insert(Reservation {
            address: at(0x1000),
            size: 4,
        });
        live.insert(Reservation {
            address: at(0x2000),
            size: 16,
        });

        assert_eq!(find_overlap(&live, at(0x1004), 4), None);
        assert_eq!(
            find_overlap(&live, at(0x1FFC), 8).map(|r| r.address),
            Some(at(0x2000))
        );
    }
}
