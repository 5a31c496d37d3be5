//! Slice and volume data structures, and slice-to-volume assembly
//!
//! Slices arrive from the scanner in arbitrary (volume, slice) order; the
//! [`VolumeAssembler`] collects them per volume index and yields each volume
//! exactly once, as soon as all of its slices are present.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use bytes::Buf;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SliceLinkError};

/// Bytes per voxel on the wire: fixed-width unsigned 16-bit little-endian
pub const BYTES_PER_VOXEL: usize = 2;

/// Slice geometry for a session: `x`/`y` voxels per slice, `z` slices per
/// volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDims {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl VolumeDims {
    /// Validated constructor: all dimensions must be positive
    pub fn new(x: u32, y: u32, z: u32) -> Result<Self> {
        if x == 0 || y == 0 || z == 0 {
            return Err(SliceLinkError::InvalidMessage(format!(
                "volume dimensions must be positive, got {}x{}x{}",
                x, y, z
            )));
        }
        Ok(VolumeDims { x, y, z })
    }

    /// Voxels in one slice
    pub fn voxels_per_slice(&self) -> usize {
        self.x as usize * self.y as usize
    }

    /// Expected payload byte length of one slice
    pub fn slice_payload_len(&self) -> usize {
        self.voxels_per_slice() * BYTES_PER_VOXEL
    }

    /// Voxels in one full volume
    pub fn voxels_per_volume(&self) -> usize {
        self.voxels_per_slice() * self.z as usize
    }
}

impl std::fmt::Display for VolumeDims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// One fully received 2D slice, decoded to voxel intensities
///
/// Immutable once constructed; construction validates the payload length
/// against the session geometry and the slice index against `z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub vol: u32,
    pub slice: u32,
    data: Vec<u16>,
}

impl Slice {
    /// Decode a slice from its raw wire payload
    ///
    /// # Errors
    ///
    /// - [`SliceLinkError::SliceOutOfRange`] - slice index >= `z`
    /// - [`SliceLinkError::InvalidSize`] - payload length does not match
    ///   `x * y * BYTES_PER_VOXEL`
    pub fn from_payload(dims: &VolumeDims, vol: u32, slice: u32, payload: &[u8]) -> Result<Self> {
        if slice >= dims.z {
            return Err(SliceLinkError::SliceOutOfRange { slice, z: dims.z });
        }
        if payload.len() != dims.slice_payload_len() {
            return Err(SliceLinkError::InvalidSize {
                expected: dims.slice_payload_len(),
                actual: payload.len(),
            });
        }
        let mut buf = payload;
        let mut data = Vec::with_capacity(dims.voxels_per_slice());
        while buf.has_remaining() {
            data.push(buf.get_u16_le());
        }
        Ok(Slice { vol, slice, data })
    }

    /// Voxel intensities in row-major `[x, y]` order
    pub fn data(&self) -> &[u16] {
        &self.data
    }
}

/// One complete 3D volume, assembled from `z` slices
///
/// Never mutated after assembly; carries the wall-clock time at which its
/// final slice arrived.
#[derive(Debug, Clone)]
pub struct Volume {
    pub vol: u32,
    pub dims: VolumeDims,
    pub completed_at: SystemTime,
    data: Vec<u16>,
}

impl Volume {
    /// Voxel intensity at `(x, y, z)`
    pub fn voxel(&self, x: u32, y: u32, z: u32) -> u16 {
        let per_slice = self.dims.voxels_per_slice();
        let idx =
            z as usize * per_slice + y as usize * self.dims.x as usize + x as usize;
        self.data[idx]
    }

    /// All voxels, slice-major: slice `z` occupies
    /// `[z * x * y, (z + 1) * x * y)`
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    #[cfg(test)]
    pub(crate) fn from_raw(vol: u32, dims: VolumeDims, data: Vec<u16>) -> Self {
        assert_eq!(data.len(), dims.voxels_per_volume());
        Volume {
            vol,
            dims,
            completed_at: SystemTime::now(),
            data,
        }
    }
}

/// A volume still collecting slices
struct PendingVolume {
    data: Vec<u16>,
    filled: Vec<bool>,
    filled_count: u32,
}

impl PendingVolume {
    fn new(dims: &VolumeDims) -> Self {
        PendingVolume {
            data: vec![0; dims.voxels_per_volume()],
            filled: vec![false; dims.z as usize],
            filled_count: 0,
        }
    }
}

/// Collects slices by (volume index, slice index) into complete volumes
///
/// Duplicate slice indices overwrite their slot; completion requires `z`
/// distinct indices and fires exactly once per volume. Volumes may complete
/// out of numeric order when slices interleave across volumes. Memory for a
/// pending volume is owned here until completion, then transferred to the
/// caller; a completed volume is never assembled twice.
pub struct VolumeAssembler {
    dims: VolumeDims,
    pending: HashMap<u32, PendingVolume>,
    completed: HashSet<u32>,
}

impl VolumeAssembler {
    pub fn new(dims: VolumeDims) -> Self {
        VolumeAssembler {
            dims,
            pending: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// Insert a slice; returns the assembled volume when this slice was the
    /// last missing one
    ///
    /// A slice addressed at an already-completed volume is dropped (volumes
    /// are immutable once complete).
    pub fn insert(&mut self, slice: Slice) -> Option<Volume> {
        let vol_idx = slice.vol;
        if self.completed.contains(&vol_idx) {
            warn!(
                vol = vol_idx,
                slice = slice.slice,
                "dropping slice for already-completed volume"
            );
            return None;
        }

        let per_slice = self.dims.voxels_per_slice();
        let entry = self
            .pending
            .entry(vol_idx)
            .or_insert_with(|| PendingVolume::new(&self.dims));

        let slot = slice.slice as usize;
        let offset = slot * per_slice;
        entry.data[offset..offset + per_slice].copy_from_slice(slice.data());
        if !entry.filled[slot] {
            entry.filled[slot] = true;
            entry.filled_count += 1;
        }

        if entry.filled_count < self.dims.z {
            return None;
        }

        // the entry_or_insert above guarantees the key exists
        let finished = self.pending.remove(&vol_idx)?;
        self.completed.insert(vol_idx);
        debug!(vol = vol_idx, "volume complete");
        Some(Volume {
            vol: vol_idx,
            dims: self.dims,
            completed_at: SystemTime::now(),
            data: finished.data,
        })
    }

    /// Number of volumes that reached Complete
    pub fn completed_count(&self) -> u32 {
        self.completed.len() as u32
    }

    /// Number of volumes still collecting slices
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> VolumeDims {
        VolumeDims { x: 4, y: 4, z: 3 }
    }

    fn payload(dims: &VolumeDims, fill: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(dims.slice_payload_len());
        for _ in 0..dims.voxels_per_slice() {
            out.extend_from_slice(&fill.to_le_bytes());
        }
        out
    }

    fn slice(dims: &VolumeDims, vol: u32, idx: u32, fill: u16) -> Slice {
        Slice::from_payload(dims, vol, idx, &payload(dims, fill)).unwrap()
    }

    #[test]
    fn test_dims_validation() {
        assert!(VolumeDims::new(64, 64, 18).is_ok());
        assert!(VolumeDims::new(0, 64, 18).is_err());
    }

    #[test]
    fn test_dims_payload_len() {
        let d = VolumeDims { x: 64, y: 64, z: 18 };
        assert_eq!(d.slice_payload_len(), 8192);
        assert_eq!(d.voxels_per_volume(), 64 * 64 * 18);
    }

    #[test]
    fn test_slice_decode_little_endian() {
        let d = VolumeDims { x: 2, y: 1, z: 1 };
        let s = Slice::from_payload(&d, 0, 0, &[0x01, 0x02, 0xFF, 0x00]).unwrap();
        assert_eq!(s.data(), &[0x0201, 0x00FF]);
    }

    #[test]
    fn test_slice_rejects_out_of_range_index() {
        let d = dims();
        let result = Slice::from_payload(&d, 0, 3, &payload(&d, 1));
        assert!(matches!(
            result,
            Err(SliceLinkError::SliceOutOfRange { slice: 3, z: 3 })
        ));
    }

    #[test]
    fn test_slice_rejects_wrong_payload_len() {
        let d = dims();
        let result = Slice::from_payload(&d, 0, 0, &[0u8; 10]);
        assert!(matches!(result, Err(SliceLinkError::InvalidSize { .. })));
    }

    #[test]
    fn test_assembly_in_order() {
        let d = dims();
        let mut asm = VolumeAssembler::new(d);
        assert!(asm.insert(slice(&d, 0, 0, 1)).is_none());
        assert!(asm.insert(slice(&d, 0, 1, 2)).is_none());
        let vol = asm.insert(slice(&d, 0, 2, 3)).unwrap();
        assert_eq!(vol.vol, 0);
        assert_eq!(vol.voxel(0, 0, 0), 1);
        assert_eq!(vol.voxel(3, 3, 1), 2);
        assert_eq!(vol.voxel(0, 2, 2), 3);
        assert_eq!(asm.completed_count(), 1);
    }

    #[test]
    fn test_assembly_scrambled_order_completes_once() {
        let d = dims();
        let mut asm = VolumeAssembler::new(d);
        let mut completions = 0;
        for idx in [2u32, 0, 1] {
            if asm.insert(slice(&d, 0, idx, idx as u16)).is_some() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(asm.completed_count(), 1);
        assert_eq!(asm.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_slice_overwrites_without_completing() {
        let d = dims();
        let mut asm = VolumeAssembler::new(d);
        assert!(asm.insert(slice(&d, 0, 0, 1)).is_none());
        assert!(asm.insert(slice(&d, 0, 0, 9)).is_none());
        assert!(asm.insert(slice(&d, 0, 1, 2)).is_none());
        // still needs slice 2: two distinct indices present, not three
        let vol = asm.insert(slice(&d, 0, 2, 3)).unwrap();
        // overwrite won: slot 0 holds the later value
        assert_eq!(vol.voxel(0, 0, 0), 9);
    }

    #[test]
    fn test_interleaved_volumes_complete_out_of_order() {
        let d = dims();
        let mut asm = VolumeAssembler::new(d);
        assert!(asm.insert(slice(&d, 0, 0, 1)).is_none());
        assert!(asm.insert(slice(&d, 1, 0, 1)).is_none());
        assert!(asm.insert(slice(&d, 1, 1, 1)).is_none());
        assert!(asm.insert(slice(&d, 0, 1, 1)).is_none());
        // volume 1 finishes first
        let first = asm.insert(slice(&d, 1, 2, 1)).unwrap();
        assert_eq!(first.vol, 1);
        let second = asm.insert(slice(&d, 0, 2, 1)).unwrap();
        assert_eq!(second.vol, 0);
        assert_eq!(asm.completed_count(), 2);
    }

    #[test]
    fn test_late_slice_for_completed_volume_is_dropped() {
        let d = dims();
        let mut asm = VolumeAssembler::new(d);
        for idx in 0..3 {
            asm.insert(slice(&d, 0, idx, 5));
        }
        assert_eq!(asm.completed_count(), 1);
        // a late re-send must neither re-complete nor create pending state
        assert!(asm.insert(slice(&d, 0, 1, 7)).is_none());
        assert_eq!(asm.completed_count(), 1);
        assert_eq!(asm.pending_count(), 0);
    }

    #[test]
    fn test_earlier_volume_accepted_after_later_completes() {
        let d = dims();
        let mut asm = VolumeAssembler::new(d);
        for idx in 0..3 {
            asm.insert(slice(&d, 5, idx, 1));
        }
        assert_eq!(asm.completed_count(), 1);
        for idx in 0..2 {
            assert!(asm.insert(slice(&d, 2, idx, 1)).is_none());
        }
        let vol = asm.insert(slice(&d, 2, 2, 1)).unwrap();
        assert_eq!(vol.vol, 2);
        assert_eq!(asm.completed_count(), 2);
    }

    #[test]
    fn test_missing_slice_never_completes() {
        let d = dims();
        let mut asm = VolumeAssembler::new(d);
        assert!(asm.insert(slice(&d, 0, 0, 1)).is_none());
        assert!(asm.insert(slice(&d, 0, 2, 1)).is_none());
        assert_eq!(asm.completed_count(), 0);
        assert_eq!(asm.pending_count(), 1);
    }
}
