//! Built-in region-of-interest summary analyses
//!
//! A [`RoiMask`] selects the voxels of interest; [`RoiAverage`] and
//! [`RoiMedian`] summarize the selected intensities, optionally weighting
//! each voxel by the mask value.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::analysis::{analysis_error, VolumeAnalysis};
use crate::error::{Result, SliceLinkError};
use crate::results::AnalysisValues;
use crate::volume::{Volume, VolumeDims};

/// Voxel weights over a volume; membership is weight > 0
///
/// Weights are stored slice-major, matching [`Volume::data`]. Serializable
/// so masks can be loaded from JSON by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiMask {
    pub dims: VolumeDims,
    weights: Vec<f64>,
}

impl RoiMask {
    /// Build a mask from per-voxel weights
    ///
    /// # Errors
    ///
    /// [`SliceLinkError::InvalidSize`] if the weight count does not match
    /// the volume geometry; [`SliceLinkError::AnalysisFailed`] if no voxel
    /// has positive weight.
    pub fn from_weights(dims: VolumeDims, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != dims.voxels_per_volume() {
            return Err(SliceLinkError::InvalidSize {
                expected: dims.voxels_per_volume(),
                actual: weights.len(),
            });
        }
        if !weights.iter().any(|&w| w > 0.0) {
            return Err(analysis_error("mask selects no voxels"));
        }
        Ok(RoiMask { dims, weights })
    }

    /// Mask covering every voxel with unit weight
    pub fn full(dims: VolumeDims) -> Self {
        RoiMask {
            dims,
            weights: vec![1.0; dims.voxels_per_volume()],
        }
    }

    /// Validate this mask against a volume and collect the selected
    /// (intensity, weight) pairs
    fn select(&self, vol: &Volume) -> Result<Vec<(f64, f64)>> {
        if vol.dims != self.dims {
            return Err(analysis_error(format!(
                "mask dims {} do not match volume dims {}",
                self.dims, vol.dims
            )));
        }
        // deserialized masks bypass from_weights, so re-check the count here
        if self.weights.len() != self.dims.voxels_per_volume() {
            return Err(analysis_error(format!(
                "mask carries {} weights for {} voxels",
                self.weights.len(),
                self.dims.voxels_per_volume()
            )));
        }
        let selected: Vec<(f64, f64)> = vol
            .data()
            .iter()
            .zip(self.weights.iter())
            .filter(|(_, &w)| w > 0.0)
            .map(|(&v, &w)| (f64::from(v), w))
            .collect();
        if selected.is_empty() {
            return Err(analysis_error("mask selects no voxels"));
        }
        Ok(selected)
    }
}

/// Mean (or weighted mean) intensity over the mask
///
/// Reports `{"average": ...}` or `{"weightedAverage": ...}`, rounded to two
/// decimals.
pub struct RoiAverage {
    pub mask: RoiMask,
    pub weighted: bool,
}

impl RoiAverage {
    pub fn new(mask: RoiMask, weighted: bool) -> Self {
        RoiAverage { mask, weighted }
    }
}

impl VolumeAnalysis for RoiAverage {
    fn analyze(&self, vol: &Volume) -> Result<AnalysisValues> {
        let selected = self.mask.select(vol)?;
        let mut out = AnalysisValues::new();
        if self.weighted {
            let weight_sum: f64 = selected.iter().map(|(_, w)| w).sum();
            let value: f64 =
                selected.iter().map(|(v, w)| v * w).sum::<f64>() / weight_sum;
            out.insert("weightedAverage".to_string(), json!(round2(value)));
        } else {
            let value: f64 =
                selected.iter().map(|(v, _)| v).sum::<f64>() / selected.len() as f64;
            out.insert("average".to_string(), json!(round2(value)));
        }
        Ok(out)
    }
}

/// Median (or weighted median) intensity over the mask
///
/// The weighted variant uses the lower weighted median: the smallest value
/// whose cumulative weight reaches half the total. Reports `{"median": ...}`
/// or `{"weightedMedian": ...}`, rounded to two decimals.
pub struct RoiMedian {
    pub mask: RoiMask,
    pub weighted: bool,
}

impl RoiMedian {
    pub fn new(mask: RoiMask, weighted: bool) -> Self {
        RoiMedian { mask, weighted }
    }
}

impl VolumeAnalysis for RoiMedian {
    fn analyze(&self, vol: &Volume) -> Result<AnalysisValues> {
        let mut selected = self.mask.select(vol)?;
        selected.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut out = AnalysisValues::new();
        if self.weighted {
            let total: f64 = selected.iter().map(|(_, w)| w).sum();
            let midpoint = 0.5 * total;
            let mut cumulative = 0.0;
            let mut value = selected[selected.len() - 1].0;
            for &(v, w) in &selected {
                cumulative += w;
                if cumulative >= midpoint {
                    value = v;
                    break;
                }
            }
            out.insert("weightedMedian".to_string(), json!(round2(value)));
        } else {
            let mid = selected.len() / 2;
            let value = if selected.len() % 2 == 0 {
                (selected[mid - 1].0 + selected[mid].0) / 2.0
            } else {
                selected[mid].0
            };
            out.insert("median".to_string(), json!(round2(value)));
        }
        Ok(out)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> VolumeDims {
        VolumeDims { x: 2, y: 2, z: 1 }
    }

    fn volume(data: Vec<u16>) -> Volume {
        Volume::from_raw(0, dims(), data)
    }

    #[test]
    fn test_mask_validation() {
        assert!(RoiMask::from_weights(dims(), vec![1.0; 4]).is_ok());
        assert!(RoiMask::from_weights(dims(), vec![1.0; 3]).is_err());
        assert!(RoiMask::from_weights(dims(), vec![0.0; 4]).is_err());
    }

    #[test]
    fn test_average_over_full_mask() {
        let analysis = RoiAverage::new(RoiMask::full(dims()), false);
        let out = analysis.analyze(&volume(vec![10, 20, 30, 40])).unwrap();
        assert_eq!(out["average"], json!(25.0));
    }

    #[test]
    fn test_average_respects_membership() {
        let mask = RoiMask::from_weights(dims(), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let analysis = RoiAverage::new(mask, false);
        let out = analysis.analyze(&volume(vec![10, 20, 30, 40])).unwrap();
        assert_eq!(out["average"], json!(25.0));
    }

    #[test]
    fn test_weighted_average() {
        let mask = RoiMask::from_weights(dims(), vec![3.0, 1.0, 0.0, 0.0]).unwrap();
        let analysis = RoiAverage::new(mask, true);
        let out = analysis.analyze(&volume(vec![10, 20, 30, 40])).unwrap();
        // (10*3 + 20*1) / 4
        assert_eq!(out["weightedAverage"], json!(12.5));
    }

    #[test]
    fn test_median_odd_and_even() {
        let d = VolumeDims { x: 3, y: 1, z: 1 };
        let mask = RoiMask::full(d);
        let analysis = RoiMedian::new(mask, false);
        let vol = Volume::from_raw(0, d, vec![30, 10, 20]);
        assert_eq!(analysis.analyze(&vol).unwrap()["median"], json!(20.0));

        let analysis = RoiMedian::new(RoiMask::full(dims()), false);
        let out = analysis.analyze(&volume(vec![10, 20, 30, 40])).unwrap();
        assert_eq!(out["median"], json!(25.0));
    }

    #[test]
    fn test_weighted_median_lower_convention() {
        let mask = RoiMask::from_weights(dims(), vec![1.0, 1.0, 1.0, 5.0]).unwrap();
        let analysis = RoiMedian::new(mask, true);
        let out = analysis.analyze(&volume(vec![10, 20, 30, 40])).unwrap();
        // cumulative weights 1,2,3,8 against midpoint 4: 40 crosses first
        assert_eq!(out["weightedMedian"], json!(40.0));
    }

    #[test]
    fn test_dims_mismatch_is_analysis_error() {
        let other = VolumeDims { x: 4, y: 4, z: 2 };
        let analysis = RoiAverage::new(RoiMask::full(other), false);
        let result = analysis.analyze(&volume(vec![1, 2, 3, 4]));
        assert!(matches!(result, Err(SliceLinkError::AnalysisFailed(_))));
    }

    #[test]
    fn test_mask_json_roundtrip() {
        let mask = RoiMask::from_weights(dims(), vec![1.0, 0.0, 2.0, 0.5]).unwrap();
        let text = serde_json::to_string(&mask).unwrap();
        let back: RoiMask = serde_json::from_str(&text).unwrap();
        assert_eq!(back.dims, mask.dims);
        assert_eq!(back.weights, mask.weights);
    }
}
