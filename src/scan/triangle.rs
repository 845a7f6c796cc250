//! Triangular-waveform unfolding
//!
//! The scan mechanism drives a triangular (bidirectional linear ramp)
//! waveform and is read out through a single wrapped counter per frame,
//! corresponding to the third of four phase-shifted detector samples per
//! cycle. Given the per-sample amplitude step and the two turning points
//! (supplied or estimated from the data), the other three sample positions
//! are recovered by shifting the counter by quarter/half steps and
//! reflecting any overshoot back inside the `[min, max]` range.
//!
//! Two direction signals coexist and are deliberately not reconciled: the
//! coarse per-frame up/down bit from the scan-status word selects which
//! shift formulas apply, while the fine per-phase `upscan` flags come from
//! the local slope of the reconstructed sequence and drive the up/down
//! separation in the spectral binner. They can disagree near turning points.

use std::cmp::Reverse;
use std::collections::HashMap;

use tracing::debug;

use crate::{Result, TelemetryError};

/// Triangle waveform parameters. Immutable once chosen for a processing run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleParameters {
    /// Counter change per sample along a ramp.
    pub amplitude_step: f64,
    /// Lower turning point of the ramp.
    pub min_turning_point: f64,
    /// Upper turning point of the ramp.
    pub max_turning_point: f64,
}

impl TriangleParameters {
    /// Estimate the waveform parameters from a window of raw counter
    /// samples.
    ///
    /// The step is the most frequent absolute consecutive difference, which
    /// is robust against occasional corrupted frames. A pair of adjacent
    /// samples on a ramp of known step straddles an extremum offset from the
    /// pair midpoint by half the step, so the turning points fall out of the
    /// pairwise extrema of `(x[i] + x[i+1] ± step) / 2`.
    ///
    /// Needs at least two points on the same ramp; with fewer than two
    /// samples this is [`TelemetryError::InsufficientSamples`] and the
    /// caller should wait for more data.
    pub fn estimate(samples: &[f64]) -> Result<Self> {
        if samples.len() < 2 {
            return Err(TelemetryError::InsufficientSamples {
                needed: 2,
                got: samples.len(),
            });
        }

        let mut counts: HashMap<i64, usize> = HashMap::new();
        for pair in samples.windows(2) {
            let diff = (pair[1] - pair[0]).abs().round() as i64;
            *counts.entry(diff).or_insert(0) += 1;
        }
        // Ties resolve toward the smallest difference, matching a histogram
        // argmax over increasing bin values.
        let amplitude_step = counts
            .into_iter()
            .max_by_key(|&(diff, count)| (count, Reverse(diff)))
            .map(|(diff, _)| diff as f64)
            .expect("at least one pair");

        let mut max_turning_point = f64::NEG_INFINITY;
        let mut min_turning_point = f64::INFINITY;
        for pair in samples.windows(2) {
            max_turning_point =
                max_turning_point.max((pair[0] + pair[1] + amplitude_step) / 2.0);
            min_turning_point =
                min_turning_point.min((pair[0] + pair[1] - amplitude_step) / 2.0);
        }

        debug!(
            "estimated triangle waveform: step={}, max_tp={}, min_tp={}",
            amplitude_step, max_turning_point, min_turning_point
        );
        Ok(Self {
            amplitude_step,
            min_turning_point,
            max_turning_point,
        })
    }
}

/// The four reconstructed scan positions for one raw counter sample.
///
/// `p3` is always the raw measured value; `upscan[k]` is the fine slope-based
/// direction flag for phase `k + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnfoldedPosition {
    pub p1: f64,
    pub p2: f64,
    pub p3: f64,
    pub p4: f64,
    pub upscan: [bool; 4],
}

/// Extract the coarse per-sample up/down bit from scan-status word values.
///
/// The bit sits at index 2 (zero-based from the LSB) and is only meaningful
/// when the word's bit-length exceeds 3; shorter values default to down.
pub fn direction_bits(status: &[f64]) -> Vec<bool> {
    status
        .iter()
        .map(|&s| {
            let v = s as u64;
            let bit_length = 64 - v.leading_zeros();
            bit_length > 3 && (v >> 2) & 1 == 1
        })
        .collect()
}

/// Reflect an undershoot back above the lower turning point.
fn fold_low(x: f64, min_tp: f64) -> f64 {
    if x < min_tp {
        2.0 * min_tp - x
    } else {
        x
    }
}

/// Reflect an overshoot back below the upper turning point.
fn fold_high(x: f64, max_tp: f64) -> f64 {
    if x > max_tp {
        2.0 * max_tp - x
    } else {
        x
    }
}

/// Reconstruct all four phase positions for every raw counter sample.
///
/// `directions[i]` is the coarse up/down bit for sample `i` (true = up) and
/// selects between the up-scan and down-scan shift formulas. After the
/// per-sample reconstruction, the fine per-phase `upscan` flags are derived
/// from the finite-difference slope of the flattened `p1,p2,p3,p4` sequence
/// in frame order.
pub fn unfold(
    counter: &[f64],
    directions: &[bool],
    params: &TriangleParameters,
) -> Result<Vec<UnfoldedPosition>> {
    if counter.len() < 2 {
        return Err(TelemetryError::InsufficientSamples {
            needed: 2,
            got: counter.len(),
        });
    }
    debug_assert_eq!(counter.len(), directions.len());

    let half = params.amplitude_step / 2.0;
    let quarter = params.amplitude_step / 4.0;
    let min_tp = params.min_turning_point;
    let max_tp = params.max_turning_point;

    let mut positions: Vec<UnfoldedPosition> = counter
        .iter()
        .zip(directions)
        .map(|(&p3, &up)| {
            let (p1, p2, p4) = if up {
                (
                    fold_low(p3 - half, min_tp),
                    fold_low(p3 - quarter, min_tp),
                    fold_high(p3 + quarter, max_tp),
                )
            } else {
                (
                    fold_high(p3 + half, max_tp),
                    fold_high(p3 + quarter, max_tp),
                    fold_low(p3 - quarter, min_tp),
                )
            };
            UnfoldedPosition {
                p1,
                p2,
                p3,
                p4,
                upscan: [false; 4],
            }
        })
        .collect();

    // Fine direction: local slope of the interleaved p1,p2,p3,p4 sequence.
    // Central differences inside, one-sided at the ends.
    let flat: Vec<f64> = positions
        .iter()
        .flat_map(|p| [p.p1, p.p2, p.p3, p.p4])
        .collect();
    let n = flat.len();
    for (i, position) in positions.iter_mut().enumerate() {
        for k in 0..4 {
            let j = 4 * i + k;
            let slope = if j == 0 {
                flat[1] - flat[0]
            } else if j == n - 1 {
                flat[n - 1] - flat[n - 2]
            } else {
                (flat[j + 1] - flat[j - 1]) / 2.0
            };
            position.upscan[k] = slope > 0.0;
        }
    }

    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Forward triangle model: value at ramp coordinate `m` for a waveform
    /// between `min` and `max` (slope ±1 in `m`).
    fn tri(m: f64, min: f64, max: f64) -> f64 {
        let span = max - min;
        let m = m.rem_euclid(2.0 * span);
        if m < span {
            min + m
        } else {
            max - (m - span)
        }
    }

    /// Synthetic noiseless counter: step 4 between turning points 0 and 10,
    /// sampled from ramp coordinate 3 so that adjacent pairs straddle both
    /// extrema exactly.
    fn synthetic(n: usize) -> (Vec<f64>, Vec<bool>, Vec<f64>) {
        let (min, max, step, phase) = (0.0, 10.0, 4.0, 3.0);
        let coords: Vec<f64> = (0..n).map(|i| phase + step * i as f64).collect();
        let counter: Vec<f64> = coords.iter().map(|&m| tri(m, min, max)).collect();
        let dirs: Vec<bool> = coords
            .iter()
            .map(|&m| m.rem_euclid(2.0 * (max - min)) < (max - min))
            .collect();
        (counter, dirs, coords)
    }

    #[test]
    fn test_parameter_estimation_exact_on_noiseless_data() {
        let (counter, _, _) = synthetic(10);
        let params = TriangleParameters::estimate(&counter).unwrap();
        assert_eq!(params.amplitude_step, 4.0);
        assert_eq!(params.min_turning_point, 0.0);
        assert_eq!(params.max_turning_point, 10.0);
    }

    #[test]
    fn test_estimation_mode_tie_breaks_to_smallest() {
        let params = TriangleParameters::estimate(&[0.0, 1.0, 3.0]).unwrap();
        assert_eq!(params.amplitude_step, 1.0);
    }

    #[test]
    fn test_estimation_needs_two_samples() {
        let result = TriangleParameters::estimate(&[5.0]);
        assert!(matches!(
            result,
            Err(TelemetryError::InsufficientSamples { needed: 2, got: 1 })
        ));
    }

    #[test]
    fn test_estimation_robust_to_one_corrupt_frame() {
        let (mut counter, _, _) = synthetic(12);
        counter[5] = 9999.0; // one corrupted frame must not shift the step mode
        let params = TriangleParameters::estimate(&counter).unwrap();
        assert_eq!(params.amplitude_step, 4.0);
    }

    #[test]
    fn test_direction_bits() {
        // 0b1100: bit 2 set, bit-length 4 -> up
        // 0b0100: bit 2 set but bit-length only 3 -> down
        // 0b1000: bit 2 clear -> down
        assert_eq!(
            direction_bits(&[12.0, 4.0, 8.0, 0.0]),
            vec![true, false, false, false]
        );
    }

    #[test]
    fn test_unfold_round_trip_recovers_all_phases() {
        let (counter, dirs, coords) = synthetic(11);
        let params = TriangleParameters::estimate(&counter).unwrap();
        let unfolded = unfold(&counter, &dirs, &params).unwrap();

        let (min, max) = (params.min_turning_point, params.max_turning_point);
        let half = params.amplitude_step / 2.0;
        let quarter = params.amplitude_step / 4.0;
        for (u, &m) in unfolded.iter().zip(&coords) {
            assert!((u.p1 - tri(m - half, min, max)).abs() < 1e-9);
            assert!((u.p2 - tri(m - quarter, min, max)).abs() < 1e-9);
            assert_eq!(u.p3, tri(m, min, max));
            assert!((u.p4 - tri(m + quarter, min, max)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_unfold_keeps_positions_inside_turning_points() {
        let (counter, dirs, _) = synthetic(20);
        let params = TriangleParameters::estimate(&counter).unwrap();
        for u in unfold(&counter, &dirs, &params).unwrap() {
            for p in [u.p1, u.p2, u.p3, u.p4] {
                assert!(p >= params.min_turning_point && p <= params.max_turning_point);
            }
        }
    }

    #[test]
    fn test_fine_upscan_tracks_local_slope() {
        let (counter, dirs, _) = synthetic(11);
        let params = TriangleParameters::estimate(&counter).unwrap();
        let unfolded = unfold(&counter, &dirs, &params).unwrap();

        // On a long up ramp away from turning points, all phases are up;
        // sample 1 sits at coordinate 7 with p1..p4 = 5,6,7,8.
        assert_eq!(unfolded[1].upscan, [true; 4]);
        // Sample 3 sits at coordinate 15 on the down ramp: p1..p4 = 7,6,5,4.
        assert_eq!(unfolded[3].upscan, [false; 4]);
    }

    #[test]
    fn test_unfold_needs_two_samples() {
        let params = TriangleParameters {
            amplitude_step: 4.0,
            min_turning_point: 0.0,
            max_turning_point: 10.0,
        };
        let result = unfold(&[5.0], &[true], &params);
        assert!(matches!(
            result,
            Err(TelemetryError::InsufficientSamples { .. })
        ));
    }
}
