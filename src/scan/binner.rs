//! Windowed spectral binning of the unfolded scan series
//!
//! A fixed-length window slides over the scan series, advancing a third of
//! its length per step so consecutive summary points overlap. Inside a
//! window, every (position, reading) pair from all four phases lands in a
//! quarter-step position bin; readings sharing a bin are median-combined,
//! which suppresses single-frame glitches without a separate despiking pass.
//!
//! Each combined spectrum is background-subtracted (against either a static
//! template or a running median of recent windows), masked against large
//! deviations, split into up-scan and down-scan halves by the fine direction
//! flags and integrated over the emission-line window into a single flux
//! number.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::scan::series::ScanSeries;

/// Scan position quantized to quarter steps.
///
/// Reconstructed positions differ by exact multiples of a quarter step, so
/// rounding `position * 4` to an integer makes physically identical
/// positions compare equal without a float map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionBin(pub i64);

impl PositionBin {
    pub fn from_position(position: f64) -> Self {
        Self((position * 4.0).round() as i64)
    }

    /// Center of the bin in counter units.
    pub fn position(&self) -> f64 {
        self.0 as f64 / 4.0
    }
}

/// Background estimation mode for the subtraction step.
#[derive(Debug, Clone)]
pub enum Background {
    /// Per-bin median over the spectra of the most recent windows, the
    /// current one included. Adapts to slow detector drifts.
    Nearest { depth: usize },
    /// Fixed template, typically from [`background_template`] over a
    /// source-free stretch of data. Bins missing from the template are
    /// dropped from the output rather than passed through unsubtracted.
    Static(BTreeMap<PositionBin, f64>),
}

impl Default for Background {
    fn default() -> Self {
        Self::Nearest { depth: 10 }
    }
}

/// Binning and reduction parameters.
#[derive(Debug, Clone)]
pub struct BinnerConfig {
    /// Window length in frames.
    pub window: usize,
    /// Bins whose subtracted value reaches this magnitude are masked out.
    pub deviation_limit: f64,
    /// Position range, in counter units, integrated for the line flux.
    pub line_window: (f64, f64),
    /// Added to down-scan positions before the line-window test, compensating
    /// the scan-direction lag of the mechanism.
    pub down_scan_offset: f64,
    pub background: Background,
}

impl Default for BinnerConfig {
    fn default() -> Self {
        Self {
            window: 18,
            deviation_limit: 200.0,
            line_window: (1750.0, 2500.0),
            down_scan_offset: 580.0,
            background: Background::default(),
        }
    }
}

impl BinnerConfig {
    /// Window advance per summary point, a third of the window length.
    pub fn advance(&self) -> usize {
        (self.window / 3).max(1)
    }
}

/// One reduced window of the scan series.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryPoint {
    /// Median elevation pointing over the window, arcseconds.
    pub elevation: f64,
    /// Median cross-elevation pointing over the window, arcseconds.
    pub cross_elevation: f64,
    /// Background-subtracted spectrum of the up-scan bins.
    pub up_spectrum: BTreeMap<PositionBin, f64>,
    /// Background-subtracted spectrum of the down-scan bins.
    pub down_spectrum: BTreeMap<PositionBin, f64>,
    /// Baseline-corrected line flux, `None` when neither scan direction has
    /// at least two bins inside the line window.
    pub line_flux: Option<f64>,
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    })
}

/// Per-bin readings and fine direction flags collected over a frame range.
fn collect_bins(
    series: &ScanSeries,
    range: std::ops::Range<usize>,
) -> BTreeMap<PositionBin, (Vec<f64>, Vec<f64>)> {
    let mut bins: BTreeMap<PositionBin, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for i in range {
        let p = &series.positions[i];
        let phases = [p.p1, p.p2, p.p3, p.p4];
        for k in 0..4 {
            let entry = bins
                .entry(PositionBin::from_position(phases[k]))
                .or_default();
            entry.0.push(series.readings[i][k]);
            entry.1.push(if p.upscan[k] { 1.0 } else { 0.0 });
        }
    }
    bins
}

/// Median-combine a frame range into one spectrum, ignoring directions.
fn combine(series: &ScanSeries, range: std::ops::Range<usize>) -> BTreeMap<PositionBin, f64> {
    collect_bins(series, range)
        .into_iter()
        .map(|(bin, (readings, _))| (bin, median(&readings).expect("bin never empty")))
        .collect()
}

/// Build a static background template from a whole series, combined as a
/// single window.
pub fn background_template(series: &ScanSeries) -> BTreeMap<PositionBin, f64> {
    combine(series, 0..series.len())
}

/// Baseline-corrected line sum for one direction's spectrum: the selected
/// bins inside the (possibly shifted) line window, minus the spectrum median
/// per selected bin. Needs at least two bins inside the window.
fn line_term(
    spectrum: &BTreeMap<PositionBin, f64>,
    line_window: (f64, f64),
    offset: f64,
) -> Option<f64> {
    let selected: Vec<f64> = spectrum
        .iter()
        .filter(|(bin, _)| {
            let p = bin.position() + offset;
            p >= line_window.0 && p <= line_window.1
        })
        .map(|(_, &v)| v)
        .collect();
    if selected.len() < 2 {
        return None;
    }
    let baseline = median(&spectrum.values().copied().collect::<Vec<f64>>())?;
    Some(selected.iter().sum::<f64>() - baseline * selected.len() as f64)
}

/// Iterator producing one [`SummaryPoint`] per window position.
///
/// Carries the running background state across windows in `Nearest` mode, so
/// one iterator should process one contiguous series.
pub struct SummaryPoints<'a> {
    series: &'a ScanSeries,
    config: BinnerConfig,
    start: usize,
    recent: VecDeque<BTreeMap<PositionBin, f64>>,
}

impl<'a> SummaryPoints<'a> {
    pub fn new(series: &'a ScanSeries, config: BinnerConfig) -> Self {
        Self {
            series,
            config,
            start: 0,
            recent: VecDeque::new(),
        }
    }

    /// Background value for a bin of the current combined spectrum, `None`
    /// when the bin must be dropped.
    fn background_for(&self, bin: PositionBin) -> Option<f64> {
        match &self.config.background {
            Background::Static(template) => template.get(&bin).copied(),
            Background::Nearest { .. } => {
                let values: Vec<f64> = self
                    .recent
                    .iter()
                    .filter_map(|spectrum| spectrum.get(&bin).copied())
                    .collect();
                median(&values)
            }
        }
    }
}

impl Iterator for SummaryPoints<'_> {
    type Item = SummaryPoint;

    fn next(&mut self) -> Option<SummaryPoint> {
        let window = self.config.window;
        if self.start + window > self.series.len() {
            return None;
        }
        let range = self.start..self.start + window;
        self.start += self.config.advance();

        let bins = collect_bins(self.series, range.clone());
        let mut combined = BTreeMap::new();
        let mut directions: BTreeMap<PositionBin, Option<bool>> = BTreeMap::new();
        for (bin, (readings, flags)) in bins {
            combined.insert(bin, median(&readings).expect("bin never empty"));
            // A bin is up or down only when its flags agree in the median;
            // split bins belong to neither spectrum.
            directions.insert(
                bin,
                match median(&flags).expect("bin never empty") {
                    f if f == 1.0 => Some(true),
                    f if f == 0.0 => Some(false),
                    _ => None,
                },
            );
        }

        if let Background::Nearest { depth } = self.config.background {
            self.recent.push_back(combined.clone());
            while self.recent.len() > depth {
                self.recent.pop_front();
            }
        }

        let mut up_spectrum = BTreeMap::new();
        let mut down_spectrum = BTreeMap::new();
        for (&bin, &value) in &combined {
            let Some(background) = self.background_for(bin) else {
                continue;
            };
            let subtracted = value - background;
            if subtracted.abs() >= self.config.deviation_limit {
                continue;
            }
            match directions[&bin] {
                Some(true) => {
                    up_spectrum.insert(bin, subtracted);
                }
                Some(false) => {
                    down_spectrum.insert(bin, subtracted);
                }
                None => {}
            }
        }

        let up_term = line_term(&up_spectrum, self.config.line_window, 0.0);
        let down_term = line_term(
            &down_spectrum,
            self.config.line_window,
            self.config.down_scan_offset,
        );
        let terms: Vec<f64> = [up_term, down_term].into_iter().flatten().collect();
        let line_flux = if terms.is_empty() {
            None
        } else {
            Some(terms.iter().sum::<f64>() / terms.len() as f64)
        };

        let elevation = median(&self.series.elevation[range.clone()]).unwrap_or(0.0);
        let cross_elevation = median(&self.series.cross_elevation[range]).unwrap_or(0.0);

        debug!(
            "summary point: {} up bins, {} down bins, flux={:?}",
            up_spectrum.len(),
            down_spectrum.len(),
            line_flux
        );
        Some(SummaryPoint {
            elevation,
            cross_elevation,
            up_spectrum,
            down_spectrum,
            line_flux,
        })
    }
}
