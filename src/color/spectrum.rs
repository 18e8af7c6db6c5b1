//! One-dimensional histogram spectra
//!
//! Moving-average smoothing and gradient peak detection over 8-bit level
//! histograms. A peak runs from the local minimum on its left, over its
//! top, to the local minimum on its right.

/// Point on a spectrum: level and count
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpectrumPoint {
    pub x: f64,
    pub y: f64,
}

/// A local maximum with its bracketing minima
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub start: SpectrumPoint,
    pub top: SpectrumPoint,
    pub end: SpectrumPoint,
}

impl Peak {
    /// Top above the higher of the two minima; a peak sitting on the end of
    /// the spectrum is measured against its one real minimum
    pub fn height(&self) -> f64 {
        let left = if self.start.x < self.top.x {
            self.start.y
        } else {
            f64::NEG_INFINITY
        };
        let right = if self.end.x > self.top.x {
            self.end.y
        } else {
            f64::NEG_INFINITY
        };
        self.top.y - left.max(right)
    }

    pub fn width(&self) -> f64 {
        self.end.x - self.start.x
    }
}

/// Histogram of levels `start..start + len`
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    start: usize,
    values: Vec<f64>,
}

impl Spectrum {
    pub fn new(start: usize, values: Vec<f64>) -> Self {
        Self { start, values }
    }

    /// Count levels falling in `start..start + bins`
    pub fn from_levels(levels: impl IntoIterator<Item = u8>, start: usize, bins: usize) -> Self {
        let mut values = vec![0.0; bins];
        for level in levels {
            let level = level as usize;
            if level >= start && level < start + bins {
                values[level - start] += 1.0;
            }
        }
        Self { start, values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Centered moving average; the window shrinks at the ends
    pub fn smoothed(&self, window: usize) -> Spectrum {
        let half = window / 2;
        let n = self.values.len();
        let values = (0..n)
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(n);
                self.values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
            })
            .collect();
        Spectrum {
            start: self.start,
            values,
        }
    }

    fn point(&self, i: usize) -> SpectrumPoint {
        SpectrumPoint {
            x: (self.start + i) as f64,
            y: self.values[i],
        }
    }

    /// Local maxima found from the sign change of the first difference.
    ///
    /// A plateau top is reported once, at its first sample.
    pub fn find_peaks(&self) -> Vec<Peak> {
        let y = &self.values;
        let n = y.len();
        if n < 2 {
            return Vec::new();
        }

        let mut peaks = Vec::new();
        for i in 0..n {
            let rising = i == 0 || y[i] > y[i - 1];
            let not_rising_after = i == n - 1 || y[i] >= y[i + 1];
            let strict_edge = (i == 0 && y[0] > y[1]) || (i == n - 1 && y[n - 1] > y[n - 2]);
            let interior = i > 0 && i < n - 1;
            if !(rising && not_rising_after && (interior || strict_edge)) {
                continue;
            }

            let mut left = i;
            while left > 0 && y[left - 1] <= y[left] {
                left -= 1;
            }
            let mut right = i;
            while right + 1 < n && y[right + 1] <= y[right] {
                right += 1;
            }

            peaks.push(Peak {
                start: self.point(left),
                top: self.point(i),
                end: self.point(right),
            });
        }
        peaks
    }
}
