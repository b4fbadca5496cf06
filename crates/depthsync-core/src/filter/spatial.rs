use super::{Filter, for_each_depth, read_samples, write_samples};
use crate::frame::CompositeFrame;

/// Edge-preserving recursive smoothing.
///
/// Each pass walks rows (then columns) forward and backward, blending a
/// sample with its already filtered neighbour when both are valid and
/// closer than `delta`. Holes are neither filled nor used.
#[derive(Debug, Clone)]
pub struct SpatialFilter {
    pub alpha: f32,
    pub delta: f32,
    pub iterations: usize,
}

impl Default for SpatialFilter {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            delta: 20.0,
            iterations: 2,
        }
    }
}

impl SpatialFilter {
    fn smooth(&self, samples: &mut [f32], width: usize, height: usize) {
        for _ in 0..self.iterations {
            for y in 0..height {
                let row: Vec<usize> = (0..width).map(|x| y * width + x).collect();
                self.sweep(samples, row.iter().copied());
                self.sweep(samples, row.iter().rev().copied());
            }
            for x in 0..width {
                let column: Vec<usize> = (0..height).map(|y| y * width + x).collect();
                self.sweep(samples, column.iter().copied());
                self.sweep(samples, column.iter().rev().copied());
            }
        }
    }

    fn sweep<I>(&self, samples: &mut [f32], indices: I)
    where
        I: Iterator<Item = usize>,
    {
        let mut prev: Option<f32> = None;
        for i in indices {
            let cur = samples[i];
            if cur <= 0.0 {
                prev = None;
                continue;
            }
            if let Some(p) = prev
                && (cur - p).abs() < self.delta
            {
                samples[i] = self.alpha * cur + (1.0 - self.alpha) * p;
            }
            prev = Some(samples[i]);
        }
    }
}

impl Filter for SpatialFilter {
    fn name(&self) -> &'static str {
        "spatial"
    }

    fn process(&mut self, mut frames: CompositeFrame) -> CompositeFrame {
        for_each_depth(&mut frames, |frame| {
            let Some(mut samples) = read_samples(frame) else {
                return;
            };
            self.smooth(&mut samples, frame.width as usize, frame.height as usize);
            write_samples(frame, &samples);
        });
        frames
    }
}
