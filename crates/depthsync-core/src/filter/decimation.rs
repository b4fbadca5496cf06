use super::{Filter, for_each_depth, read_samples, write_samples};
use crate::frame::CompositeFrame;

/// Downsamples depth by an integer factor, taking the median of the
/// valid samples in each block.
#[derive(Debug, Clone)]
pub struct Decimation {
    magnitude: u32,
}

impl Default for Decimation {
    fn default() -> Self {
        Self { magnitude: 2 }
    }
}

impl Decimation {
    pub fn new(magnitude: u32) -> Self {
        Self {
            magnitude: magnitude.max(1),
        }
    }
}

impl Filter for Decimation {
    fn name(&self) -> &'static str {
        "decimation"
    }

    fn process(&mut self, mut frames: CompositeFrame) -> CompositeFrame {
        let m = self.magnitude as usize;

        for_each_depth(&mut frames, |frame| {
            let Some(samples) = read_samples(frame) else {
                return;
            };
            let (w, h) = (frame.width as usize, frame.height as usize);
            let (out_w, out_h) = (w / m, h / m);
            if out_w == 0 || out_h == 0 {
                return;
            }

            let mut out = Vec::with_capacity(out_w * out_h);
            let mut block = Vec::with_capacity(m * m);
            for by in 0..out_h {
                for bx in 0..out_w {
                    block.clear();
                    for y in by * m..(by + 1) * m {
                        let row = &samples[y * w + bx * m..y * w + (bx + 1) * m];
                        block.extend(row.iter().copied().filter(|&s| s > 0.0));
                    }
                    out.push(median(&mut block));
                }
            }

            frame.width = out_w as u32;
            frame.height = out_h as u32;
            frame.intrinsics = frame
                .intrinsics
                .map(|intr| intr.scaled(self.magnitude, out_w as u32, out_h as u32));
            write_samples(frame, &out);
        });

        frames
    }
}

/// Median of the values, averaging the middle pair. Zero when empty.
fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}
