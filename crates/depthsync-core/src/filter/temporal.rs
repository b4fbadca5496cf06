use super::{Filter, for_each_depth, read_samples, write_samples};
use crate::{frame::CompositeFrame, types::Format};

/// Per-pixel exponential smoothing against the previous frame.
#[derive(Debug, Clone)]
pub struct TemporalFilter {
    pub alpha: f32,
    pub delta: f32,
    history: Option<History>,
}

#[derive(Debug, Clone)]
struct History {
    width: u32,
    height: u32,
    format: Format,
    samples: Vec<f32>,
}

impl Default for TemporalFilter {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            delta: 20.0,
            history: None,
        }
    }
}

impl Filter for TemporalFilter {
    fn name(&self) -> &'static str {
        "temporal"
    }

    fn process(&mut self, mut frames: CompositeFrame) -> CompositeFrame {
        let (alpha, delta) = (self.alpha, self.delta);
        let history = &mut self.history;

        for_each_depth(&mut frames, |frame| {
            let Some(mut samples) = read_samples(frame) else {
                return;
            };

            match history {
                Some(prev)
                    if prev.width == frame.width
                        && prev.height == frame.height
                        && prev.format == frame.format =>
                {
                    for (cur, last) in samples.iter_mut().zip(prev.samples.iter()) {
                        if *cur > 0.0 && *last > 0.0 && (*cur - *last).abs() < delta {
                            *cur = alpha * *cur + (1.0 - alpha) * *last;
                        }
                    }
                    write_samples(frame, &samples);
                }
                _ => {}
            }

            *history = Some(History {
                width: frame.width,
                height: frame.height,
                format: frame.format,
                samples,
            });
        });

        frames
    }
}
