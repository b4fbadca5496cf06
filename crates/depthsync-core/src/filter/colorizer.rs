use super::{Filter, is_depth_like, read_samples};
use crate::{
    frame::{CompositeFrame, SubFrame, VideoFrame},
    types::Format,
};

/// Renders depth as an RGB8 image with a histogram-equalized jet color
/// map.
///
/// The rendering keeps the depth stream key and is inserted right before
/// the depth sub-frame it was made from.
#[derive(Debug, Clone, Copy, Default)]
pub struct Colorizer;

impl Colorizer {
    pub fn colorize(frame: &VideoFrame) -> Option<VideoFrame> {
        let samples = read_samples(frame)?;

        let mut valid: Vec<f32> = samples.iter().copied().filter(|&s| s > 0.0).collect();
        valid.sort_by(f32::total_cmp);
        let total = valid.len() as f32;

        let mut data = Vec::with_capacity(samples.len() * 3);
        for &s in &samples {
            if s <= 0.0 {
                data.extend_from_slice(&[0, 0, 0]);
                continue;
            }
            let rank = valid.partition_point(|&v| v <= s) as f32;
            data.extend_from_slice(&jet(rank / total));
        }

        Some(VideoFrame {
            format: Format::Rgb8,
            data,
            ..frame.clone()
        })
    }
}

impl Filter for Colorizer {
    fn name(&self) -> &'static str {
        "colorizer"
    }

    fn process(&mut self, mut frames: CompositeFrame) -> CompositeFrame {
        let found = frames.iter().enumerate().find_map(|(index, sub)| match sub {
            SubFrame::Video(frame) if is_depth_like(frame) => Some((index, frame)),
            _ => None,
        });

        if let Some((index, frame)) = found
            && let Some(colored) = Self::colorize(frame)
        {
            frames.insert(index, SubFrame::Video(colored));
        }

        frames
    }
}

/// Maps `t` in [0, 1] to the jet palette.
fn jet(t: f32) -> [u8; 3] {
    let channel = |center: f32| {
        let v = (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}
