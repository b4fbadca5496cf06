use super::{Filter, FilterContext, for_each_depth};
use crate::{frame::CompositeFrame, types::Format};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Z16 depth to float disparity.
    ToDisparity,
    /// Float disparity back to Z16 depth.
    ToDepth,
}

/// Swaps depth samples for disparity (`fx * baseline / depth`) or back.
///
/// Both directions use the full-resolution focal length of the session,
/// so the pair round-trips even when decimation runs in between.
#[derive(Debug, Clone)]
pub struct DisparityTransform {
    direction: Direction,
    /// `fx * baseline` in pixel-meters.
    factor: f32,
    depth_scale: f32,
}

impl DisparityTransform {
    pub fn new(direction: Direction, context: &FilterContext) -> Self {
        let fx = context.depth_intrinsics.map(|intr| intr.fx).unwrap_or(0.0);
        Self {
            direction,
            factor: fx * context.stereo_baseline,
            depth_scale: context.depth_scale,
        }
    }

    fn is_usable(&self) -> bool {
        self.factor > 0.0 && self.depth_scale > 0.0
    }

    /// Converts one sample. Zero stays zero in both directions.
    pub fn convert(&self, value: f32) -> f32 {
        if value <= 0.0 {
            return 0.0;
        }
        // The mapping is its own inverse up to the unit scale.
        self.factor / (value * self.depth_scale)
    }
}

impl Filter for DisparityTransform {
    fn name(&self) -> &'static str {
        match self.direction {
            Direction::ToDisparity => "disparity_start",
            Direction::ToDepth => "disparity_end",
        }
    }

    fn process(&mut self, mut frames: CompositeFrame) -> CompositeFrame {
        if !self.is_usable() {
            debug!(filter = self.name(), "missing calibration, frames pass through");
            return frames;
        }

        for_each_depth(&mut frames, |frame| match (self.direction, frame.format) {
            (Direction::ToDisparity, Format::Z16) => {
                if let Some(depth) = frame.depth_samples() {
                    let disparity: Vec<f32> =
                        depth.iter().map(|&d| self.convert(d as f32)).collect();
                    frame.set_disparity_samples(&disparity);
                }
            }
            (Direction::ToDepth, Format::Disparity32) => {
                if let Some(disparity) = frame.disparity_samples() {
                    let depth: Vec<u16> = disparity
                        .iter()
                        .map(|&d| self.convert(d).round().clamp(0.0, u16::MAX as f32) as u16)
                        .collect();
                    frame.set_depth_samples(&depth);
                }
            }
            _ => {}
        });

        frames
    }
}
