//! Ordered post-processing of composite frames.
//!
//! A chain is built from a comma-separated list of filter names. The
//! disparity transform brackets every other filter: its forward half
//! always runs first and its inverse always runs last. Spatial, temporal
//! and decimation run in the order they are named, followed by the
//! colorizer and then the point cloud generator.

mod colorizer;
mod decimation;
mod disparity;
mod pointcloud;
mod spatial;
mod temporal;

pub use colorizer::Colorizer;
pub use decimation::Decimation;
pub use disparity::{DisparityTransform, Direction};
pub use pointcloud::PointCloudGenerator;
pub use spatial::SpatialFilter;
pub use temporal::TemporalFilter;

use crate::{
    calibration::Intrinsics,
    extrinsics::Extrinsics,
    frame::{CompositeFrame, SubFrame, VideoFrame},
    types::{Format, StreamKey, StreamKind},
};
use eyre::{Result, bail};
use std::fmt;
use tracing::{debug, info};

/// A transform applied to every composite frame.
pub trait Filter: Send {
    fn name(&self) -> &'static str;

    /// Consumes a composite frame and returns the transformed one.
    fn process(&mut self, frames: CompositeFrame) -> CompositeFrame;
}

/// The kinds of filters a chain can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    DisparityStart,
    Spatial,
    Temporal,
    Decimation,
    Colorizer,
    PointCloud,
    DisparityEnd,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::DisparityStart => "disparity_start",
            FilterKind::Spatial => "spatial",
            FilterKind::Temporal => "temporal",
            FilterKind::Decimation => "decimation",
            FilterKind::Colorizer => "colorizer",
            FilterKind::PointCloud => "pointcloud",
            FilterKind::DisparityEnd => "disparity_end",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a filter list into the order the chain runs filters in.
///
/// Empty names are ignored. An unknown name is an error. The point
/// cloud generator is added when `pointcloud` is set even if the list
/// does not name it.
pub fn parse_filters(list: &str, mut pointcloud: bool) -> Result<Vec<FilterKind>> {
    let mut disparity = false;
    let mut colorizer = false;
    let mut kinds = vec![];

    for name in list.split(',').map(str::trim) {
        match name {
            "" => {}
            "disparity" => disparity = true,
            "colorizer" => colorizer = true,
            "pointcloud" => pointcloud = true,
            "spatial" => kinds.push(FilterKind::Spatial),
            "temporal" => kinds.push(FilterKind::Temporal),
            "decimation" => kinds.push(FilterKind::Decimation),
            unknown => bail!("Unknown filter: {unknown}"),
        }
    }

    if disparity {
        kinds.insert(0, FilterKind::DisparityStart);
    }
    if colorizer {
        kinds.push(FilterKind::Colorizer);
    }
    if pointcloud {
        kinds.push(FilterKind::PointCloud);
    }
    if disparity {
        kinds.push(FilterKind::DisparityEnd);
    }

    Ok(kinds)
}

/// Texture stream the point cloud generator maps vertices into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureTarget {
    pub key: StreamKey,
    pub intrinsics: Intrinsics,
    /// Transform from the depth frame into the texture frame.
    pub depth_to_texture: Extrinsics,
}

/// Session calibration the filters depend on.
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    /// Meters per depth unit.
    pub depth_scale: f32,
    /// Distance between the stereo imagers in meters.
    pub stereo_baseline: f32,
    pub depth_intrinsics: Option<Intrinsics>,
    pub texture: Option<TextureTarget>,
}

/// An ordered list of filters.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FilterChain {
    pub fn empty() -> Self {
        Self { filters: vec![] }
    }

    /// Builds the chain named by `list`.
    pub fn build(list: &str, pointcloud: bool, context: &FilterContext) -> Result<Self> {
        let kinds = parse_filters(list, pointcloud)?;
        Ok(Self::from_kinds(&kinds, context))
    }

    pub fn from_kinds(kinds: &[FilterKind], context: &FilterContext) -> Self {
        let filters: Vec<Box<dyn Filter>> = kinds
            .iter()
            .map(|kind| {
                info!(filter = %kind, "Add Filter");
                let filter: Box<dyn Filter> = match kind {
                    FilterKind::DisparityStart => {
                        Box::new(DisparityTransform::new(Direction::ToDisparity, context))
                    }
                    FilterKind::DisparityEnd => {
                        Box::new(DisparityTransform::new(Direction::ToDepth, context))
                    }
                    FilterKind::Spatial => Box::new(SpatialFilter::default()),
                    FilterKind::Temporal => Box::new(TemporalFilter::default()),
                    FilterKind::Decimation => Box::new(Decimation::default()),
                    FilterKind::Colorizer => Box::new(Colorizer),
                    FilterKind::PointCloud => Box::new(PointCloudGenerator::new(context)),
                };
                filter
            })
            .collect();

        info!(num_filters = filters.len(), "filter chain built");
        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|filter| filter.name()).collect()
    }

    /// Runs every filter in order, each consuming the previous output.
    pub fn apply(&mut self, mut frames: CompositeFrame) -> CompositeFrame {
        for filter in &mut self.filters {
            debug!(filter = filter.name(), "Applying filter");
            frames = filter.process(frames);
        }
        frames
    }
}

/// Checks if a sub-frame holds depth or disparity samples.
pub(crate) fn is_depth_like(frame: &VideoFrame) -> bool {
    frame.key.kind == StreamKind::Depth && matches!(frame.format, Format::Z16 | Format::Disparity32)
}

/// Reads depth or disparity samples as floats. Zero marks a hole.
pub(crate) fn read_samples(frame: &VideoFrame) -> Option<Vec<f32>> {
    match frame.format {
        Format::Z16 => Some(frame.depth_samples()?.into_iter().map(f32::from).collect()),
        Format::Disparity32 => frame.disparity_samples(),
        _ => None,
    }
}

/// Writes samples back in the frame's current format.
pub(crate) fn write_samples(frame: &mut VideoFrame, samples: &[f32]) {
    match frame.format {
        Format::Z16 => {
            let depth: Vec<u16> = samples
                .iter()
                .map(|&s| s.round().clamp(0.0, u16::MAX as f32) as u16)
                .collect();
            frame.set_depth_samples(&depth);
        }
        Format::Disparity32 => frame.set_disparity_samples(samples),
        _ => {}
    }
}

/// Applies `f` to every depth-like video sub-frame.
pub(crate) fn for_each_depth<F>(frames: &mut CompositeFrame, mut f: F)
where
    F: FnMut(&mut VideoFrame),
{
    for sub in frames.iter_mut() {
        if let SubFrame::Video(frame) = sub
            && is_depth_like(frame)
        {
            f(frame);
        }
    }
}
