//! Selection of the sub-frames of a filtered composite frame that get
//! published.
//!
//! Only the first sub-frame of each stream key survives, and only the
//! first point set. A colorized depth image and the raw depth it was made
//! from share the depth key, so whichever comes first in chain order wins.

use crate::{
    frame::{CompositeFrame, PointSet, SubFrame, VideoFrame},
    types::{Format, StreamKey, StreamKind},
};
use indexmap::IndexSet;
use tracing::debug;

/// The outcome of selecting sub-frames for publication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOut {
    /// One frame per stream key, in chain output order.
    pub frames: Vec<VideoFrame>,
    /// The first point set, if any.
    pub points: Option<PointSet>,
    /// The last Z16 depth sub-frame seen, used for alignment.
    pub raw_depth: Option<VideoFrame>,
}

/// Splits a composite frame into the frames to publish.
///
/// `track_depth` records the raw depth frame for alignment.
pub fn select(frames: CompositeFrame, track_depth: bool) -> FanOut {
    let mut out = FanOut::default();
    let mut seen: IndexSet<StreamKey> = IndexSet::new();

    for sub in frames {
        match sub {
            SubFrame::Points(points) => {
                if out.points.is_none() {
                    out.points = Some(points);
                } else {
                    debug!(stream = %points.key, "drop a duplicated point set");
                }
            }
            SubFrame::Video(frame) => {
                if track_depth
                    && frame.key.kind == StreamKind::Depth
                    && frame.format == Format::Z16
                {
                    out.raw_depth = Some(frame.clone());
                }

                if seen.insert(frame.key) {
                    out.frames.push(frame);
                } else {
                    debug!(
                        stream = %frame.key,
                        format = %frame.format,
                        "drop a frame with a duplicated stream key"
                    );
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{COLOR, DEPTH};

    fn points(n: usize) -> PointSet {
        PointSet {
            key: DEPTH,
            vertices: vec![Default::default(); n],
            texture_coordinates: vec![Default::default(); n],
            timestamp_ms: 0.0,
            frame_number: 0,
        }
    }

    #[test]
    fn test_first_frame_per_key_wins() {
        let colored = VideoFrame::new(DEPTH, Format::Rgb8, 1, 1, vec![1, 2, 3]);
        let raw = VideoFrame::from_depth(DEPTH, 1, 1, &[1000]);
        let color = VideoFrame::new(COLOR, Format::Rgb8, 1, 1, vec![9, 9, 9]);

        let frames = CompositeFrame::from_video([colored.clone(), raw.clone(), color.clone()]);
        let out = select(frames, true);

        assert_eq!(out.frames, vec![colored, color]);
        assert_eq!(out.raw_depth, Some(raw));
    }

    #[test]
    fn test_only_first_point_set_kept() {
        let mut frames = CompositeFrame::from_video([VideoFrame::from_depth(DEPTH, 1, 1, &[1])]);
        frames.push(SubFrame::Points(points(2)));
        frames.push(SubFrame::Points(points(5)));

        let out = select(frames, false);
        assert_eq!(out.points.unwrap().len(), 2);
        assert_eq!(out.frames.len(), 1);
        assert!(out.raw_depth.is_none());
    }
}
