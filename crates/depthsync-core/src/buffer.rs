use crate::types::WithTimestamp;
use std::{collections::VecDeque, time::Duration};

/// A buffer to store a sequence of frames with monotonically
/// increasing timestamps.
#[derive(Debug)]
pub struct Buffer<T>
where
    T: WithTimestamp,
{
    buffer: VecDeque<T>,
    last_ts: Option<Duration>,
}

impl<T> Buffer<T>
where
    T: WithTimestamp,
{
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            last_ts: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn front(&self) -> Option<&T> {
        self.buffer.front()
    }

    pub fn back(&self) -> Option<&T> {
        self.buffer.back()
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.buffer.pop_front()
    }

    /// Try to push a frame into the buffer.
    ///
    /// If the timestamp on the frame is not above that of the
    /// previously inserted frame, the frame is handed back as an
    /// error. Otherwise it is stored.
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        let timestamp = item.timestamp();

        match self.last_ts {
            Some(last_ts) if last_ts >= timestamp => return Err(item),
            _ => {}
        }

        self.last_ts = Some(timestamp);
        self.buffer.push_back(item);
        Ok(())
    }
}
