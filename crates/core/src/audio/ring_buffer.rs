use parking_lot::Mutex;

use crate::{Result, VizError};

/// Fixed-capacity circular store of the most recent samples.
///
/// Every operation takes the internal lock for the duration of the copy only.
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    buffer: Vec<f32>,
    write_index: usize,
    size: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(VizError::config("ring buffer capacity must be positive"));
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(Inner {
                buffer: vec![0.0; capacity],
                write_index: 0,
                size: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends samples. Only the last `capacity` samples of an oversized
    /// batch are kept.
    pub fn write(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let skip = samples.len().saturating_sub(self.capacity);
        let samples = &samples[skip..];

        let mut inner = self.inner.lock();
        for &sample in samples {
            let index = inner.write_index;
            inner.buffer[index] = sample;
            inner.write_index = (index + 1) % self.capacity;
        }
        inner.size = (inner.size + samples.len()).min(self.capacity);
    }

    /// The most recent `min(count, size)` samples, oldest first.
    pub fn latest(&self, count: usize) -> Vec<f32> {
        let inner = self.inner.lock();
        let length = count.min(inner.size);
        if length == 0 {
            return Vec::new();
        }

        let start = (inner.write_index + self.capacity - length) % self.capacity;
        if start + length <= self.capacity {
            inner.buffer[start..start + length].to_vec()
        } else {
            let mut out = Vec::with_capacity(length);
            out.extend_from_slice(&inner.buffer[start..]);
            out.extend_from_slice(&inner.buffer[..length - (self.capacity - start)]);
            out
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.fill(0.0);
        inner.write_index = 0;
        inner.size = 0;
    }
}
