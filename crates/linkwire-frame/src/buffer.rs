//! Receive buffer that grows by doubling and shrinks back after sustained
//! low usage.

use tracing::debug;

use crate::codec::{HEADER_SIZE, MAX_FRAME_SIZE};

const DEFAULT_FLOOR: usize = 8 * 1024;
const DEFAULT_SHRINK_WINDOW: u32 = 16;
const DEFAULT_SHRINK_THRESHOLD: f64 = 0.25;

/// Sizing policy for [`AdaptiveBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    /// Capacity never drops below this. Default: 8 KiB.
    pub floor: usize,
    /// Doubling stops here. Default: max frame + header.
    pub max_capacity: usize,
    /// Consecutive low-usage cycles before shrinking. Default: 16.
    pub shrink_window: u32,
    /// Usage below `capacity * shrink_threshold` counts as low. Default: 0.25.
    pub shrink_threshold: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FLOOR,
            max_capacity: MAX_FRAME_SIZE + HEADER_SIZE,
            shrink_window: DEFAULT_SHRINK_WINDOW,
            shrink_threshold: DEFAULT_SHRINK_THRESHOLD,
        }
    }
}

/// Contiguous byte buffer with a read cursor and a write cursor.
///
/// `read_pos <= write_pos <= capacity` always holds. The high-water mark is
/// the largest number of unread bytes seen since the last [`end_cycle`].
///
/// [`end_cycle`]: AdaptiveBuffer::end_cycle
#[derive(Debug)]
pub struct AdaptiveBuffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    high_water: usize,
    low_cycles: u32,
    config: BufferConfig,
}

impl AdaptiveBuffer {
    pub fn new(config: BufferConfig) -> Self {
        let floor = config.floor.max(1);
        Self {
            data: vec![0; floor],
            read_pos: 0,
            write_pos: 0,
            high_water: 0,
            low_cycles: 0,
            config: BufferConfig { floor, ..config },
        }
    }

    /// Unread bytes.
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// The unread bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Append bytes, compacting and then doubling capacity as needed.
    ///
    /// Doubling is capped at `max_capacity`; a single append larger than
    /// that grows to exactly what is required.
    pub fn extend_from_slice(&mut self, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        if self.write_pos + src.len() > self.capacity() {
            self.compact();
        }
        let needed = self.len() + src.len();
        if needed > self.capacity() {
            self.grow(needed);
        }

        self.data[self.write_pos..self.write_pos + src.len()].copy_from_slice(src);
        self.write_pos += src.len();
        self.high_water = self.high_water.max(self.len());
    }

    /// Mark `n` unread bytes as consumed.
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.len());
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Drop all unread bytes and return to the floor capacity.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.high_water = 0;
        self.low_cycles = 0;
        self.data.truncate(self.config.floor);
        self.data.shrink_to_fit();
    }

    /// Close one feed cycle and apply the shrink policy.
    ///
    /// A cycle whose high-water mark stayed under the threshold counts as
    /// low; after `shrink_window` consecutive low cycles capacity returns to
    /// `max(floor, len)`.
    pub fn end_cycle(&mut self) {
        let capacity = self.capacity();
        let low_mark = capacity as f64 * self.config.shrink_threshold;
        if capacity > self.config.floor && (self.high_water as f64) < low_mark {
            self.low_cycles += 1;
            if self.low_cycles >= self.config.shrink_window {
                self.shrink();
            }
        } else {
            self.low_cycles = 0;
        }
        self.high_water = self.len();
    }

    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    fn grow(&mut self, needed: usize) {
        let mut new_cap = self.capacity().max(1);
        while new_cap < needed {
            if new_cap >= self.config.max_capacity {
                new_cap = needed;
                break;
            }
            new_cap = new_cap.saturating_mul(2).min(self.config.max_capacity);
        }
        debug!(from = self.capacity(), to = new_cap, "growing receive buffer");
        self.compact();
        self.data.resize(new_cap, 0);
    }

    fn shrink(&mut self) {
        let target = self.config.floor.max(self.len());
        self.low_cycles = 0;
        if target >= self.capacity() {
            return;
        }
        debug!(from = self.capacity(), to = target, "shrinking receive buffer");
        self.compact();
        self.data.truncate(target);
        self.data.shrink_to_fit();
    }
}

impl Default for AdaptiveBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_floor() {
        let buf = AdaptiveBuffer::default();
        assert_eq!(buf.capacity(), 8 * 1024);
        assert!(buf.is_empty());
    }

    #[test]
    fn grows_by_doubling() {
        let mut buf = AdaptiveBuffer::default();
        buf.extend_from_slice(&vec![1u8; 20_000]);
        assert_eq!(buf.capacity(), 32 * 1024);
        assert_eq!(buf.len(), 20_000);
        assert_eq!(buf.high_water_mark(), 20_000);
    }

    #[test]
    fn doubling_is_capped() {
        let config = BufferConfig {
            floor: 16,
            max_capacity: 100,
            ..BufferConfig::default()
        };
        let mut buf = AdaptiveBuffer::new(config);
        buf.extend_from_slice(&[0u8; 70]);
        assert_eq!(buf.capacity(), 100);

        buf.extend_from_slice(&[0u8; 50]);
        assert_eq!(buf.capacity(), 120);
    }

    #[test]
    fn consumed_space_is_reused_before_growing() {
        let config = BufferConfig {
            floor: 16,
            ..BufferConfig::default()
        };
        let mut buf = AdaptiveBuffer::new(config);
        buf.extend_from_slice(&[1u8; 12]);
        buf.consume(10);
        buf.extend_from_slice(&[2u8; 12]);

        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.as_slice()[..2], [1, 1]);
        assert_eq!(buf.len(), 14);
        assert!(buf.write_position() <= buf.capacity());
    }

    #[test]
    fn shrinks_after_sustained_low_usage() {
        let mut buf = AdaptiveBuffer::default();
        buf.extend_from_slice(&vec![0u8; 20_000]);
        buf.consume(20_000);
        buf.end_cycle();
        assert_eq!(buf.capacity(), 32 * 1024);

        for _ in 0..15 {
            buf.extend_from_slice(&[0u8; 100]);
            buf.consume(100);
            buf.end_cycle();
        }
        assert_eq!(buf.capacity(), 32 * 1024);

        buf.end_cycle();
        assert_eq!(buf.capacity(), 8 * 1024);
    }

    #[test]
    fn one_busy_cycle_restarts_the_window() {
        let mut buf = AdaptiveBuffer::default();
        buf.extend_from_slice(&vec![0u8; 20_000]);
        buf.consume(20_000);
        buf.end_cycle();

        for _ in 0..10 {
            buf.end_cycle();
        }
        buf.extend_from_slice(&vec![0u8; 16_000]);
        buf.consume(16_000);
        buf.end_cycle();
        for _ in 0..15 {
            buf.end_cycle();
        }
        assert_eq!(buf.capacity(), 32 * 1024);
    }

    #[test]
    fn never_shrinks_below_floor_or_live_bytes() {
        let config = BufferConfig {
            floor: 64,
            shrink_window: 1,
            ..BufferConfig::default()
        };
        let mut buf = AdaptiveBuffer::new(config);
        buf.extend_from_slice(&[7u8; 1000]);
        buf.consume(990);
        buf.end_cycle();
        buf.end_cycle();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.as_slice(), &[7u8; 10]);
    }
}
