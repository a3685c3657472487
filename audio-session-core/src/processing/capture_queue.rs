/// Bounded hand-off queue between the capture callback and the recording
/// session.
///
/// The hardware thread pushes converted mono samples; the designated
/// context drains them into the captured buffer. Wrap in
/// `Arc<parking_lot::Mutex<CaptureQueue>>` for cross-thread access.
///
/// Overflow behavior: drops the oldest samples and counts them, so a stalled
/// dispatcher shows up in the logs instead of growing memory without bound.
#[derive(Debug)]
pub struct CaptureQueue {
    buffer: Vec<f32>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
    dropped: u64,
}

impl CaptureQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0.0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
            dropped: 0,
        }
    }

    /// Append samples. If the queue overflows, the oldest samples go first.
    pub fn push(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let samples = if samples.len() > self.capacity {
            let skipped = samples.len() - self.capacity;
            self.dropped += skipped as u64;
            &samples[skipped..]
        } else {
            samples
        };

        let overflow = (self.available + samples.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
            self.dropped += overflow as u64;
        }

        for &sample in samples {
            self.buffer[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % self.capacity;
        }
        self.available += samples.len();
    }

    /// Remove and append everything queued to `out`. Returns the count moved.
    pub fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
        let count = self.available;
        out.reserve(count);
        for i in 0..count {
            out.push(self.buffer[(self.read_index + i) % self.capacity]);
        }
        self.read_index = (self.read_index + count) % self.capacity;
        self.available = 0;
        count
    }

    pub fn len(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Samples lost to overflow since the last reset.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
        self.dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut CaptureQueue) -> Vec<f32> {
        let mut out = Vec::new();
        queue.drain_into(&mut out);
        out
    }

    #[test]
    fn push_then_drain() {
        let mut queue = CaptureQueue::new(10);
        queue.push(&[1.0, 2.0, 3.0]);

        assert_eq!(queue.len(), 3);
        assert_eq!(drain(&mut queue), vec![1.0, 2.0, 3.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_appends_to_existing() {
        let mut queue = CaptureQueue::new(4);
        let mut out = vec![9.0];
        queue.push(&[1.0]);
        assert_eq!(queue.drain_into(&mut out), 1);
        assert_eq!(out, vec![9.0, 1.0]);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let mut queue = CaptureQueue::new(4);
        queue.push(&[1.0, 2.0, 3.0, 4.0]);
        queue.push(&[5.0, 6.0]);

        assert_eq!(queue.dropped(), 2);
        assert_eq!(drain(&mut queue), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn oversized_push_keeps_tail() {
        let mut queue = CaptureQueue::new(3);
        queue.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        assert_eq!(queue.dropped(), 2);
        assert_eq!(drain(&mut queue), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn wraparound() {
        let mut queue = CaptureQueue::new(4);
        queue.push(&[1.0, 2.0, 3.0]);
        drain(&mut queue);
        queue.push(&[4.0, 5.0, 6.0]);

        assert_eq!(drain(&mut queue), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn reset_clears_counters() {
        let mut queue = CaptureQueue::new(2);
        queue.push(&[1.0, 2.0, 3.0]);
        queue.reset();

        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 0);
        assert!(drain(&mut queue).is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut queue = CaptureQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(&[0.5]);
        assert_eq!(drain(&mut queue), vec![0.5]);
    }
}
