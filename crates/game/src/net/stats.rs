use std::time::Duration;

/// Smoothing factor for the RTT moving estimate.
const RTT_SMOOTHING: f32 = 0.1;

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_rejected: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_rejected(&mut self) {
        self.packets_rejected += 1;
    }

    pub fn record_rtt(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f32() * 1000.0;
        if self.rtt_ms == 0.0 {
            self.rtt_ms = sample_ms;
            return;
        }
        let deviation = (sample_ms - self.rtt_ms).abs();
        self.rtt_variance += RTT_SMOOTHING * (deviation - self.rtt_variance);
        self.rtt_ms += RTT_SMOOTHING * (sample_ms - self.rtt_ms);
    }
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::Instant;

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(Instant::now().elapsed().as_nanos() as u64);
    hasher.finish()
}
