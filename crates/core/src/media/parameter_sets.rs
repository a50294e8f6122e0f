//! Codec configuration (SPS/PPS) handed over by the encoder.
//!
//! DESCRIBE cannot be answered until both parameter sets are known, so the
//! store doubles as a "codec config ready" signal: [`ParameterSetStore::wait`]
//! blocks on a condition variable for at most a bounded timeout.

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::{BASE64_STANDARD, Engine as _};
use parking_lot::{Condvar, Mutex};

use super::h264::{NAL_TYPE_PPS, NAL_TYPE_SPS, nal_type};

/// A complete H.264 SPS/PPS pair, without start codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl ParameterSets {
    /// `profile-level-id` from SPS bytes 1..=3 (RFC 6184 §8.1):
    /// profile_idc, constraint flags, level_idc.
    pub fn profile_level_id(&self) -> Option<String> {
        if self.sps.len() < 4 {
            return None;
        }
        Some(format!(
            "{:02x}{:02x}{:02x}",
            self.sps[1], self.sps[2], self.sps[3]
        ))
    }

    /// `sprop-parameter-sets` value: base64 SPS and PPS, comma separated.
    pub fn sprop_parameter_sets(&self) -> String {
        format!(
            "{},{}",
            BASE64_STANDARD.encode(&self.sps),
            BASE64_STANDARD.encode(&self.pps)
        )
    }
}

#[derive(Debug, Default)]
struct Pending {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl Pending {
    fn complete(&self) -> Option<ParameterSets> {
        match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) => Some(ParameterSets {
                sps: sps.clone(),
                pps: pps.clone(),
            }),
            _ => None,
        }
    }
}

/// Shared, waitable holder for the encoder's parameter sets.
#[derive(Debug, Clone, Default)]
pub struct ParameterSetStore {
    inner: Arc<(Mutex<Pending>, Condvar)>,
}

impl ParameterSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a full SPS/PPS pair, replacing any previous one.
    pub fn publish(&self, sps: &[u8], pps: &[u8]) {
        let (lock, ready) = &*self.inner;
        let mut pending = lock.lock();
        pending.sps = Some(sps.to_vec());
        pending.pps = Some(pps.to_vec());
        tracing::debug!(sps_len = sps.len(), pps_len = pps.len(), "parameter sets published");
        ready.notify_all();
    }

    /// Capture an SPS or PPS seen in the NAL stream.
    ///
    /// Returns `true` when the NAL unit was a parameter set. Identical
    /// repeats (sent with every keyframe) do not wake waiters again.
    pub fn observe(&self, nal: &[u8]) -> bool {
        let slot_is_sps = match nal_type(nal) {
            Some(NAL_TYPE_SPS) => true,
            Some(NAL_TYPE_PPS) => false,
            _ => return false,
        };

        let (lock, ready) = &*self.inner;
        let mut pending = lock.lock();
        let slot = if slot_is_sps {
            &mut pending.sps
        } else {
            &mut pending.pps
        };
        if slot.as_deref() != Some(nal) {
            *slot = Some(nal.to_vec());
            tracing::debug!(
                kind = if slot_is_sps { "SPS" } else { "PPS" },
                len = nal.len(),
                "parameter set captured from bitstream"
            );
            if pending.complete().is_some() {
                ready.notify_all();
            }
        }
        true
    }

    /// Current parameter sets, if both are known.
    pub fn get(&self) -> Option<ParameterSets> {
        self.inner.0.lock().complete()
    }

    /// Wait up to `timeout` for both parameter sets to be known.
    pub fn wait(&self, timeout: Duration) -> Option<ParameterSets> {
        let (lock, ready) = &*self.inner;
        let mut pending = lock.lock();
        if pending.complete().is_none() {
            ready.wait_while_for(&mut pending, |p| p.complete().is_none(), timeout);
        }
        pending.complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    const SPS: [u8; 4] = [0x67, 0x42, 0x00, 0x1e];
    const PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];

    #[test]
    fn profile_level_id_from_sps() {
        let sets = ParameterSets {
            sps: SPS.to_vec(),
            pps: PPS.to_vec(),
        };
        assert_eq!(sets.profile_level_id().as_deref(), Some("42001e"));
        assert_eq!(sets.sprop_parameter_sets(), "Z0IAHg==,aM44gA==");
    }

    #[test]
    fn short_sps_has_no_profile() {
        let sets = ParameterSets {
            sps: vec![0x67, 0x42],
            pps: PPS.to_vec(),
        };
        assert!(sets.profile_level_id().is_none());
    }

    #[test]
    fn observe_needs_both_sets() {
        let store = ParameterSetStore::new();
        assert!(store.observe(&SPS));
        assert!(store.get().is_none());
        assert!(!store.observe(&[0x65, 0x88]));
        assert!(store.observe(&PPS));
        let sets = store.get().unwrap();
        assert_eq!(sets.sps, SPS);
        assert_eq!(sets.pps, PPS);
    }

    #[test]
    fn wait_times_out_without_config() {
        let store = ParameterSetStore::new();
        let start = Instant::now();
        assert!(store.wait(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wait_wakes_on_publish() {
        let store = ParameterSetStore::new();
        let publisher = store.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.publish(&SPS, &PPS);
        });
        let sets = store.wait(Duration::from_secs(5));
        handle.join().unwrap();
        assert!(sets.is_some());
    }
}
