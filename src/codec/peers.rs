//! Per-peer decoder registry
//!
//! Decoders are created on a peer's first packet and kept until the peer is
//! removed. Each decoder sits behind its own lock: different peers decode in
//! parallel, calls for the same peer are serialized.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::decoder::SpeechDecoder;
use crate::error::CodecError;

/// Identity of a remote speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

impl From<u32> for PeerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

type SharedDecoder = Arc<Mutex<SpeechDecoder>>;

/// Lazily populated map of peer decoders
pub struct PeerDecoders {
    decoders: DashMap<PeerId, SharedDecoder>,
    sample_rate: u32,
    frame_count: usize,
}

impl PeerDecoders {
    pub fn new(sample_rate: u32, frame_count: usize) -> Self {
        Self {
            decoders: DashMap::new(),
            sample_rate,
            frame_count,
        }
    }

    /// Run `f` with exclusive access to `peer`'s decoder, creating it if needed
    pub fn with_decoder<R>(
        &self,
        peer: PeerId,
        f: impl FnOnce(&mut SpeechDecoder) -> R,
    ) -> Result<R, CodecError> {
        let decoder = self.get_or_create(peer)?;
        let mut decoder = decoder.lock();
        Ok(f(&mut decoder))
    }

    fn get_or_create(&self, peer: PeerId) -> Result<SharedDecoder, CodecError> {
        // The shard guard must be released before `entry` takes it again
        let existing = self.decoders.get(&peer).map(|d| d.value().clone());
        if let Some(decoder) = existing {
            return Ok(decoder);
        }

        let created = Arc::new(Mutex::new(SpeechDecoder::new(
            self.sample_rate,
            self.frame_count,
        )?));
        let decoder = self.decoders.entry(peer).or_insert(created).value().clone();
        tracing::debug!("Created decoder for {}", peer);
        Ok(decoder)
    }

    /// Forget a peer and its codec state
    pub fn remove_peer(&self, peer: PeerId) -> bool {
        let removed = self.decoders.remove(&peer).is_some();
        if removed {
            tracing::debug!("Removed decoder for {}", peer);
        }
        removed
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.decoders.contains_key(&peer)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.decoders.iter().map(|e| *e.key()).collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn clear(&self) {
        self.decoders.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_lazy_creation_and_removal() {
        let peers = PeerDecoders::new(48000, 480);
        assert!(peers.is_empty());

        peers.with_decoder(PeerId(7), |_| ()).unwrap();
        peers.with_decoder(PeerId(3), |_| ()).unwrap();
        peers.with_decoder(PeerId(7), |_| ()).unwrap();
        assert_eq!(peers.peers(), vec![PeerId(3), PeerId(7)]);

        assert!(peers.remove_peer(PeerId(7)));
        assert!(!peers.remove_peer(PeerId(7)));
        assert!(!peers.contains(PeerId(7)));
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_state_is_per_peer() {
        let peers = PeerDecoders::new(48000, 480);
        peers
            .with_decoder(PeerId(1), |d| d.conceal().map(|_| ()))
            .unwrap()
            .unwrap();

        let lost = peers.with_decoder(PeerId(2), |d| d.stats().frames_lost).unwrap();
        assert_eq!(lost, 0);
        let lost = peers.with_decoder(PeerId(1), |d| d.stats().frames_lost).unwrap();
        assert_eq!(lost, 1);
    }

    #[test]
    fn test_concurrent_peers() {
        let peers = Arc::new(PeerDecoders::new(48000, 480));
        let handles: Vec<_> = (0..4u32)
            .map(|id| {
                let peers = peers.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        peers
                            .with_decoder(PeerId(id), |d| d.conceal().map(|_| ()))
                            .unwrap()
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peers.len(), 4);
        for id in 0..4 {
            let lost = peers.with_decoder(PeerId(id), |d| d.stats().frames_lost).unwrap();
            assert_eq!(lost, 10);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(PeerId::from(9).to_string(), "peer-9");
    }
}
