//! Bounded pool of pre-allocated episode slots.
//!
//! The environment loop and the network sender run at different cadences;
//! this queue sits between them without allocating on the hot path. All
//! slots are allocated up front at their maximal shape; ownership of a
//! slot moves between the producer and the consumer as a bare index over
//! two channels (free list and filled list), so a slot is never visible
//! to both sides at once.
use crossbeam_channel::{bounded, Receiver, Sender};
use sacd_core::{CoreError, Episode, NdArray};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// The queue had no free slot; the producer drops the episode.
#[derive(Debug, Error)]
#[error("Episode queue is full")]
pub struct QueueFull;

struct Slot {
    episode: Episode,
    steps: usize,
    // optional columns the current occupant actually carries; a reused
    // slot must not leak the previous occupant's values
    has_mu_probs: bool,
    has_rnn_states: bool,
}

/// Fixed-capacity episode hand-off queue.
pub struct EpisodeQueue {
    slots: Vec<Mutex<Slot>>,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
    filled_tx: Sender<usize>,
    filled_rx: Receiver<usize>,
}

impl EpisodeQueue {
    /// Allocates `n_slots` slots shaped for episodes of up to `max_steps`
    /// steps.
    pub fn new(
        n_slots: usize,
        obs_shapes: &[Vec<usize>],
        action_dim: usize,
        rnn_dim: Option<usize>,
        max_steps: usize,
    ) -> Self {
        let slots = (0..n_slots)
            .map(|_| {
                Mutex::new(Slot {
                    episode: Episode::zeroed(obs_shapes, action_dim, rnn_dim, max_steps),
                    steps: 0,
                    has_mu_probs: false,
                    has_rnn_states: false,
                })
            })
            .collect();
        let (free_tx, free_rx) = bounded(n_slots);
        let (filled_tx, filled_rx) = bounded(n_slots);
        for i in 0..n_slots {
            free_tx.send(i).unwrap();
        }
        Self {
            slots,
            free_tx,
            free_rx,
            filled_tx,
            filled_rx,
        }
    }

    /// Copies `episode` into a free slot and queues it for the consumer.
    ///
    /// Non-blocking: with no free slot the episode is rejected and the
    /// caller counts/logs the drop.
    pub fn put(&self, episode: &Episode) -> Result<(), QueueFull> {
        let ix = self.free_rx.try_recv().map_err(|_| QueueFull)?;
        {
            let mut slot = self.slots[ix].lock().unwrap();
            if let Err(e) = copy_into_slot(&mut slot, episode) {
                // shape mismatch means the queue was built for a different
                // environment; hand the slot back and drop the episode
                log::error!("Rejecting episode: {}", e);
                let _ = self.free_tx.send(ix);
                return Err(QueueFull);
            }
        }
        // the channel holds capacity for every slot index
        self.filled_tx.send(ix).unwrap();
        Ok(())
    }

    /// Waits up to `timeout` for a filled slot.
    ///
    /// `None` on timeout, so consumers can re-check shutdown flags.
    pub fn get(&self, timeout: Duration) -> Option<usize> {
        self.filled_rx.recv_timeout(timeout).ok()
    }

    /// Snapshots the live prefix of a filled slot as an owned episode.
    pub fn episode(&self, slot: usize) -> Episode {
        let slot = self.slots[slot].lock().unwrap();
        let mut episode = slot.episode.slice_steps(slot.steps);
        if !slot.has_mu_probs {
            episode.mu_probs = NdArray::empty();
        }
        if !slot.has_rnn_states {
            episode.rnn_states = NdArray::empty();
        }
        episode
    }

    /// Returns a consumed slot to the free pool.
    pub fn release(&self, slot: usize) {
        let _ = self.free_tx.send(slot);
    }

    /// Number of currently free slots; a persistently shrinking level
    /// means a consumer is leaking slots.
    pub fn free_slots(&self) -> usize {
        self.free_rx.len()
    }
}

fn copy_into_slot(slot: &mut Slot, episode: &Episode) -> Result<(), CoreError> {
    if slot.episode.obses.len() != episode.obses.len() {
        return Err(CoreError::ShapeMismatch(format!(
            "expected {} observation branches, got {}",
            slot.episode.obses.len(),
            episode.obses.len()
        )));
    }
    for (dst, src) in slot.episode.obses.iter_mut().zip(&episode.obses) {
        dst.copy_rows_from(src)?;
    }
    slot.episode.actions.copy_rows_from(&episode.actions)?;
    slot.episode.rewards.copy_rows_from(&episode.rewards)?;
    slot.episode.dones.copy_rows_from(&episode.dones)?;
    if !episode.mu_probs.is_empty() {
        slot.episode.mu_probs.copy_rows_from(&episode.mu_probs)?;
    }
    if !episode.rnn_states.is_empty() {
        slot.episode.rnn_states.copy_rows_from(&episode.rnn_states)?;
    }
    slot.has_mu_probs = !episode.mu_probs.is_empty();
    slot.has_rnn_states = !episode.rnn_states.is_empty();
    slot.steps = episode.steps();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sacd_core::{EpisodeBuilder, NdArray};
    use std::sync::Arc;
    use std::thread;

    fn episode(steps: usize, tag: f32) -> Episode {
        let mut b = EpisodeBuilder::new();
        for i in 0..steps {
            b.push_step(
                vec![NdArray::from_f32(&[2], &[tag, i as f32])],
                NdArray::from_f32(&[1], &[0.]),
                tag,
                i == steps - 1,
                NdArray::empty(),
            );
        }
        b.finish(vec![NdArray::from_f32(&[2], &[tag, -1.])]).unwrap()
    }

    fn queue(n_slots: usize) -> EpisodeQueue {
        EpisodeQueue::new(n_slots, &[vec![2]], 1, None, 16)
    }

    #[test]
    fn test_put_get_release() {
        let q = queue(2);
        q.put(&episode(5, 7.)).unwrap();
        assert_eq!(q.free_slots(), 1);

        let slot = q.get(Duration::from_millis(10)).unwrap();
        let ep = q.episode(slot);
        q.release(slot);

        assert_eq!(ep.steps(), 5);
        assert_eq!(ep.rewards.to_f32().unwrap(), vec![7.; 5]);
        assert_eq!(q.free_slots(), 2);
    }

    #[test]
    fn test_full_queue_rejects() {
        let q = queue(1);
        q.put(&episode(3, 0.)).unwrap();
        assert!(q.put(&episode(3, 1.)).is_err());

        let slot = q.get(Duration::from_millis(10)).unwrap();
        q.release(slot);
        q.put(&episode(3, 2.)).unwrap();
    }

    #[test]
    fn test_reused_slot_drops_stale_optional_columns() {
        let q = queue(1);

        let mut stamped = episode(3, 1.);
        stamped.mu_probs = NdArray::from_f32(&[3, 1], &[0.7; 3]);
        q.put(&stamped).unwrap();
        let slot = q.get(Duration::from_millis(10)).unwrap();
        assert_eq!(q.episode(slot).mu_probs.to_f32().unwrap(), vec![0.7; 3]);
        q.release(slot);

        // the next occupant carries no mu_probs; the previous one's must
        // not leak out of the reused slot
        q.put(&episode(3, 2.)).unwrap();
        let slot = q.get(Duration::from_millis(10)).unwrap();
        let ep = q.episode(slot);
        q.release(slot);
        assert!(ep.mu_probs.is_empty());
        assert!(ep.rnn_states.is_empty());
    }

    #[test]
    fn test_get_times_out_when_empty() {
        let q = queue(1);
        assert!(q.get(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_slot_exclusivity_under_stress() {
        let q = Arc::new(queue(4));
        let n_episodes = 200;

        let consumer = {
            let q = q.clone();
            thread::spawn(move || {
                let mut tags = vec![];
                while tags.len() < n_episodes {
                    if let Some(slot) = q.get(Duration::from_millis(200)) {
                        let ep = q.episode(slot);
                        q.release(slot);
                        let rewards = ep.rewards.to_f32().unwrap();
                        // every row of a slot snapshot must carry the same
                        // tag; a mixed episode means two owners raced
                        assert!(rewards.iter().all(|r| *r == rewards[0]));
                        assert_eq!(ep.steps(), 5);
                        tags.push(rewards[0]);
                    } else {
                        break;
                    }
                }
                tags
            })
        };

        let mut produced = 0;
        let mut tag = 0.;
        while produced < n_episodes {
            if q.put(&episode(5, tag)).is_ok() {
                produced += 1;
                tag += 1.;
                // jitter the producer cadence relative to the consumer
                if fastrand::bool() {
                    thread::yield_now();
                }
            } else {
                thread::yield_now();
            }
        }

        let tags = consumer.join().unwrap();
        assert_eq!(tags.len(), n_episodes);
        assert_eq!(q.free_slots(), 4);
    }
}
