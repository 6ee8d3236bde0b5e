//! Collective communication used by the load sampler.
//!
//! The balancer needs exactly one collective: an element-wise global sum of
//! per-rank counts. [`SerialCommunicator`] covers the single-process case and
//! [`ThreadCommunicator`] runs several ranks as threads of one process. A
//! network transport can be added later behind the same trait.

use std::sync::{Arc, Barrier, Mutex};

/// Errors raised by a collective operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    /// Participants contributed buffers of different lengths.
    #[error("all-reduce length mismatch: rank {rank} sent {got} values, expected {expected}")]
    LengthMismatch {
        /// Rank whose contribution differed
        rank: usize,
        /// Length contributed by that rank
        got: usize,
        /// Length contributed by the calling rank
        expected: usize,
    },
}

/// Collective communication capability.
///
/// Every process of the group must call each collective in the same order;
/// a call blocks until all peers have contributed.
pub trait Communicator: Send {
    /// Rank of this process within the group.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Replace `data` with the element-wise sum of `data` over all processes.
    ///
    /// The result is identical on every process.
    fn all_reduce_sum(&self, data: &mut [u64]) -> Result<(), CommError>;
}

/// Communicator for a single process: every collective is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _data: &mut [u64]) -> Result<(), CommError> {
        Ok(())
    }
}

/// State shared by the members of a [`ThreadGroup`].
struct Shared {
    barrier: Barrier,
    /// One contribution slot per rank.
    slots: Mutex<Vec<Vec<u64>>>,
}

/// Factory for a group of thread-backed communicators.
pub struct ThreadGroup;

impl ThreadGroup {
    /// Create `size` communicators that form one collective group.
    /// Hand one to each participating thread.
    pub fn communicators(size: usize) -> Vec<ThreadCommunicator> {
        assert!(size > 0, "a communicator group needs at least one member");
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| ThreadCommunicator {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// Member of a [`ThreadGroup`].
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce_sum(&self, data: &mut [u64]) -> Result<(), CommError> {
        // Slots hold plain data, so a poisoned lock is still usable.
        {
            let mut slots = self.shared.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots[self.rank] = data.to_vec();
        }
        self.shared.barrier.wait();

        // Sum in rank order so every member performs identical arithmetic.
        let outcome = {
            let slots = self.shared.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.iter().enumerate().find(|(_, s)| s.len() != data.len()) {
                Some((rank, s)) => Err(CommError::LengthMismatch {
                    rank,
                    got: s.len(),
                    expected: data.len(),
                }),
                None => {
                    for (i, v) in data.iter_mut().enumerate() {
                        *v = slots.iter().map(|s| s[i]).sum();
                    }
                    Ok(())
                }
            }
        };

        // Nobody may overwrite a slot until every member has read them all.
        self.shared.barrier.wait();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn serial_reduce_is_identity() {
        let comm = SerialCommunicator;
        let mut data = vec![3, 1, 4];
        comm.all_reduce_sum(&mut data).unwrap();
        assert_eq!(data, vec![3, 1, 4]);
        assert_eq!(comm.size(), 1);
    }

    #[test]
    fn thread_group_sums_across_members() {
        let comms = ThreadGroup::communicators(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let r = comm.rank() as u64;
                    let mut data = vec![r, 10 * r, 1];
                    comm.all_reduce_sum(&mut data).unwrap();
                    // Second collective reuses the slots
                    let mut again = vec![1, 1, 1];
                    comm.all_reduce_sum(&mut again).unwrap();
                    (data, again)
                })
            })
            .collect();

        for h in handles {
            let (data, again) = h.join().unwrap();
            assert_eq!(data, vec![6, 60, 4]);
            assert_eq!(again, vec![4, 4, 4]);
        }
    }

    #[test]
    fn mismatched_lengths_fail_on_every_member() {
        let comms = ThreadGroup::communicators(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut data = vec![0u64; 2 + comm.rank()];
                    comm.all_reduce_sum(&mut data)
                })
            })
            .collect();

        for h in handles {
            assert!(matches!(h.join().unwrap(), Err(CommError::LengthMismatch { .. })));
        }
    }
}
