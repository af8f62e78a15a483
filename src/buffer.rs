use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time;

#[derive(Debug)]
struct Entry {
    id: u64,
    payload: Box<[u8]>,
}

#[derive(Debug, Default)]
struct Queue {
    entries: VecDeque<Entry>,
    next_id: u64,
}

/// Unbounded FIFO of received payloads, consumed by blocking reads.
#[derive(Debug, Default)]
pub struct DeliveryBuffer {
    queue: Mutex<Queue>,
    nonempty: Condvar,
}

fn copy_out(entry: Entry, buf: &mut [u8]) -> usize {
    log::trace!("delivering entry {} ({} bytes)", entry.id, entry.payload.len());

    let len = entry.payload.len().min(buf.len());
    buf[..len].copy_from_slice(&entry.payload[..len]);
    len
}

impl DeliveryBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a copy of `payload` and wakes any blocked readers.
    pub fn put(&self, payload: &[u8]) {
        let mut queue = self.lock();

        let id = queue.next_id;
        queue.next_id = queue.next_id.wrapping_add(1);

        queue.entries.push_back(Entry {
            id,
            payload: payload.into(),
        });

        self.nonempty.notify_all();
    }

    /// Blocks until an entry is available, then copies as much of it as fits into `buf`.
    /// Bytes which do not fit are discarded with the entry. Gives up after `timeout`, if one is
    /// given.
    pub fn get(&self, buf: &mut [u8], timeout: Option<time::Duration>) -> Option<usize> {
        let deadline = timeout.map(|timeout| time::Instant::now() + timeout);
        let mut queue = self.lock();

        loop {
            if let Some(entry) = queue.entries.pop_front() {
                return Some(copy_out(entry, buf));
            }

            queue = match deadline {
                Some(deadline) => {
                    let now = time::Instant::now();
                    if now >= deadline {
                        return None;
                    }

                    self.nonempty
                        .wait_timeout(queue, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .nonempty
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    pub fn try_get(&self, buf: &mut [u8]) -> Option<usize> {
        self.lock()
            .entries
            .pop_front()
            .map(|entry| copy_out(entry, buf))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}
