use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::metrics::SLOW_CONSUMER_TOTAL;

const RING_BUFFER_CAPACITY: usize = 10_000;
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogLine {
    pub job_id: Uuid,
    pub seq: u64,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub level: Option<String>,
    pub text: String,
}

/// Per-job log fan-out: a bounded ring buffer for late subscribers plus a
/// broadcast channel for live tailing. Slow subscribers are dropped by
/// `broadcast`'s own lag detection rather than slowing the worker.
pub struct JobLogStream {
    job_id: Uuid,
    next_seq: Mutex<u64>,
    ring: Mutex<VecDeque<LogLine>>,
    tx: broadcast::Sender<LogLine>,
}

impl JobLogStream {
    pub fn new(job_id: Uuid) -> Self {
        let (tx, _rx) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        Self { job_id, next_seq: Mutex::new(0), ring: Mutex::new(VecDeque::new()), tx }
    }

    /// Appends a line, assigning the next sequence number, and broadcasts it
    /// to live subscribers. Never blocks: a full subscriber channel just
    /// drops that subscriber's oldest buffered messages (broadcast semantics).
    pub fn push(&self, level: Option<String>, text: String) -> LogLine {
        let mut seq_guard = self.next_seq.lock().unwrap();
        let seq = *seq_guard;
        *seq_guard += 1;
        drop(seq_guard);

        let line = LogLine { job_id: self.job_id, seq, ts: chrono::Utc::now(), level, text };

        {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() >= RING_BUFFER_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(line.clone());
        }

        if self.tx.send(line.clone()).is_err() {
            // no active subscribers; the ring buffer still holds the line
        }
        line
    }

    pub fn backlog(&self) -> Vec<LogLine> {
        self.ring.lock().unwrap().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.tx.subscribe()
    }

    pub fn note_slow_consumer(&self) {
        SLOW_CONSUMER_TOTAL.with_label_values(&["build"]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_monotonic_sequence_numbers() {
        let stream = JobLogStream::new(Uuid::new_v4());
        let a = stream.push(None, "line 1".into());
        let b = stream.push(Some("warn".into()), "line 2".into());
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
    }

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let stream = JobLogStream::new(Uuid::new_v4());
        for i in 0..(RING_BUFFER_CAPACITY + 5) {
            stream.push(None, format!("line {i}"));
        }
        let backlog = stream.backlog();
        assert_eq!(backlog.len(), RING_BUFFER_CAPACITY);
        assert_eq!(backlog.front().unwrap().text, "line 5");
    }
}
