//! The background task that actually drains a producer's streams onto the
//! wire: repeatedly calls `DcpProducer::step`, forwarding each message into
//! the connection's write sink, until the producer reports `WouldBlock` or
//! disconnects.
//!
//! Modeled on `balancer::task::Task`'s `poll`-loop-with-explicit-state
//! shape: a small state enum tracks whether another immediate poll is
//! worthwhile, rather than looping unconditionally and risking starving the
//! reactor.

use std::rc::Rc;
use std::time::Instant;

use futures::{Async, AsyncSink, Future, Poll, Sink};
use tacho::{self, Timing};

use crate::connection::producer::DcpProducer;
use crate::engine::CheckpointSource;
use crate::error::DcpError;
use crate::wire::DcpMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollState {
    NeedsPoll,
    Blocked,
    Done,
}

/// Drains one producer's streams into `sink`, re-polling itself whenever the
/// sink accepts a message so a burst of ready items is forwarded in one
/// reactor turn: it pulls a bounded batch from each cursor, and once the sink
/// pushes back, production stops and the producer becomes paused.
pub struct SnapshotProcessorTask<K>
where
    K: Sink<SinkItem = DcpMessage, SinkError = DcpError>,
{
    producer: Rc<std::cell::RefCell<DcpProducer>>,
    checkpoints: Rc<dyn CheckpointSource>,
    sink: K,
    pending: Option<DcpMessage>,
    poll_time: tacho::Timer,
}

impl<K> SnapshotProcessorTask<K>
where
    K: Sink<SinkItem = DcpMessage, SinkError = DcpError>,
{
    pub fn new(
        producer: Rc<std::cell::RefCell<DcpProducer>>,
        checkpoints: Rc<dyn CheckpointSource>,
        sink: K,
        metrics: &tacho::Scope,
    ) -> SnapshotProcessorTask<K> {
        SnapshotProcessorTask {
            producer,
            checkpoints,
            sink,
            pending: None,
            poll_time: metrics.timer_us("snapshot_poll_time_us"),
        }
    }

    fn send_pending(&mut self) -> Result<bool, DcpError> {
        match self.pending.take() {
            None => Ok(true),
            Some(msg) => match self.sink.start_send(msg)? {
                AsyncSink::Ready => Ok(true),
                AsyncSink::NotReady(msg) => {
                    self.pending = Some(msg);
                    Ok(false)
                }
            },
        }
    }
}

impl<K> Future for SnapshotProcessorTask<K>
where
    K: Sink<SinkItem = DcpMessage, SinkError = DcpError>,
{
    type Item = ();
    type Error = DcpError;

    fn poll(&mut self) -> Poll<(), DcpError> {
        let t0 = Instant::now();
        let mut state = PollState::NeedsPoll;

        while state == PollState::NeedsPoll {
            if !self.send_pending()? {
                state = PollState::Blocked;
                break;
            }

            if self.producer.borrow().is_disconnect_requested() {
                state = PollState::Done;
                break;
            }

            let next = { self.producer.borrow_mut().step(&self.checkpoints) };
            match next {
                Ok(msg) => self.pending = Some(msg),
                Err(DcpError::WouldBlock) => {
                    state = PollState::Blocked;
                }
                Err(e) => return Err(e),
            }
        }

        self.poll_time.record_since(t0);
        match state {
            PollState::Done => match self.sink.poll_complete() {
                Ok(Async::Ready(())) => Ok(Async::Ready(())),
                Ok(Async::NotReady) => Ok(Async::NotReady),
                Err(e) => Err(e),
            },
            _ => {
                self.sink.poll_complete()?;
                Ok(Async::NotReady)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Cookie, NullHost};
    use crate::engine::{CheckpointItem, CursorHandle};
    use crate::flow_control::NoFlowControl;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct FakeCheckpoints;
    impl CheckpointSource for FakeCheckpoints {
        fn oldest_in_memory_seqno(&self, _vbucket: u16) -> u64 {
            0
        }
        fn register_cursor(&self, _vbucket: u16, _name: &str, _start_seqno: u64) -> CursorHandle {
            CursorHandle(1)
        }
        fn unregister_cursor(&self, _vbucket: u16, _cursor: CursorHandle) {}
        fn next_items(&self, _vbucket: u16, _cursor: CursorHandle, _max_items: usize) -> Vec<CheckpointItem> {
            Vec::new()
        }
        fn open_checkpoint_id(&self, _vbucket: u16) -> u64 {
            1
        }
        fn set_open_checkpoint_id(&self, _vbucket: u16, _id: u64) {}
        fn create_checkpoint(&self, _vbucket: u16) -> u64 {
            2
        }
    }

    struct VecSink(VecDeque<DcpMessage>);
    impl Sink for VecSink {
        type SinkItem = DcpMessage;
        type SinkError = DcpError;
        fn start_send(&mut self, item: DcpMessage) -> Result<AsyncSink<DcpMessage>, DcpError> {
            self.0.push_back(item);
            Ok(AsyncSink::Ready)
        }
        fn poll_complete(&mut self) -> Poll<(), DcpError> {
            Ok(Async::Ready(()))
        }
    }

    /// An idle producer with no open streams parks the task rather than
    /// spinning.
    #[test]
    fn idle_producer_yields_not_ready() {
        let producer = Rc::new(RefCell::new(DcpProducer::new(
            Cookie(1),
            "p1".into(),
            0,
            Duration::from_secs(2),
            Box::new(NoFlowControl),
            Duration::from_secs(60),
            Box::new(NullHost),
            false,
        )));
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(FakeCheckpoints);
        let tacho::Tacho { metrics, .. } = tacho::Tacho::default();
        let mut task = SnapshotProcessorTask::new(producer, checkpoints, VecSink(VecDeque::new()), &metrics);
        assert!(matches!(task.poll().unwrap(), Async::NotReady));
    }

    /// A disconnect-requested producer completes the task instead of
    /// blocking forever on it.
    #[test]
    fn disconnected_producer_completes() {
        let producer = Rc::new(RefCell::new(DcpProducer::new(
            Cookie(1),
            "p1".into(),
            0,
            Duration::from_secs(2),
            Box::new(NoFlowControl),
            Duration::from_secs(60),
            Box::new(NullHost),
            false,
        )));
        producer.borrow_mut().disconnect();
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(FakeCheckpoints);
        let tacho::Tacho { metrics, .. } = tacho::Tacho::default();
        let mut task = SnapshotProcessorTask::new(producer, checkpoints, VecSink(VecDeque::new()), &metrics);
        assert!(matches!(task.poll().unwrap(), Async::Ready(())));
    }
}
