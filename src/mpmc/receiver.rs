use super::shared::{PollRecv, Shared};
use futures::task::Task;
use futures::{Async, Future, Poll};
use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::rc::{Rc, Weak};

pub fn new<T>(shared: &Rc<RefCell<Shared<T>>>) -> Receiver<T> {
    Receiver { shared: Rc::downgrade(shared) }
}

/// A Stream of values from a shared channel.
///
/// Streams obtain values on-demand and in the order requested.
///
/// Receivers may be cloned. Cloned receivers act independently to compete for values on
/// the underlying channel.
pub struct Receiver<T> {
    /// Holds a weak reference to the shared state of the channel. The Stream is closed
    /// when then sender is dropped.
    shared: Weak<RefCell<Shared<T>>>,
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Receiver { shared: self.shared.clone() }
    }
}

impl<T> Receiver<T> {
    pub fn recv(&self) -> Recv<T> {
        Recv::new(self.shared.clone())
    }
}

/// Obtains a value from the channel asynchronously.
///
/// Holds the registration token `poll_recv` hands back on `NotReady`: the
/// shared state only keeps a `Weak<Task>` in its blocked-receivers queue, so
/// something must keep the matching `Rc<Task>` alive or the notification
/// would have nothing left to upgrade and this future would never wake.
pub struct Recv<T> {
    shared: Weak<RefCell<Shared<T>>>,
    registered: Option<Rc<Task>>,
}

impl<T> Recv<T> {
    fn new(shared: Weak<RefCell<Shared<T>>>) -> Recv<T> {
        Recv { shared, registered: None }
    }
}

impl<T> Future for Recv<T> {
    type Item = T;
    type Error = RecvLostSender;

    fn poll(&mut self) -> Poll<T, RecvLostSender> {
        match self.shared.upgrade() {
            None => Err(RecvLostSender()),
            Some(shared) => match shared.borrow_mut().poll_recv() {
                PollRecv::Ready(item) => {
                    self.registered = None;
                    Ok(Async::Ready(item))
                }
                PollRecv::NotReady(task) => {
                    self.registered = Some(task);
                    Ok(Async::NotReady)
                }
            },
        }
    }
}

/// Indicates that every `Sender` half of the channel has been dropped, so no
/// further values can ever arrive.
#[derive(Debug)]
pub struct RecvLostSender();

impl fmt::Display for RecvLostSender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mpmc channel sender dropped")
    }
}

impl Error for RecvLostSender {
    fn description(&self) -> &str {
        "mpmc channel sender dropped"
    }
}
