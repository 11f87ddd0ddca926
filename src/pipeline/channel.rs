//! Bounded control channel between adjacent stages

use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use super::message::ControlMessage;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("receiving stage has released the channel")]
    Disconnected,
}

/// Outcome of a bounded wait on the channel
#[derive(Debug)]
pub enum Received<T> {
    Message(ControlMessage<T>),
    /// Nothing arrived within the timeout; re-check the shutdown signal
    TimedOut,
    /// Every sender is gone without a sentinel
    Closed,
}

/// Producer side; `send` blocks while the channel is full
#[derive(Debug)]
pub struct ControlSender<T> {
    tx: Sender<ControlMessage<T>>,
}

/// Consumer side
#[derive(Debug)]
pub struct ControlReceiver<T> {
    rx: Receiver<ControlMessage<T>>,
}

/// Create a bounded FIFO control channel.
pub fn control_channel<T>(capacity: usize) -> (ControlSender<T>, ControlReceiver<T>) {
    let (tx, rx) = flume::bounded(capacity);
    (ControlSender { tx }, ControlReceiver { rx })
}

impl<T> ControlSender<T> {
    /// Blocking send. Backpressure: waits while the channel is full.
    pub fn send(&self, msg: ControlMessage<T>) -> Result<(), ChannelError> {
        self.tx.send(msg).map_err(|_| ChannelError::Disconnected)
    }

    pub fn send_frame(&self, frame: T) -> Result<(), ChannelError> {
        self.send(ControlMessage::Frame(frame))
    }

    pub fn send_stop(&self) -> Result<(), ChannelError> {
        self.send(ControlMessage::Stop)
    }

    /// Wait until the consumer has dropped its end, polling up to `timeout`.
    ///
    /// Returns true once the channel is closed.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        const POLL: Duration = Duration::from_millis(5);

        let deadline = Instant::now() + timeout;
        while !self.tx.is_disconnected() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(POLL.min(deadline - now));
        }
        true
    }
}

impl<T> ControlReceiver<T> {
    pub fn recv_timeout(&self, timeout: Duration) -> Received<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Received::Message(msg),
            Err(RecvTimeoutError::Timeout) => Received::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }

    /// Blocking receive with no timeout; `None` once all senders are gone
    pub fn recv(&self) -> Option<ControlMessage<T>> {
        self.rx.recv().ok()
    }
}
