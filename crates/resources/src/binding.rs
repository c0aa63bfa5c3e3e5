use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{debug, warn};
use std::fmt::Debug;
use web_time::Duration;

/// One side of a bidirectional channel pair.
/// The binding receives `T` messages and sends `F` messages back.
pub struct Binding<T, F>
where
    T: Send + 'static + Debug,
    F: Send + 'static + Debug,
{
    sender: Sender<F>,
    receiver: Receiver<T>,
}

impl<T, F> Clone for Binding<T, F>
where
    T: Send + 'static + Debug,
    F: Send + 'static + Debug,
{
    fn clone(&self) -> Self {
        Binding {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T, F> Binding<T, F>
where
    T: Send + 'static + Debug,
    F: Send + 'static + Debug,
{
    /// Creates the binding together with the opposite ends of both channels.
    pub fn new() -> (Self, Sender<T>, Receiver<F>) {
        let (to_sender, to_receiver) = unbounded();
        let (from_sender, from_receiver) = unbounded();
        (
            Binding {
                sender: from_sender,
                receiver: to_receiver,
            },
            to_sender,
            from_receiver,
        )
    }

    /// Returns false if the other side is gone.
    pub fn send(&self, value: F) -> bool {
        debug!("Sending message: {:?}", value);
        match self.sender.send(value) {
            Ok(()) => true,
            Err(err) => {
                warn!("Binding peer disconnected, dropping {:?}", err.into_inner());
                false
            }
        }
    }

    pub fn recv(&self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => {
                debug!("Received message: {:?}", value);
                Some(value)
            }
            Err(_) => None,
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(value) => {
                debug!("Received message: {:?}", value);
                Some(value)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
