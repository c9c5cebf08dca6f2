//! Leading + trailing throttle for validations
//!
//! The first signal runs the action at once and opens a cooldown window.
//! Signals inside the window only replace the pending argument; when the
//! window closes the latest one runs and a new window opens. A window that
//! closes with nothing pending returns the throttle to idle.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
enum ThrottleState<T> {
    Idle,
    Cooldown { pending: Option<T> },
}

/// Throttle state machine, independent of any clock
#[derive(Debug)]
pub struct Throttle<T> {
    state: ThrottleState<T>,
}

impl<T> Throttle<T> {
    pub fn new() -> Self {
        Self {
            state: ThrottleState::Idle,
        }
    }

    /// Returns the argument to run with now, if any.
    ///
    /// Starts a cooldown when idle; the caller owns the timer.
    pub fn signal(&mut self, arg: T) -> Option<T> {
        match &mut self.state {
            ThrottleState::Idle => {
                self.state = ThrottleState::Cooldown { pending: None };
                Some(arg)
            }
            ThrottleState::Cooldown { pending } => {
                *pending = Some(arg);
                None
            }
        }
    }

    /// The cooldown timer fired. Returns the pending argument, in which case
    /// a fresh cooldown has started.
    pub fn cooldown_elapsed(&mut self) -> Option<T> {
        match std::mem::replace(&mut self.state, ThrottleState::Idle) {
            ThrottleState::Cooldown { pending: Some(arg) } => {
                self.state = ThrottleState::Cooldown { pending: None };
                Some(arg)
            }
            ThrottleState::Cooldown { pending: None } | ThrottleState::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ThrottleState::Idle)
    }
}

impl<T> Default for Throttle<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs an action through a [`Throttle`] on its own task.
///
/// Dropping the trigger stops the task; a pending argument is discarded.
pub struct ThrottledTrigger<T> {
    sender: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> ThrottledTrigger<T> {
    pub fn spawn<F>(cooldown: Duration, action: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run(cooldown, receiver, action));
        Self { sender, task }
    }

    pub fn signal(&self, arg: T) {
        if self.sender.send(arg).is_err() {
            trace!("Trigger task gone, dropping signal");
        }
    }

    async fn run<F>(cooldown: Duration, mut receiver: mpsc::UnboundedReceiver<T>, mut action: F)
    where
        F: FnMut(T),
    {
        let mut throttle = Throttle::new();
        let timer = tokio::time::sleep(cooldown);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                () = &mut timer, if !throttle.is_idle() => {
                    if let Some(arg) = throttle.cooldown_elapsed() {
                        action(arg);
                        timer.as_mut().reset(Instant::now() + cooldown);
                    }
                }
                signal = receiver.recv() => {
                    let Some(arg) = signal else {
                        break;
                    };
                    if let Some(arg) = throttle.signal(arg) {
                        action(arg);
                        timer.as_mut().reset(Instant::now() + cooldown);
                    }
                }
            }
        }

        trace!("Trigger task finished");
    }
}

impl<T> Drop for ThrottledTrigger<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
