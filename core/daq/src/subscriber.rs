// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! State subscriber: opens a server-streaming subscription and decodes the
//! incoming envelopes on a dedicated receive thread. Connection loss is not
//! an error; it flips `is_running` and the owner decides when to
//! `reconnect`.

// Standard library imports
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

// Third-party crates
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

// Local crate
use crate::api::{Envelope, SubscribeMode, SubscribeRequest, TypedState, methods, unpack};
use crate::errors::DaqError;
use crate::transport::StreamReader;
use crate::transport::local::Channel;

/// One decoded state sample handed to the subscriber callback.
pub struct Sample<T> {
    pub sequence: u64,
    pub timestamp_ns: u64,
    pub state: T,
}

type SampleHandler<T> = Arc<dyn Fn(Sample<T>) + Send + Sync>;

/// One receive thread's lifetime. Cancelling the token unblocks the thread
/// even when the stream is silent.
struct ReceiveSession {
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl ReceiveSession {
    fn idle() -> Self {
        ReceiveSession {
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            thread: None,
        }
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.running.store(false, Ordering::Release);
    }
}

/// Subscription to one topic of a state publisher.
pub struct StateSubscriber<T: TypedState> {
    topic: String,
    address: String,
    handler: SampleHandler<T>,
    session: Mutex<ReceiveSession>,
    stopped: AtomicBool,
}

impl<T: TypedState> StateSubscriber<T> {
    /// Subscribe to `topic` at `address`. An unreachable publisher is not an
    /// error: the subscriber comes back with `is_running() == false` and can
    /// be reconnected later.
    pub fn subscribe<F>(topic: &str, address: &str, handler: F) -> Result<Self, DaqError>
    where
        F: Fn(Sample<T>) + Send + Sync + 'static,
    {
        let subscriber = StateSubscriber {
            topic: topic.to_string(),
            address: address.to_string(),
            handler: Arc::new(handler),
            session: Mutex::new(ReceiveSession::idle()),
            stopped: AtomicBool::new(false),
        };
        {
            let mut session = subscriber.session.lock();
            subscriber.open(&mut session)?;
        }
        Ok(subscriber)
    }

    /// Open the stream and start the receive thread, installing it into the
    /// locked session slot. Returns `false` when the publisher is
    /// unreachable. The caller holds the session lock, so `stop` cannot slip
    /// in between teardown and spawn.
    fn open(&self, session: &mut ReceiveSession) -> Result<bool, DaqError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(DaqError::EngineStopped);
        }
        let request = SubscribeRequest::new(&self.topic, SubscribeMode::On);
        let reader = Channel::new(&self.address)
            .open_stream(methods::SUBSCRIBE, Bytes::from(request.encode_to_vec()))?;
        let Some(reader) = reader else {
            debug!(topic = %self.topic, address = %self.address, "publisher unreachable");
            return Ok(false);
        };

        let mut fresh = ReceiveSession::idle();
        fresh.running.store(true, Ordering::Release);
        fresh.thread = Some(spawn_receiver(
            reader,
            self.handler.clone(),
            fresh.running.clone(),
            fresh.cancel.clone(),
        )?);
        *session = fresh;
        debug!(topic = %self.topic, address = %self.address, "subscribed");
        Ok(true)
    }

    /// Whether the receive thread is connected and consuming the stream.
    /// Flips to `false` once the publisher ends the stream or goes away.
    pub fn is_running(&self) -> bool {
        self.session.lock().running.load(Ordering::Acquire)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Tear down the current stream, if any, and subscribe again. Returns
    /// `false` when the publisher is still unreachable. The session lock is
    /// held from teardown through the new spawn; a `stop` racing this call
    /// either rejects the reconnect or tears down the fresh thread, never
    /// leaves one behind unjoined.
    pub fn reconnect(&self) -> Result<bool, DaqError> {
        let mut session = self.session.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(DaqError::EngineStopped);
        }
        session.shutdown();
        self.open(&mut session)
    }

    /// Stop receiving and join the receive thread. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.session.lock().shutdown();
        debug!(topic = %self.topic, "subscriber stopped");
    }
}

impl<T: TypedState> Drop for StateSubscriber<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_receiver<T: TypedState>(
    mut reader: StreamReader,
    handler: SampleHandler<T>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> Result<thread::JoinHandle<()>, DaqError> {
    let handle = thread::Builder::new()
        .name("daq-subscriber".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("failed to build subscriber runtime");

            runtime.block_on(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        message = reader.recv() => match message {
                            Some(bytes) => deliver(&handler, bytes),
                            None => {
                                debug!("stream ended by publisher");
                                break;
                            }
                        },
                    }
                }
                running.store(false, Ordering::Release);
            });
        })?;
    Ok(handle)
}

fn deliver<T: TypedState>(handler: &SampleHandler<T>, bytes: Bytes) {
    let envelope = match Envelope::decode(bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            trace!(error = %e, "undecodable envelope skipped");
            return;
        }
    };
    match unpack::<T>(&envelope) {
        Ok(Some(state)) => handler(Sample {
            sequence: envelope.sequence,
            timestamp_ns: envelope.timestamp_ns,
            state,
        }),
        Ok(None) => trace!(
            sequence = envelope.sequence,
            "envelope with unexpected payload type skipped"
        ),
        Err(e) => trace!(error = %e, "payload decode failed, sample skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::JointState;
    use crate::publisher::StatePublisher;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};
    use tracing_test::traced_test;

    fn wait_until(what: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if what() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_subscribe_without_publisher_is_not_running() {
        let subscriber: StateSubscriber<JointState> =
            StateSubscriber::subscribe("RobotState", "127.0.0.1:5", |_| {}).unwrap();
        assert!(!subscriber.is_running());
        subscriber.stop();
    }

    #[test]
    fn test_reconnect_after_publisher_appears() {
        let subscriber: StateSubscriber<JointState> =
            StateSubscriber::subscribe("RobotState", "127.0.0.1:48140", |_| {}).unwrap();
        assert!(!subscriber.is_running());

        let publisher = StatePublisher::bind("RobotState", "127.0.0.1:48140", 8).unwrap();
        assert!(subscriber.reconnect().unwrap());
        assert!(subscriber.is_running());

        subscriber.stop();
        publisher.stop();
    }

    #[test]
    #[traced_test]
    fn test_samples_are_decoded_and_delivered() {
        let publisher = StatePublisher::bind("RobotState", "127.0.0.1:48141", 8).unwrap();
        let (tx, rx) = mpsc::channel();
        let subscriber: StateSubscriber<JointState> =
            StateSubscriber::subscribe("RobotState", "127.0.0.1:48141", move |sample| {
                tx.send(sample).unwrap();
            })
            .unwrap();
        assert!(subscriber.is_running());
        assert!(wait_until(|| publisher.subscriber_count() == 1));

        let state = JointState {
            position: vec![1.0, 2.0],
            ..Default::default()
        };
        publisher.publish(&state).unwrap();

        let sample = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(sample.sequence, 1);
        assert_eq!(sample.state.position, vec![1.0, 2.0]);

        subscriber.stop();
        publisher.stop();
    }

    #[test]
    fn test_reconnect_after_stop_is_rejected() {
        let publisher = StatePublisher::bind("RobotState", "127.0.0.1:48143", 8).unwrap();
        let subscriber: StateSubscriber<JointState> =
            StateSubscriber::subscribe("RobotState", "127.0.0.1:48143", |_| {}).unwrap();

        subscriber.stop();
        assert!(matches!(
            subscriber.reconnect(),
            Err(DaqError::EngineStopped)
        ));
        assert!(!subscriber.is_running());

        publisher.stop();
    }

    #[test]
    fn test_stop_racing_reconnects_leaves_no_receiver() {
        let publisher = StatePublisher::bind("RobotState", "127.0.0.1:48144", 8).unwrap();
        let subscriber = Arc::new(
            StateSubscriber::<JointState>::subscribe("RobotState", "127.0.0.1:48144", |_| {})
                .unwrap(),
        );

        let worker = {
            let subscriber = subscriber.clone();
            thread::spawn(move || {
                while subscriber.reconnect().is_ok() {
                    thread::yield_now();
                }
            })
        };
        thread::sleep(Duration::from_millis(10));
        subscriber.stop();
        worker.join().unwrap();

        // whichever side won the race, no receive thread survives stop()
        assert!(!subscriber.is_running());

        // writes to the torn-down streams fail, draining the stale sessions
        assert!(wait_until(|| {
            publisher.publish(&JointState::default()).unwrap();
            publisher.subscriber_count() == 0
        }));

        publisher.stop();
    }

    #[test]
    fn test_topic_mismatch_ends_the_stream() {
        let publisher = StatePublisher::bind("RobotState", "127.0.0.1:48142", 8).unwrap();
        let subscriber: StateSubscriber<JointState> =
            StateSubscriber::subscribe("OtherTopic", "127.0.0.1:48142", |_| {}).unwrap();

        // the publisher refuses the topic and drops the stream
        assert!(wait_until(|| !subscriber.is_running()));

        subscriber.stop();
        publisher.stop();
    }
}
