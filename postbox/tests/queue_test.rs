use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::address::Envelope;
use postbox::{
    DispatchState, Dispatcher, EnqueueError, FailurePolicy, MailError, Mailer, MailerConfig,
    MemoryTransport, Message, Transport,
};
use tokio::sync::{Mutex, Semaphore};

const FROM: &str = "noreply@example.com";

fn message(subject: &str) -> Message {
    Message::text(["user@example.com"], FROM, subject, "Body")
}

fn subject_of(raw: &str) -> String {
    raw.lines()
        .find_map(|line| line.strip_prefix("Subject: "))
        .unwrap_or_default()
        .to_string()
}

/// Holds every transmission until a permit is released.
#[derive(Clone)]
struct GatedTransport {
    gate: Arc<Semaphore>,
    subjects: Arc<Mutex<Vec<String>>>,
}

impl GatedTransport {
    fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            subjects: Arc::default(),
        }
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send_raw(&self, _envelope: &Envelope, raw: &[u8]) -> Result<(), MailError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?
            .forget();
        let raw = String::from_utf8_lossy(raw);
        self.subjects.lock().await.push(subject_of(&raw));
        Ok(())
    }
}

#[tokio::test]
async fn delivers_in_fifo_order() {
    let transport = MemoryTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .start()
        .unwrap();

    for subject in ["one", "two", "three"] {
        queue.try_enqueue(message(subject)).unwrap();
    }
    queue.stop().await;

    let subjects: Vec<_> = transport
        .sent()
        .await
        .iter()
        .map(|m| subject_of(&m.raw))
        .collect();
    assert_eq!(subjects, vec!["one", "two", "three"]);
    assert_eq!(queue.state(), DispatchState::Stopped);
}

#[tokio::test]
async fn full_queue_pushes_back_on_the_enqueuing_task_only() {
    let transport = GatedTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .capacity(1)
        .start()
        .unwrap();
    assert_eq!(queue.capacity(), 1);

    queue.try_enqueue(message("first")).unwrap();
    queue
        .subscribe()
        .wait_for(|s| *s == DispatchState::Sending)
        .await
        .unwrap();

    // The dispatcher is stuck on "first"; one more fits in the buffer.
    queue.try_enqueue(message("second")).unwrap();
    assert_eq!(queue.pending(), 1);

    let err = queue.try_enqueue(message("third")).unwrap_err();
    assert!(matches!(err, EnqueueError::Full(_)));
    let third = err.into_message();
    assert_eq!(third.subject, "third");

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(third).await })
    };

    // The caller keeps running while the producer task waits for room.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!producer.is_finished());

    transport.release(3);
    producer.await.unwrap().unwrap();
    queue.stop().await;

    assert_eq!(
        *transport.subjects.lock().await,
        vec!["first", "second", "third"]
    );
}

#[tokio::test]
async fn waiting_enqueue_times_out() {
    let transport = GatedTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .capacity(1)
        .enqueue_timeout(Duration::from_millis(20))
        .start()
        .unwrap();

    queue.try_enqueue(message("first")).unwrap();
    queue
        .subscribe()
        .wait_for(|s| *s == DispatchState::Sending)
        .await
        .unwrap();
    queue.try_enqueue(message("second")).unwrap();

    let err = queue.enqueue(message("third")).await.unwrap_err();
    assert!(matches!(err, EnqueueError::Timeout(_)));

    transport.release(2);
    queue.stop().await;
    assert_eq!(*transport.subjects.lock().await, vec!["first", "second"]);
}

#[tokio::test]
async fn failure_continues_by_default() {
    let transport = MemoryTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .start()
        .unwrap();

    let broken = Message::text(["user@example.com"], FROM, "broken", "").with_info("first");
    queue.try_enqueue(broken).unwrap();
    queue.try_enqueue(message("second")).unwrap();
    queue.stop().await;

    let sent = transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(subject_of(&sent[0].raw), "second");
}

#[tokio::test]
async fn stop_policy_never_sends_after_a_failure() {
    let transport = MemoryTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .failure_policy(FailurePolicy::Stop)
        .start()
        .unwrap();

    let broken = Message::text(["user@example.com"], FROM, "broken", "");
    queue.try_enqueue(broken).unwrap();
    queue.try_enqueue(message("second")).unwrap();

    queue
        .subscribe()
        .wait_for(|s| *s == DispatchState::Terminated)
        .await
        .unwrap();

    assert!(!queue.is_running());
    let err = queue.try_enqueue(message("third")).unwrap_err();
    assert!(matches!(err, EnqueueError::Stopped(_)));

    queue.stop().await;
    assert_eq!(queue.state(), DispatchState::Terminated);
    assert!(transport.attempted().await.is_empty());
}

#[tokio::test]
async fn stop_drains_then_rejects() {
    let transport = GatedTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .start()
        .unwrap();

    queue.try_enqueue(message("one")).unwrap();
    queue.try_enqueue(message("two")).unwrap();

    let stopping = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.stop().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!queue.is_running());
    let err = queue.enqueue(message("late")).await.unwrap_err();
    assert!(matches!(err, EnqueueError::Stopped(_)));

    transport.release(2);
    stopping.await.unwrap();

    assert_eq!(*transport.subjects.lock().await, vec!["one", "two"]);
    assert_eq!(queue.state(), DispatchState::Stopped);

    // A second stop is a no-op.
    queue.stop().await;
}

#[tokio::test]
async fn concurrent_stops_wait_for_the_drain() {
    let transport = GatedTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .start()
        .unwrap();

    queue.try_enqueue(message("one")).unwrap();
    queue
        .subscribe()
        .wait_for(|s| *s == DispatchState::Sending)
        .await
        .unwrap();

    let stoppers: Vec<_> = (0..2)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.stop().await;
                queue.state()
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    for stopper in &stoppers {
        assert!(!stopper.is_finished());
    }

    transport.release(1);
    for stopper in stoppers {
        assert_eq!(stopper.await.unwrap(), DispatchState::Stopped);
    }
    assert_eq!(*transport.subjects.lock().await, vec!["one"]);
}

#[tokio::test]
async fn dispatcher_takes_queue_settings_from_config() {
    let mut config = MailerConfig::new("localhost");
    config.send_buffer_len = 3;
    config.stop_on_failure = true;

    let transport = MemoryTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .with_config(&config)
        .start()
        .unwrap();
    assert_eq!(queue.capacity(), 3);

    let broken = Message::text(["user@example.com"], FROM, "broken", "");
    queue.try_enqueue(broken).unwrap();
    queue
        .subscribe()
        .wait_for(|s| *s == DispatchState::Terminated)
        .await
        .unwrap();

    let err = queue.try_enqueue(message("second")).unwrap_err();
    assert!(matches!(err, EnqueueError::Stopped(_)));
    queue.stop().await;
}

#[tokio::test]
async fn enqueue_timeout_comes_from_config() {
    let mut config = MailerConfig::new("localhost");
    config.send_buffer_len = 1;
    config.enqueue_timeout_ms = Some(20);

    let transport = GatedTransport::new();
    let queue = Dispatcher::new(Mailer::new(transport.clone()))
        .with_config(&config)
        .start()
        .unwrap();

    queue.try_enqueue(message("first")).unwrap();
    queue
        .subscribe()
        .wait_for(|s| *s == DispatchState::Sending)
        .await
        .unwrap();
    queue.try_enqueue(message("second")).unwrap();

    let err = queue.enqueue(message("third")).await.unwrap_err();
    assert!(matches!(err, EnqueueError::Timeout(_)));

    transport.release(2);
    queue.stop().await;
}

#[tokio::test]
async fn zero_capacity_is_a_config_error() {
    let result = Dispatcher::new(Mailer::new(MemoryTransport::new()))
        .capacity(0)
        .start();

    assert!(matches!(result, Err(MailError::Config(_))));
}
