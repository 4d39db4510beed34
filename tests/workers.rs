mod common;

use common::{eventually, message, FixedBackout, RecordingRepository, RecordingTransport};
use reyna::{
    BatchConfiguration, DeliveryResult, DispatchMode, DispatchWorker, InMemoryBackoutCheck, InMemoryRepository,
    IntakeMover, Message, Repository, ServiceTransport, VolatileQueue, WorkerError, WorkerState, BATCH_PROVIDER_KEY,
};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn intake() -> (Arc<VolatileQueue>, Arc<InMemoryRepository>, IntakeMover<InMemoryRepository>) {
    let volatile = Arc::new(VolatileQueue::new());
    let repository = Arc::new(InMemoryRepository::new());
    let mover = IntakeMover::new(Arc::clone(&volatile), Arc::clone(&repository));
    (volatile, repository, mover)
}

async fn enqueue(repository: &InMemoryRepository, bodies: &[&str]) {
    for body in bodies {
        repository
            .enqueue(&message("http://google.com", body))
            .await
            .expect("enqueue");
    }
}

async fn bodies(repository: &InMemoryRepository) -> Vec<String> {
    repository
        .messages()
        .await
        .iter()
        .map(|m| m.body().to_owned())
        .collect()
}

#[tokio::test]
async fn intake_persists_added_messages() {
    let (volatile, repository, mover) = intake();
    mover.start().await;
    assert_eq!(mover.state().await, WorkerState::Running);

    volatile.add(message("http://google.com", "{}"));

    eventually(|| async { repository.messages().await.len() == 1 }).await;
    assert!(volatile.is_empty());

    mover.stop().await;
    assert_eq!(mover.state().await, WorkerState::Stopped);
}

#[tokio::test]
async fn intake_picks_up_messages_added_while_stopped() {
    let (volatile, repository, mover) = intake();
    volatile.add(message("http://google.com", "first"));
    volatile.add(message("http://google.com", "second"));

    mover.start().await;
    eventually(|| async { repository.messages().await.len() == 2 }).await;
    mover.stop().await;

    assert_eq!(bodies(&repository).await, ["first", "second"]);
}

#[tokio::test]
async fn stop_right_after_add_still_persists() {
    let (volatile, repository, mover) = intake();
    mover.start().await;

    volatile.add(message("http://google.com", "{}"));
    mover.stop().await;

    assert_eq!(repository.messages().await.len(), 1);
    assert!(volatile.is_empty());

    volatile.add(message("http://google.com", "later"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(repository.messages().await.len(), 1);
    assert_eq!(volatile.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rapid_cycling_persists_every_message_once() {
    const COUNT: usize = 10;
    let (volatile, repository, mover) = intake();

    let producer = {
        let volatile = Arc::clone(&volatile);
        tokio::spawn(async move {
            for n in 0..COUNT {
                volatile.add(message("http://google.com", &n.to_string()));
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        })
    };

    for _ in 0..COUNT {
        mover.start().await;
        mover.stop().await;
    }
    producer.await.expect("producer");

    mover.start().await;
    eventually(|| async { volatile.is_empty() }).await;
    mover.stop().await;

    let expected = (0..COUNT).map(|n| n.to_string()).collect::<Vec<_>>();
    assert_eq!(bodies(&repository).await, expected);
}

#[tokio::test]
async fn stop_and_dispose_without_start() {
    let (_, _, mover) = intake();
    mover.stop().await;
    mover.dispose().await;
    mover.dispose().await;
    assert_eq!(mover.state().await, WorkerState::Stopped);

    let (_, _, mover) = intake();
    mover.start().await;
    mover.stop().await;
    mover.dispose().await;

    mover.start().await;
    assert_eq!(mover.state().await, WorkerState::Stopped);
}

#[tokio::test]
async fn dispatch_pauses_on_temporary_error() {
    let repository = Arc::new(RecordingRepository::default());
    for body in ["m1", "m2", "m3"] {
        repository
            .enqueue(&message("http://google.com", body))
            .await
            .expect("enqueue");
    }

    let online = Arc::new(AtomicBool::new(false));
    let transport = RecordingTransport::new({
        let online = Arc::clone(&online);
        move |m| {
            if m.body() == "m2" && !online.load(Ordering::SeqCst) {
                DeliveryResult::TemporaryError
            } else {
                DeliveryResult::Ok
            }
        }
    });
    let worker = DispatchWorker::new(Arc::clone(&repository), Arc::clone(&transport));

    worker.start().await;
    eventually(|| async { transport.posted().len() == 2 }).await;
    // stopping joins the pass, so nothing else can be attempted after this.
    worker.stop().await;

    assert_eq!(transport.posted_bodies(), ["m1", "m2"]);
    let removed = repository.calls().iter().filter(|&&call| call == "remove").count();
    assert_eq!(removed, 1);
    let remaining = repository.messages().await;
    assert_eq!(remaining.iter().map(Message::body).collect::<Vec<_>>(), ["m2", "m3"]);

    online.store(true, Ordering::SeqCst);
    worker.start().await;
    eventually(|| async { repository.messages().await.is_empty() }).await;
    worker.stop().await;

    assert_eq!(transport.posted_bodies(), ["m1", "m2", "m2", "m3"]);
}

#[tokio::test(start_paused = true)]
async fn dispatch_retries_on_interval() {
    let repository = Arc::new(InMemoryRepository::new());
    enqueue(&repository, &["m1"]).await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let transport = RecordingTransport::new({
        let attempts = Arc::clone(&attempts);
        move |_| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                DeliveryResult::TemporaryError
            } else {
                DeliveryResult::Ok
            }
        }
    });
    let worker = DispatchWorker::new(Arc::clone(&repository), Arc::clone(&transport))
        .with_retry_interval(Some(Duration::from_secs(60)));

    worker.start().await;
    eventually(|| async { attempts.load(Ordering::SeqCst) == 1 }).await;
    assert_eq!(repository.messages().await.len(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    eventually(|| async { repository.messages().await.is_empty() }).await;
    worker.stop().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dispatch_drops_permanently_rejected_messages() {
    let repository = Arc::new(InMemoryRepository::new());
    enqueue(&repository, &["bad", "good"]).await;

    let transport = RecordingTransport::new(|m| match m.body() {
        "bad" => DeliveryResult::PermanentError,
        _ => DeliveryResult::Ok,
    });
    let worker = DispatchWorker::new(Arc::clone(&repository), Arc::clone(&transport));

    worker.start().await;
    eventually(|| async { repository.messages().await.is_empty() }).await;
    worker.stop().await;

    assert_eq!(transport.posted_bodies(), ["bad", "good"]);
}

#[tokio::test]
async fn dispatch_treats_a_panicking_transport_as_permanent() {
    let repository = Arc::new(InMemoryRepository::new());
    enqueue(&repository, &["boom", "fine"]).await;

    let transport = RecordingTransport::new(|m| {
        assert_ne!(m.body(), "boom", "transport exploded");
        DeliveryResult::Ok
    });
    let worker = DispatchWorker::new(Arc::clone(&repository), Arc::clone(&transport));

    worker.start().await;
    eventually(|| async { repository.messages().await.is_empty() }).await;
    worker.stop().await;

    assert_eq!(transport.posted_bodies(), ["boom", "fine"]);
}

#[tokio::test]
async fn dispatch_through_a_tower_service() {
    let repository = Arc::new(InMemoryRepository::new());
    enqueue(&repository, &["m1", "m2"]).await;

    let delivered = Arc::new(AtomicUsize::new(0));
    let service = tower::service_fn({
        let delivered = Arc::clone(&delivered);
        move |_: Message| {
            let delivered = Arc::clone(&delivered);
            async move {
                delivered.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(DeliveryResult::Ok)
            }
        }
    });
    let worker = DispatchWorker::new(Arc::clone(&repository), Arc::new(ServiceTransport::new(service)));

    worker.start().await;
    eventually(|| async { repository.messages().await.is_empty() }).await;
    worker.stop().await;

    assert_eq!(delivered.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dispatch_in_batches() {
    let repository = Arc::new(InMemoryRepository::new());
    enqueue(&repository, &["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]).await;

    let transport = RecordingTransport::ok();
    let backout = Arc::new(InMemoryBackoutCheck::new());
    let configuration = BatchConfiguration::default().with_batch_message_count(2);
    let worker = DispatchWorker::new(Arc::clone(&repository), Arc::clone(&transport))
        .with_mode(DispatchMode::batch(configuration, Arc::clone(&backout)));

    worker.start().await;
    eventually(|| async { repository.messages().await.is_empty() }).await;

    let posted = transport.posted();
    assert_eq!(posted.len(), 2);
    assert!(posted.iter().all(|m| m.url().as_str() == "http://google.com/batch"));
    assert!(posted[0].body().contains(r#""reynaId":2"#));
    assert!(posted[1].body().contains(r#""reynaId":3"#));

    // A batch went out, so a lone message now waits for the interval.
    enqueue(&repository, &["{\"n\":4}"]).await;
    worker.signal().raise();
    tokio::time::sleep(Duration::from_millis(50)).await;
    worker.stop().await;

    assert_eq!(transport.posted().len(), 2);
    assert_eq!(repository.messages().await.len(), 1);
}

#[tokio::test]
async fn temporary_batch_failure_keeps_the_batch() {
    let repository = Arc::new(InMemoryRepository::new());
    enqueue(&repository, &["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]).await;

    let transport = RecordingTransport::new(|_| DeliveryResult::TemporaryError);
    let backout = FixedBackout::new(true);
    let configuration = BatchConfiguration::default().with_batch_message_count(2);
    let worker = DispatchWorker::new(Arc::clone(&repository), Arc::clone(&transport))
        .with_mode(DispatchMode::batch(configuration, Arc::clone(&backout)));

    worker.start().await;
    eventually(|| async { !transport.posted().is_empty() }).await;
    worker.stop().await;

    assert_eq!(transport.posted().len(), 1);
    assert_eq!(repository.messages().await.len(), 3);
    assert!(backout.records().is_empty());
}

#[tokio::test]
async fn permanent_batch_failure_purges_the_batch() {
    let repository = Arc::new(InMemoryRepository::new());
    enqueue(&repository, &["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]).await;

    let transport = RecordingTransport::new(|_| DeliveryResult::PermanentError);
    let backout = FixedBackout::new(true);
    let configuration = BatchConfiguration::default().with_batch_message_count(2);
    let worker = DispatchWorker::new(Arc::clone(&repository), Arc::clone(&transport))
        .with_mode(DispatchMode::batch(configuration, Arc::clone(&backout)));

    worker.start().await;
    eventually(|| async { repository.messages().await.is_empty() }).await;
    worker.stop().await;

    assert_eq!(transport.posted().len(), 2);
    assert_eq!(backout.records(), [BATCH_PROVIDER_KEY]);
}

#[tokio::test]
async fn reconfigure_only_while_stopped() {
    let repository = Arc::new(InMemoryRepository::new());
    let worker = DispatchWorker::new(repository, RecordingTransport::ok());
    let batch = || DispatchMode::batch(BatchConfiguration::default(), Arc::new(InMemoryBackoutCheck::new()));

    worker.start().await;
    assert!(matches!(
        worker.reconfigure(batch()).await,
        Err(WorkerError::Running { .. })
    ));

    worker.stop().await;
    worker.reconfigure(batch()).await.expect("reconfigure");

    worker.dispose().await;
    assert!(matches!(
        worker.reconfigure(DispatchMode::Single).await,
        Err(WorkerError::Disposed { .. })
    ));
}
