use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use nodegate::control::dispatch::{telemetry_channel, Dispatcher, PacketWriter, Route};
use tokio::sync::mpsc;

const MASK: u8 = 0xF0;

/// Writer that answers synchronously by routing a reply back into the dispatcher.
fn echo_writer(
    dispatcher: Weak<Dispatcher>,
    reply: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
) -> Arc<dyn PacketWriter> {
    Arc::new(move |data: &[u8]| -> io::Result<()> {
        if let Some(d) = dispatcher.upgrade() {
            for packet in reply(data) {
                d.classify_and_route(Bytes::from(packet));
            }
        }
        Ok(())
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_overlap() {
    let (tx, _telemetry) = telemetry_channel(16);
    let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let writer: Arc<dyn PacketWriter> = {
        let in_flight = in_flight.clone();
        let max_in_flight = max_in_flight.clone();
        Arc::new(move |data: &[u8]| -> io::Result<()> {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            wire_tx
                .send(data.to_vec())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "responder gone"))
        })
    };
    let dispatcher = Arc::new(
        Dispatcher::new(MASK, tx)
            .with_answer_timeout(Duration::from_secs(2))
            .with_writer(writer),
    );

    // Control node stand-in: answers each command after a short delay.
    let responder = {
        let dispatcher = dispatcher.clone();
        let in_flight = in_flight.clone();
        tokio::spawn(async move {
            while let Some(cmd) = wire_rx.recv().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                dispatcher.classify_and_route(Bytes::from(vec![0x01, cmd[1]]));
            }
        })
    };

    let mut callers = Vec::new();
    for id in 0..8u8 {
        let dispatcher = dispatcher.clone();
        callers.push(tokio::spawn(async move {
            let answer = dispatcher.send(&[0x01, id]).await.expect("send");
            (id, answer)
        }));
    }
    for caller in callers {
        let (id, answer) = caller.await.unwrap();
        assert_eq!(answer.as_deref(), Some(&[0x01, id][..]), "caller {} got a foreign answer", id);
    }

    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    let stats = dispatcher.stats();
    assert_eq!(stats.sends, 8);
    assert_eq!(stats.timeouts, 0);
    responder.abort();
}

#[tokio::test]
async fn telemetry_during_send_does_not_satisfy_it() {
    let (tx, mut telemetry) = telemetry_channel(4);
    let dispatcher = Arc::new(Dispatcher::new(MASK, tx));
    dispatcher.set_writer(echo_writer(Arc::downgrade(&dispatcher), |_| {
        vec![vec![0xF1, 0xAA], vec![0x42]]
    }));

    let answer = dispatcher.send(&[0x42]).await.unwrap();
    assert_eq!(answer.as_deref(), Some(&[0x42][..]));
    assert_eq!(&telemetry.try_recv().unwrap()[..], &[0xF1u8, 0xAA]);
    assert!(telemetry.try_recv().is_err());
}

#[tokio::test]
async fn timeout_returns_none_and_late_answer_is_discarded() {
    let (tx, _telemetry) = telemetry_channel(4);
    let dispatcher = Arc::new(
        Dispatcher::new(MASK, tx).with_answer_timeout(Duration::from_millis(50)),
    );
    // 0x10 is never answered, anything else gets `cmd | 0x20`.
    dispatcher.set_writer(echo_writer(Arc::downgrade(&dispatcher), |cmd| {
        if cmd[0] == 0x10 {
            Vec::new()
        } else {
            vec![vec![cmd[0] | 0x20]]
        }
    }));

    assert_eq!(dispatcher.send(&[0x10]).await.unwrap(), None);
    assert_eq!(dispatcher.stats().timeouts, 1);

    // Answer to the abandoned command shows up after its caller left.
    assert_eq!(
        dispatcher.classify_and_route(Bytes::from_static(&[0x05])),
        Route::Answer
    );

    let answer = dispatcher.send(&[0x11]).await.unwrap();
    assert_eq!(answer.as_deref(), Some(&[0x31][..]));
    let stats = dispatcher.stats();
    assert_eq!(stats.stale_discarded, 1);
    assert_eq!(stats.sends, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn other_caller_proceeds_after_a_timeout() {
    let (tx, _telemetry) = telemetry_channel(4);
    let dispatcher = Arc::new(
        Dispatcher::new(MASK, tx).with_answer_timeout(Duration::from_millis(50)),
    );
    dispatcher.set_writer(echo_writer(Arc::downgrade(&dispatcher), |cmd| {
        if cmd[0] == 0x10 {
            Vec::new()
        } else {
            vec![vec![cmd[0] | 0x20]]
        }
    }));

    let first = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.send(&[0x10]).await })
    };
    assert_eq!(first.await.unwrap().unwrap(), None);

    let second = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.send(&[0x12]).await })
    };
    let answer = tokio::time::timeout(Duration::from_millis(500), second)
        .await
        .expect("second caller stuck behind the timed out one")
        .unwrap()
        .expect("second caller must not fail");
    assert_eq!(answer.as_deref(), Some(&[0x32][..]));
    let stats = dispatcher.stats();
    assert_eq!(stats.sends, 2);
    assert_eq!(stats.timeouts, 1);
}

#[tokio::test]
async fn full_telemetry_queue_drops_excess() {
    const CAPACITY: usize = 4;
    let (tx, mut telemetry) = telemetry_channel(CAPACITY);
    let dispatcher = Dispatcher::new(MASK, tx);

    for i in 0..=CAPACITY as u8 {
        assert_eq!(
            dispatcher.classify_and_route(Bytes::from(vec![0xF0, i])),
            Route::Telemetry
        );
    }
    let stats = dispatcher.stats();
    assert_eq!(stats.telemetry_routed, CAPACITY as u64);
    assert_eq!(stats.telemetry_dropped, 1);

    for i in 0..CAPACITY as u8 {
        assert_eq!(&telemetry.recv().await.unwrap()[..], &[0xF0u8, i]);
    }
    assert!(telemetry.try_recv().is_err());
}

#[tokio::test]
async fn routing_is_not_held_up_by_a_pending_send() {
    let (tx, mut telemetry) = telemetry_channel(64);
    let dispatcher = Arc::new(
        Dispatcher::new(MASK, tx)
            .with_answer_timeout(Duration::from_millis(300))
            .with_writer(Arc::new(|_: &[u8]| -> io::Result<()> { Ok(()) })),
    );

    let pending = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.send(&[0x01]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    for i in 0..32u8 {
        dispatcher.classify_and_route(Bytes::from(vec![0xF3, i]));
    }
    for _ in 0..32 {
        assert!(telemetry.try_recv().is_ok());
    }
    assert!(!pending.is_finished());
    assert_eq!(pending.await.unwrap().unwrap(), None);
}
