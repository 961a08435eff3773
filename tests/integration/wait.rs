use crate::*;

use multiboot_session::{Phase, Poller, Session, SessionError, Shutdown};
use tokio::sync::broadcast;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn handshake_waits_without_limit_by_default() {
    let (peer, log) = SimulatedPeer::new(Script {
        ready_after: 1_000,
        ..Script::default()
    });
    let started = Instant::now();
    let report = Session::new(peer, zero_image(0xC0), quick_options())
        .run()
        .await
        .unwrap();

    assert_eq!(report.handshake_polls, 1_001);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(log.lock().unwrap().booted);
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_stops_before_boot_mode() {
    let (peer, log) = SimulatedPeer::new(Script {
        ready_after: u32::MAX,
        ..Script::default()
    });
    let options = SessionOptions {
        handshake: Poller::new(Some(Duration::from_secs(2))),
        ..quick_options()
    };
    let err = Session::new(peer, zero_image(0xC0), options)
        .run()
        .await
        .unwrap_err();

    match err {
        SessionError::TimedOut { phase, waited } => {
            assert_eq!(phase, Phase::Handshake);
            assert!(waited >= Duration::from_secs(2));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let log = log.lock().unwrap();
    assert!(log.released);
    assert!(log.sent.iter().all(|w| *w == 0x6202));
}

#[tokio::test(start_paused = true)]
async fn acknowledgment_timeout_after_full_payload() {
    let (peer, log) = SimulatedPeer::new(Script {
        ack_after: u32::MAX,
        ..Script::default()
    });
    let options = SessionOptions {
        acknowledge: Poller::new(Some(Duration::from_millis(500))),
        ..quick_options()
    };
    let image = patterned_image(0x200);
    let expected = expected_payload(&image);
    let err = Session::new(peer, image, options).run().await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::TimedOut { phase: Phase::Acknowledge, .. }
    ));
    let log = log.lock().unwrap();
    assert_eq!(log.payload, expected);
    assert_eq!(log.position(0x0066), None);
    assert!(log.released);
}

#[tokio::test(start_paused = true)]
async fn interrupt_cancels_handshake() {
    let (peer, log) = SimulatedPeer::new(Script {
        ready_after: u32::MAX,
        ..Script::default()
    });
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(55)).await;
        let _ = tx.send(());
    });

    let err = Session::new(peer, zero_image(0xC0), quick_options())
        .with_shutdown(Shutdown::new(rx))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Cancelled { phase: Phase::Handshake }));
    let log = log.lock().unwrap();
    assert!(log.released);
    // One poll every 10 ms until the signal lands during the sixth interval.
    assert_eq!(log.sent.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn interrupt_cancels_acknowledgment() {
    let (peer, log) = SimulatedPeer::new(Script {
        ack_after: u32::MAX,
        ..Script::default()
    });
    let (tx, rx) = broadcast::channel(1);
    let session = Session::new(peer, zero_image(0xC4), quick_options())
        .with_shutdown(Shutdown::new(rx));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let _ = tx.send(());
    });
    let err = session.run().await.unwrap_err();

    assert!(matches!(err, SessionError::Cancelled { phase: Phase::Acknowledge }));
    let log = log.lock().unwrap();
    assert_eq!(log.payload.len(), 4);
    assert!(!log.booted);
    assert!(log.released);
}

#[tokio::test(start_paused = true)]
async fn dropped_signal_counts_as_interrupt() {
    let (peer, log) = SimulatedPeer::new(Script {
        ready_after: u32::MAX,
        ..Script::default()
    });
    let (tx, rx) = broadcast::channel::<()>(1);
    drop(tx);

    let err = Session::new(peer, zero_image(0xC0), quick_options())
        .with_shutdown(Shutdown::new(rx))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Cancelled { phase: Phase::Handshake }));
    assert_eq!(log.lock().unwrap().sent, vec![0x6202]);
}

#[tokio::test(start_paused = true)]
async fn interrupt_after_ready_reply_does_not_cancel() {
    let (peer, log) = SimulatedPeer::new(Script {
        ready_after: 0,
        ack_after: 0,
        ..Script::default()
    });
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        // Lands in the interval after the first poll, which already matched.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = tx.send(());
    });

    let report = Session::new(peer, patterned_image(0x200), quick_options())
        .with_shutdown(Shutdown::new(rx))
        .run()
        .await
        .unwrap();

    assert_eq!(report.handshake_polls, 1);
    let log = log.lock().unwrap();
    assert!(log.booted);
    assert!(log.violations.is_empty(), "{:?}", log.violations);
}

#[tokio::test(start_paused = true)]
async fn interrupt_after_ack_reply_still_sends_crc() {
    let (peer, log) = SimulatedPeer::new(Script {
        ready_after: 0,
        ack_after: 0,
        ..Script::default()
    });
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        // Handshake ends at 10 ms; the payload is instant on paused time, so
        // this lands in the interval after the matched acknowledgment poll.
        tokio::time::sleep(Duration::from_millis(15)).await;
        let _ = tx.send(());
    });

    let report = Session::new(peer, patterned_image(0x200), quick_options())
        .with_shutdown(Shutdown::new(rx))
        .run()
        .await
        .unwrap();

    assert_eq!(report.ack_polls, 1);
    assert!(report.crc_matched);
    let log = log.lock().unwrap();
    assert_eq!(log.payload.len(), (0x200 - 0xC0) / 4);
    let tail = &log.sent[log.sent.len() - 3..];
    assert_eq!(tail, &[0x0065, 0x0066, u32::from(report.crc)]);
    assert!(log.booted);
}
