use crate::*;

use multiboot_core::wire::MAX_IMAGE_SIZE;
use multiboot_session::{Progress, Session};
use tokio::sync::mpsc;

// ── Known transfers ─────────────────────────────────────────────────────────

/// Zero image of 0xC4 bytes, token 0x73AB0000, crcB 0xCD: every word on the
/// link is known in advance.
#[tokio::test(start_paused = true)]
async fn zero_image_word_sequence() {
    let (peer, log) = SimulatedPeer::new(Script::default());
    let report = Session::new(peer, zero_image(0xC4), quick_options())
        .run()
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert!(log.violations.is_empty(), "{:?}", log.violations);
    assert!(log.booted);
    assert!(log.released);

    // Four handshake polls, then boot mode, 96 zero halfwords, header end.
    let mut expected = vec![0x6202; 4];
    expected.push(0x6102);
    expected.extend(std::iter::repeat(0).take(0x60));
    expected.extend([0x6200, 0x6202, 0x63D1, 0x63D1, 0x64BA, 0x3FFF_FFD0]);
    assert_eq!(&log.sent[..expected.len()], &expected[..]);

    let payload_start = expected.len();
    assert_eq!(log.sent[payload_start], 0x2598_738B);
    assert_eq!(log.payload, vec![0; 4]);

    // Acknowledgment, CRC exchange, CRC.
    let tail = &log.sent[payload_start + 4..];
    assert_eq!(tail, &[0x0065, 0x0065, 0x0065, 0x0066, 0xEEEF]);

    assert_eq!(report.crc, 0xEEEF);
    assert_eq!(report.peer_crc, 0xEEEF);
    assert!(report.crc_matched);
    assert_eq!(report.words_sent, 4);
    assert_eq!(report.padded_len, 0xD0);
    assert_eq!(report.handshake_polls, 4);
    assert_eq!(report.ack_polls, 2);
}

#[tokio::test(start_paused = true)]
async fn header_only_image_skips_payload() {
    let (peer, log) = SimulatedPeer::new(Script::default());
    let report = Session::new(peer, zero_image(0xC0), quick_options())
        .run()
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert!(log.violations.is_empty(), "{:?}", log.violations);
    assert_eq!(log.length_word, Some(0x3FFF_FFCC));
    assert!(log.payload.is_empty());
    assert_eq!(report.words_sent, 0);
    assert_eq!(report.crc, 0x6885);
    assert_eq!(log.host_crc, Some(0x6885));
}

#[tokio::test(start_paused = true)]
async fn short_image_sends_zero_filled_header() {
    let (peer, log) = SimulatedPeer::new(Script::default());
    let image = patterned_image(0x20);
    let report = Session::new(peer, image, quick_options()).run().await.unwrap();

    let log = log.lock().unwrap();
    assert!(log.violations.is_empty(), "{:?}", log.violations);
    assert_eq!(log.header.len(), 0x60);
    assert_eq!(log.header[0], u16::from_le_bytes([3, 10]));
    assert!(log.header[0x10..].iter().all(|h| *h == 0));
    assert_eq!(report.words_sent, 0);
    assert_eq!(report.image_len, 0x20);
    assert!(report.crc_matched);
}

// ── Payload ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn peer_recovers_image_bytes() {
    let image = patterned_image(0x1234);
    let expected = expected_payload(&image);
    let header: Vec<u16> = image.header_halfwords().collect();

    let (peer, log) = SimulatedPeer::new(Script {
        token: 0x7342_1234,
        crc_b: 0x5A,
        ..Script::default()
    });
    let report = Session::new(peer, image, quick_options()).run().await.unwrap();

    let log = log.lock().unwrap();
    assert!(log.violations.is_empty(), "{:?}", log.violations);
    assert_eq!(log.header, header);
    assert_eq!(log.crc_a, Some(0x51));
    assert_eq!(log.payload, expected);
    // 0x1234 rounds up to 0x1240; the last 12 bytes are zero padding.
    assert_eq!(report.padded_len, 0x1240);
    assert_eq!(report.words_sent, (0x1240 - 0xC0) / 4);
    assert_eq!(log.payload.last(), Some(&0));
    assert_eq!(log.peer_crc, log.host_crc);
    assert!(report.crc_matched);
}

#[tokio::test(start_paused = true)]
async fn largest_image_crosses_echo_wrap() {
    let image = patterned_image(MAX_IMAGE_SIZE);
    let expected = expected_payload(&image);

    let (peer, log) = SimulatedPeer::new(Script::default());
    let report = Session::new(peer, image, quick_options()).run().await.unwrap();

    let log = log.lock().unwrap();
    assert!(log.violations.is_empty(), "{:?}", log.violations);
    assert_eq!(report.words_sent as usize, (MAX_IMAGE_SIZE - 0xC0) / 4);
    assert_eq!(log.payload.len(), expected.len());
    assert!(log.payload == expected);
    assert!(report.crc_matched);
}

#[tokio::test(start_paused = true)]
async fn progress_is_published_on_interval() {
    let (peer, _log) = SimulatedPeer::new(Script::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let options = SessionOptions {
        progress_interval: 0x1000,
        ..quick_options()
    };
    Session::new(peer, patterned_image(0x4000), options)
        .with_progress(tx)
        .run()
        .await
        .unwrap();

    let mut seen: Vec<Progress> = Vec::new();
    while let Some(p) = rx.recv().await {
        seen.push(p);
    }
    let sent: Vec<u32> = seen.iter().map(|p| p.sent).collect();
    assert_eq!(sent, vec![0x1000, 0x2000, 0x3000, 0x4000]);
    assert!(seen.iter().all(|p| p.total == 0x4000));
}

#[tokio::test(start_paused = true)]
async fn report_serializes_for_json_output() {
    let (peer, _log) = SimulatedPeer::new(Script::default());
    let report = Session::new(peer, zero_image(0xC4), quick_options())
        .run()
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["crc"], 0xEEEF);
    assert_eq!(json["crc_matched"], true);
    assert_eq!(json["words_sent"], 4);
    assert_eq!(json["image_len"], 0xC4);
}

#[tokio::test(start_paused = true)]
async fn settle_delay_holds_link_after_final_exchange() {
    let (peer, log) = SimulatedPeer::new(Script {
        ready_after: 0,
        ack_after: 0,
        ..Script::default()
    });
    let options = SessionOptions {
        settle: Duration::from_secs(1),
        ..quick_options()
    };
    let started = tokio::time::Instant::now();
    Session::new(peer, zero_image(0xC0), options).run().await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(log.lock().unwrap().released);
}

// ── Runtime ─────────────────────────────────────────────────────────────────

/// Holds the first payload exchange until another task on the runtime answers.
struct Gated {
    peer: SimulatedPeer,
    exchanges: usize,
    gate_at: usize,
    reached: Option<tokio::sync::oneshot::Sender<()>>,
    answer: std::sync::mpsc::Receiver<()>,
    answered: Arc<std::sync::atomic::AtomicBool>,
}

impl Transport for Gated {
    fn exchange(&mut self, word: u32) -> Result<u32, TransportError> {
        if self.exchanges == self.gate_at {
            if let Some(reached) = self.reached.take() {
                let _ = reached.send(());
            }
            let ok = self.answer.recv_timeout(Duration::from_secs(5)).is_ok();
            self.answered.store(ok, std::sync::atomic::Ordering::SeqCst);
        }
        self.exchanges += 1;
        self.peer.exchange(word)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn payload_exchanges_leave_the_runtime_free() {
    let (peer, log) = SimulatedPeer::new(Script {
        ready_after: 0,
        ack_after: 0,
        ..Script::default()
    });
    let (reached_tx, reached_rx) = tokio::sync::oneshot::channel();
    let (answer_tx, answer_rx) = std::sync::mpsc::channel();
    let answered = Arc::new(std::sync::atomic::AtomicBool::new(false));

    tokio::spawn(async move {
        if reached_rx.await.is_ok() {
            let _ = answer_tx.send(());
        }
    });

    // One poll, boot mode, 96 halfwords and 6 more commands precede the payload.
    let link = Gated {
        peer,
        exchanges: 0,
        gate_at: 104,
        reached: Some(reached_tx),
        answer: answer_rx,
        answered: Arc::clone(&answered),
    };
    // The test body runs outside the worker pool; the session must not.
    let session = Session::new(link, patterned_image(0x200), quick_options());
    let report = tokio::spawn(session.run()).await.unwrap().unwrap();

    assert!(answered.load(std::sync::atomic::Ordering::SeqCst));
    assert!(report.crc_matched);
    assert!(log.lock().unwrap().released);
}
