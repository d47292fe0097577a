//! Client, channel and sink together on the synthetic device

mod common;

use common::{config_for, spawn_server, FAST_FRAMES, FRAME};
use cosyvoice_core::{
    Error, FrameSink, PlaybackStatus, Result, SinkConfig, SpeechPipeline,
    StatusNotifier, StreamConfig, StreamEvent, StreamingAudioSink, SynthesisRequest,
    SynthesisStreamClient, SyntheticFocus, SyntheticOutput,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Rig {
    output: SyntheticOutput,
    focus: SyntheticFocus,
    pipeline: SpeechPipeline,
}

fn rig(config: StreamConfig) -> Rig {
    let output = SyntheticOutput::new();
    let focus = SyntheticFocus::new();
    let pipeline =
        SpeechPipeline::with_focus(config, output.clone(), Arc::new(focus.clone())).unwrap();
    Rig {
        output,
        focus,
        pipeline,
    }
}

fn request_to(addr: SocketAddr, path: &str, text: &str) -> SynthesisRequest {
    SynthesisRequest::new(text, "default", &format!("http://{}{}", addr, path)).unwrap()
}

/// Poll until the synthetic device has been handed at least `bytes`
async fn wait_for_played(output: &SyntheticOutput, bytes: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while output.log().played.len() < bytes {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("device never received audio");
}

#[tokio::test]
async fn test_full_stream_is_played_and_released() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/a"));

    rig.pipeline.speak("안녕하세요").await.unwrap();

    let log = rig.output.log();
    assert_eq!(log.played.len(), 9600);
    assert_eq!(&log.played[..FRAME], &[1u8; FRAME][..]);
    assert_eq!(&log.played[2 * FRAME..], &[3u8; FRAME][..]);
    assert_eq!(log.opened, 1);
    assert_eq!(log.started, 1);
    assert_eq!(log.flushed, 1);
    assert_eq!(log.open_tracks(), 0);
    assert_eq!(rig.focus.counts(), (1, 1));
    assert_eq!(rig.pipeline.status(), PlaybackStatus::Idle);
}

#[tokio::test]
async fn test_rejected_request_never_opens_device() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/b"));

    let result = rig.pipeline.speak("hello").await;

    assert_eq!(result, Err(Error::ServerRejected(500)));
    assert_eq!(rig.output.log().opened, 0);
    assert_eq!(rig.focus.counts(), (0, 0));
    assert_eq!(
        rig.pipeline.status(),
        PlaybackStatus::Error(Error::ServerRejected(500))
    );
}

#[tokio::test]
async fn test_short_body_below_pre_roll_still_plays() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/c"));

    rig.pipeline.speak("hi").await.unwrap();

    let log = rig.output.log();
    assert_eq!(log.played, (0u8..13).collect::<Vec<_>>());
    assert_eq!(log.writes, vec![13]);
    assert_eq!(rig.focus.counts(), (1, 1));
}

#[tokio::test]
async fn test_cancel_tears_down_device() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/d"));

    let speak = rig.pipeline.speak("hello");
    let cancel = async {
        wait_for_played(&rig.output, 2 * FRAME).await;
        rig.pipeline.cancel();
    };
    let (result, ()) = tokio::join!(speak, cancel);

    assert_eq!(result, Err(Error::Cancelled));
    let log = rig.output.log();
    assert_eq!(log.played.len(), 2 * FRAME);
    assert_eq!(log.stopped, 1);
    assert_eq!(log.open_tracks(), 0);
    assert!(!rig.focus.is_held());
    assert_eq!(rig.focus.counts(), (1, 1));
    assert_eq!(rig.pipeline.status(), PlaybackStatus::Error(Error::Cancelled));
}

#[tokio::test]
async fn test_cancel_silences_queued_frames() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/fast"));
    // Slow enough that the channel fills while the device renders
    rig.output.set_write_delay(Duration::from_millis(60));

    let speak = rig.pipeline.speak("hello");
    let cancel = async {
        wait_for_played(&rig.output, FRAME).await;
        let at_cancel = rig.output.log().played.len();
        rig.pipeline.cancel();
        at_cancel
    };
    let (result, at_cancel) = tokio::join!(speak, cancel);

    assert_eq!(result, Err(Error::Cancelled));
    let log = rig.output.log();
    // At most the write already in progress completes
    let after = log.played.len() - at_cancel;
    assert!(after <= 2 * FRAME, "{} bytes written after cancel", after);
    assert!(log.played.len() < FAST_FRAMES * FRAME);
    assert_eq!(log.flushed, 0);
    assert_eq!(log.stopped, 1);
    assert_eq!(log.open_tracks(), 0);
    assert_eq!(rig.focus.counts(), (1, 1));
    assert_eq!(rig.pipeline.status(), PlaybackStatus::Error(Error::Cancelled));
}

#[tokio::test]
async fn test_playback_continues_after_cancelled_utterance() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/fast"));
    rig.output.set_write_delay(Duration::from_millis(10));

    let speak = rig.pipeline.speak("hello");
    let cancel = async {
        wait_for_played(&rig.output, FRAME).await;
        rig.pipeline.cancel();
    };
    let (result, ()) = tokio::join!(speak, cancel);
    assert_eq!(result, Err(Error::Cancelled));

    let before = rig.output.log().played.len();
    rig.pipeline
        .speak_request(request_to(addr, "/a", "again"))
        .await
        .unwrap();

    let log = rig.output.log();
    assert_eq!(log.played.len() - before, 9600);
    assert_eq!(rig.focus.counts(), (2, 2));
    assert_eq!(rig.pipeline.status(), PlaybackStatus::Idle);
}

/// Counts events once the bounded channel has taken them
struct CountingSink {
    tx: mpsc::Sender<StreamEvent>,
    sent: Arc<AtomicUsize>,
}

impl FrameSink for CountingSink {
    fn accept(&mut self, event: StreamEvent) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.tx.send(event).await.map_err(|_| Error::Cancelled)?;
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_reader_never_runs_ahead_of_device() {
    let addr = spawn_server().await;
    let capacity = 2;
    let config = StreamConfig {
        channel_capacity: capacity,
        ..config_for(addr, "/fast")
    };
    let client = SynthesisStreamClient::new(&config).unwrap();

    let output = SyntheticOutput::new();
    output.set_write_delay(Duration::from_millis(5));
    let focus = SyntheticFocus::new();
    let sink_config = SinkConfig::from(&config);

    let (tx, mut rx) = mpsc::channel(capacity);
    let sent = Arc::new(AtomicUsize::new(0));
    let mut sink = CountingSink {
        tx,
        sent: sent.clone(),
    };

    let device_output = output.clone();
    let device_focus = focus.clone();
    let device_sent = sent.clone();
    let device = tokio::task::spawn_blocking(move || {
        let mut sink = StreamingAudioSink::new(
            device_output,
            Arc::new(device_focus),
            sink_config,
            StatusNotifier::new(),
        );
        let mut received = 0;
        let mut max_lead = 0;
        while let Some(event) = rx.blocking_recv() {
            received += 1;
            max_lead = max_lead.max(device_sent.load(Ordering::SeqCst).saturating_sub(received));
            sink.on_event(event).unwrap();
        }
        max_lead
    });

    client
        .stream(request_to(addr, "/fast", "hello"), &mut sink)
        .await
        .unwrap();
    drop(sink);
    let max_lead = device.await.unwrap();

    assert!(max_lead <= capacity, "reader ran {} events ahead", max_lead);
    assert_eq!(output.log().played.len(), FAST_FRAMES * FRAME);
    assert_eq!(sent.load(Ordering::SeqCst), FAST_FRAMES + 1);
    assert_eq!(focus.counts(), (1, 1));
}

#[tokio::test]
async fn test_new_utterance_supersedes_old() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/fast"));
    rig.output.set_write_delay(Duration::from_millis(20));

    let first = rig.pipeline.speak_request(request_to(addr, "/fast", "first"));
    let second = async {
        wait_for_played(&rig.output, FRAME).await;
        rig.pipeline
            .speak_request(request_to(addr, "/a", "second"))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first, Err(Error::Cancelled));
    assert_eq!(second, Ok(()));

    let log = rig.output.log();
    assert_eq!(log.opened, 2);
    assert_eq!(log.open_tracks(), 0);
    assert_eq!(rig.focus.counts(), (2, 2));
    // The first stream was cut within a couple of frames, not played out
    let superseded = log.played.iter().filter(|&&b| b == 7).count();
    assert!(superseded <= 3 * FRAME, "{} bytes of the old stream", superseded);
    // The second stream played in full after the first was cut
    let tail = &log.played[log.played.len() - 3 * FRAME..];
    assert_eq!(&tail[..FRAME], &[1u8; FRAME][..]);
    assert_eq!(&tail[2 * FRAME..], &[3u8; FRAME][..]);
}

#[tokio::test]
async fn test_device_failure_is_reported_and_released() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/a"));
    rig.output.fail_writes();

    let result = rig.pipeline.speak("hello").await;

    assert!(matches!(result, Err(Error::DeviceWriteFailure(_))));
    let log = rig.output.log();
    assert!(log.played.is_empty());
    assert_eq!(log.open_tracks(), 0);
    assert_eq!(rig.focus.counts(), (1, 1));
}

#[tokio::test]
async fn test_device_open_failure_then_recovery() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/a"));
    rig.output.fail_next_open();

    let result = rig.pipeline.speak("hello").await;
    assert!(matches!(result, Err(Error::DeviceInitFailure(_))));
    assert_eq!(rig.focus.counts(), (1, 1));

    rig.pipeline.speak("hello again").await.unwrap();
    assert_eq!(rig.output.log().played.len(), 9600);
    assert_eq!(rig.focus.counts(), (2, 2));
}

#[tokio::test]
async fn test_consecutive_utterances_pair_focus() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/a"));

    for _ in 0..3 {
        rig.pipeline.speak("again").await.unwrap();
    }

    assert_eq!(rig.output.log().played.len(), 3 * 9600);
    assert_eq!(rig.focus.counts(), (3, 3));
}

#[tokio::test]
async fn test_shutdown_mid_stream_releases_device() {
    let addr = spawn_server().await;
    let rig = rig(config_for(addr, "/d"));

    let speak = rig.pipeline.speak("hello");
    let stop = async {
        wait_for_played(&rig.output, FRAME).await;
        rig.pipeline.shutdown();
    };
    let (result, ()) = tokio::join!(speak, stop);
    assert_eq!(result, Err(Error::Cancelled));

    let Rig {
        output,
        focus,
        pipeline,
    } = rig;
    // Dropping joins the playback thread
    drop(pipeline);

    assert_eq!(output.log().open_tracks(), 0);
    assert!(!focus.is_held());
    assert_eq!(focus.counts(), (1, 1));
}
