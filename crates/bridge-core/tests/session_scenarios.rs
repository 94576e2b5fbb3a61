//! End-to-end session scenarios over the loopback link

use proptest::prelude::*;
use scobridge_codec_core::CodecId;
use scobridge_core::{
    signal_source, DevicePlaybackSink, ElasticBuffer, LinkTransport, LoopbackLink,
    MemoryOutputDevice, PatternMode, Session, SessionConfig, SessionState,
};

fn run(session: &mut Session, link: &mut LoopbackLink, frames: usize) -> Vec<(u64, u64)> {
    let mut reports = Vec::new();
    for _ in 0..frames {
        if let Some(report) = session.send_frame(link, 1).unwrap() {
            reports.push((report.sent, report.received));
        }
        while let Some(packet) = link.receive() {
            session.receive_packet(&packet);
        }
    }
    reports
}

#[test]
fn five_hundred_sine_frames_give_five_reports() {
    let mut session = Session::new(SessionConfig::new(PatternMode::Sine).with_report_period(100))
        .unwrap();
    session.set_codec(CodecId::Cvsd);
    let mut link = LoopbackLink::new(24);

    let reports = run(&mut session, &mut link, 500);

    assert_eq!(reports.len(), 5);
    for (i, (sent, received)) in reports.iter().enumerate() {
        assert_eq!(*sent, (i as u64 + 1) * 100);
        assert!(received <= sent);
    }
}

#[test]
fn clean_counter_session_has_no_byte_errors() {
    let config = SessionConfig {
        receive_window_bytes: 1000,
        ..SessionConfig::new(PatternMode::Counter)
    };
    let mut session = Session::new(config).unwrap();
    session.set_codec(CodecId::Cvsd);
    let mut link = LoopbackLink::new(24);

    let mut windows = 0;
    for _ in 0..300 {
        session.send_frame(&mut link, 1).unwrap();
        while let Some(packet) = link.receive() {
            let inspection = session.receive_packet(&packet).unwrap();
            assert_eq!(inspection.byte_errors, 0);
            if let Some(summary) = inspection.summary {
                assert_eq!(summary.byte_errors, 0);
                windows += 1;
            }
        }
    }

    assert!(windows >= 6);
    assert_eq!(session.close().totals.byte_errors, 0);
}

#[test]
fn flagged_frames_do_not_count_as_byte_errors() {
    for mode in [PatternMode::Counter, PatternMode::Ascii, PatternMode::Fill55] {
        let mut session = Session::new(SessionConfig::new(mode)).unwrap();
        session.set_codec(CodecId::Cvsd);
        let mut link = LoopbackLink::new(24).with_seed(3).with_corrupt_every(7);

        run(&mut session, &mut link, 70);

        let totals = session.close().totals;
        assert_eq!(totals.corrupted_frames, 10, "{}", mode);
        assert_eq!(totals.byte_errors, 0, "{}", mode);
    }
}

#[test]
fn bit_errors_show_up_as_byte_errors() {
    let mut session = Session::new(SessionConfig::new(PatternMode::Fill00)).unwrap();
    session.set_codec(CodecId::Cvsd);
    let mut link = LoopbackLink::new(24).with_seed(11).with_bit_error_rate(0.01);

    run(&mut session, &mut link, 200);

    // A single flip of 0x00 never lands on another accepted fill byte
    let summary = session.close();
    assert!(link.bit_errors() > 0);
    assert!(summary.totals.byte_errors > 0);
    assert!(summary.totals.byte_errors <= link.bit_errors());
}

#[test]
fn counter_bit_errors_cost_at_most_two_byte_errors_each() {
    let mut session = Session::new(SessionConfig::new(PatternMode::Counter)).unwrap();
    session.set_codec(CodecId::Cvsd);
    let mut link = LoopbackLink::new(24).with_seed(17).with_bit_error_rate(0.002);

    run(&mut session, &mut link, 300);

    // The garbled byte and its follower both miss; the stream then resyncs
    let totals = session.close().totals;
    assert!(link.bit_errors() > 0);
    assert!(totals.byte_errors > 0);
    assert!(totals.byte_errors <= 2 * link.bit_errors());
    assert_eq!(totals.corrupted_frames, 0);
}

#[test]
fn ascii_bit_errors_stay_in_their_frame() {
    let mut session = Session::new(SessionConfig::new(PatternMode::Ascii)).unwrap();
    session.set_codec(CodecId::Cvsd);
    let mut link = LoopbackLink::new(24).with_seed(23).with_bit_error_rate(0.002);

    run(&mut session, &mut link, 300);

    let totals = session.close().totals;
    assert!(link.bit_errors() > 0);
    assert!(totals.byte_errors > 0);
    assert!(totals.byte_errors <= link.bit_errors());
}

#[test]
fn msbc_sine_session_decodes_every_unit() {
    let mut session = Session::new(SessionConfig::new(PatternMode::Sine)).unwrap();
    session.set_codec(CodecId::Msbc);
    let mut link = LoopbackLink::new(24);

    // 250 packets are 6000 bytes, exactly 100 H2 units
    run(&mut session, &mut link, 250);

    let summary = session.close();
    assert_eq!(summary.decoder.good_frames, 100);
    assert_eq!(summary.decoder.bad_frames, 0);
    assert_eq!(summary.encoder_underruns, 0);
}

#[test]
fn msbc_flagged_packets_are_concealed() {
    let mut session = Session::new(SessionConfig::new(PatternMode::Sine)).unwrap();
    session.set_codec(CodecId::Msbc);
    let mut link = LoopbackLink::new(24).with_seed(5).with_corrupt_every(25);

    run(&mut session, &mut link, 250);

    let summary = session.close();
    let decoder = summary.decoder;
    assert_eq!(summary.totals.corrupted_frames, 10);
    assert!(decoder.good_frames >= 70);
}

#[test]
fn wav_capture_stops_at_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.wav");
    let mut config = SessionConfig::new(PatternMode::Sine).with_wav_capture(&path);
    config.capture.duration_secs = 1;

    let mut session = Session::new(config).unwrap();
    session.set_codec(CodecId::Msbc);
    let mut link = LoopbackLink::new(24);
    run(&mut session, &mut link, 1000);

    assert_eq!(session.state(), SessionState::Closed);
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 16000);
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert_eq!(reader.len(), 16000);
}

#[test]
fn encoded_captures_record_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out.msbc");
    let in_path = dir.path().join("in.msbc");
    let mut config = SessionConfig::new(PatternMode::Sine);
    config.capture.encoded_out_path = Some(out_path.clone());
    config.capture.encoded_in_path = Some(in_path.clone());

    let mut session = Session::new(config).unwrap();
    session.set_codec(CodecId::Msbc);
    let mut link = LoopbackLink::new(24);
    run(&mut session, &mut link, 50);
    session.close();

    let sent = std::fs::read(&out_path).unwrap();
    let received = std::fs::read(&in_path).unwrap();
    assert_eq!(sent.len(), 50 * 24);
    assert_eq!(sent, received);
    assert_eq!(&sent[..2], &[0x01, 0x08]);
}

#[test]
fn device_playback_through_session() {
    let device = MemoryOutputDevice::new();
    let mut session = Session::builder(SessionConfig::new(PatternMode::Sine))
        .with_sink(DevicePlaybackSink::new(device.clone()))
        .build()
        .unwrap();
    session.set_codec(CodecId::Cvsd);
    let mut link = LoopbackLink::new(24);

    // One frame is below the 40-byte prebuffer
    run(&mut session, &mut link, 1);
    assert_eq!(device.pull(), Some(0));

    run(&mut session, &mut link, 1);
    assert_eq!(device.pull(), Some(24));
    assert_eq!(device.pull(), Some(24));
    assert_eq!(device.pull(), Some(0));
    assert_eq!(device.played().len(), 4 * 24);

    session.close();
    assert!(!device.is_running());
}

#[test]
fn prebuffer_gate_then_fifo() {
    let mut buffer = ElasticBuffer::new(64, 16);
    buffer.write(&[1; 8]);

    let mut out = [9u8; 8];
    assert_eq!(buffer.read(&mut out), 0);
    assert_eq!(out, [0; 8]);

    buffer.write(&[2; 8]);
    let mut out = [0u8; 16];
    assert_eq!(buffer.read(&mut out), 16);
    assert_eq!(&out[..8], &[1; 8]);
    assert_eq!(&out[8..], &[2; 8]);
}

#[test]
fn closed_session_ignores_link_events() {
    let mut session = Session::new(SessionConfig::new(PatternMode::Ascii)).unwrap();
    session.set_codec(CodecId::Cvsd);
    let mut link = LoopbackLink::new(24);
    run(&mut session, &mut link, 3);
    let summary = session.close();

    run(&mut session, &mut link, 3);
    assert_eq!(link.sent(), 3);
    assert_eq!(session.close(), summary);
}

#[test]
fn loopback_packet_length_follows_payload() {
    let link = LoopbackLink::new(60);
    assert_eq!(link.packet_len(), 63);
}

proptest! {
    #[test]
    fn patterns_repeat_over_their_period(mode_index in 0usize..5, payload_len in 1usize..=60) {
        let mode = PatternMode::ALL[mode_index];
        let period = mode.period_frames(payload_len);
        let mut source = signal_source(mode);

        let first: Vec<Vec<u8>> = (0..period).map(|_| source.next(payload_len)).collect();
        let second: Vec<Vec<u8>> = (0..period).map(|_| source.next(payload_len)).collect();
        prop_assert_eq!(&first, &second);

        source.reset();
        let restarted: Vec<Vec<u8>> = (0..period).map(|_| source.next(payload_len)).collect();
        prop_assert_eq!(first, restarted);
    }
}
