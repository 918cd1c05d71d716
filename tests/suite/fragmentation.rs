//! Chunk boundaries never change the outcome.
//!
//! Every fixture is driven whole, then re-driven under two-way splits at every
//! byte offset and under seeded random chunkings; the resulting sessions must
//! be equal.

use orchat_engine::{StreamOutcome, select_message};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::{FIXTURES, drive_body, drive_chunks, fixture, split_at_all, target};

#[tokio::test]
async fn every_two_way_split_matches_whole_body() {
    for name in FIXTURES {
        let body = fixture(name);
        let (expected_outcome, expected) = drive_body(&body, None).await;
        let bytes = body.as_bytes();

        for cut in 1..bytes.len() {
            let (outcome, state) = drive_chunks(split_at_all(bytes, &[cut]), None).await;
            assert_eq!(outcome, expected_outcome, "{name}: split at {cut}");
            assert_eq!(state, expected, "{name}: split at {cut}");
        }
    }
}

#[tokio::test]
async fn seeded_random_chunkings_match_whole_body() {
    let mut rng = StdRng::seed_from_u64(0x6f72_6368);
    for name in FIXTURES {
        let body = fixture(name);
        let (expected_outcome, expected) = drive_body(&body, None).await;
        let bytes = body.as_bytes();

        for round in 0..50 {
            let mut cuts = Vec::new();
            let mut at = 0;
            loop {
                at += rng.gen_range(1..=32);
                if at >= bytes.len() {
                    break;
                }
                cuts.push(at);
            }
            let (outcome, state) = drive_chunks(split_at_all(bytes, &cuts), None).await;
            assert_eq!(outcome, expected_outcome, "{name}: round {round}");
            assert_eq!(state, expected, "{name}: round {round} cuts {cuts:?}");
        }
    }
}

#[tokio::test]
async fn single_byte_chunks_keep_multibyte_text_intact() {
    let body = fixture("utf8.sse");
    let chunks = body.bytes().map(|b| vec![b]).collect();
    let (outcome, state) = drive_chunks(chunks, None).await;

    assert_eq!(outcome, StreamOutcome::Completed);
    let message = select_message(&state, &target()).unwrap();
    assert_eq!(message.content_text, "Grüße, 世界 🌍 and naïve café 😀");
}

#[tokio::test]
async fn splits_inside_a_code_point_are_reassembled() {
    let body = fixture("utf8.sse");
    let bytes = body.as_bytes();
    let emoji = body.find('🌍').unwrap();

    for offset in 1..4 {
        let (_, state) = drive_chunks(split_at_all(bytes, &[emoji + offset]), None).await;
        let message = select_message(&state, &target()).unwrap();
        assert!(message.content_text.contains("世界 🌍"), "offset {offset}");
    }
}

#[tokio::test]
async fn crlf_line_endings_decode_like_lf() {
    for name in FIXTURES {
        let body = fixture(name);
        let crlf = body.replace('\n', "\r\n");
        let (lf_outcome, lf_state) = drive_body(&body, None).await;
        let (crlf_outcome, crlf_state) = drive_body(&crlf, None).await;

        assert_eq!(crlf_outcome, lf_outcome, "{name}");
        assert_eq!(crlf_state, lf_state, "{name}");

        // A split between `\r` and `\n` is still one line ending.
        let cr = crlf.find('\r').unwrap();
        let (_, split_state) = drive_chunks(split_at_all(crlf.as_bytes(), &[cr + 1]), None).await;
        assert_eq!(split_state, lf_state, "{name}: split inside CRLF");
    }
}
