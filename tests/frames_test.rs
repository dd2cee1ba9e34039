mod common;

use common::*;
use hub_writer::hub::{FrameSink, MemoryHub};
use hub_writer::message::{FrameDecoder, FrameEncoder, FrameReader, DEFAULT_DELIMITER};
use hub_writer::table::MemoryRowSource;
use hub_writer::ExportCoordinator;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;

#[tokio::test]
async fn test_export_frames_then_publish_frames() {
    // Driver side: table rows to a frame stream.
    let encoder = FrameEncoder::new(DEFAULT_DELIMITER).unwrap();
    let sink = Arc::new(FrameSink::new("frames", Vec::<u8>::new(), encoder, 1_046_528));
    let mut driver = ExportCoordinator::new(sink.clone(), test_options(2));

    let source = MemoryRowSource::new(
        ["id", "key"],
        vec![["1", "a"], ["2", "b"], ["3", "a"], ["4", "a"]],
    );
    let summary = driver.run(source, row_mapper(&["id", "key"], Some("key"))).await.unwrap();
    assert_eq!(summary.messages_sent, 4);
    drop(driver);

    let frames = Arc::try_unwrap(sink).ok().expect("sink still shared").into_inner();
    let text = String::from_utf8(frames.clone()).unwrap();
    assert_eq!(text.matches(DEFAULT_DELIMITER).count(), 4);

    // Worker side: frame stream to the hub.
    let hub = Arc::new(MemoryHub::new());
    let mut worker = ExportCoordinator::new(hub.clone(), test_options(10));
    let decoder = FrameDecoder::new(DEFAULT_DELIMITER).unwrap();
    let reader = FrameReader::new(Cursor::new(frames), decoder);
    let summary = worker.run_frames(reader).await.unwrap();

    assert_eq!(summary.rows_read, 4);
    let sent = hub.sent();
    let a: Vec<_> = sent
        .iter()
        .filter(|b| b.partition_key.as_deref() == Some("a"))
        .flat_map(|b| b.bodies.clone())
        .collect();
    assert_eq!(
        a,
        vec![
            json!({"id": "1", "key": "a"}),
            json!({"id": "3", "key": "a"}),
            json!({"id": "4", "key": "a"}),
        ]
    );
    assert_eq!(all_bodies(&sent).len(), 4);
}

#[tokio::test]
async fn test_publish_frames_rejects_malformed_frame() {
    let input = format!("{{\"body\": 1}}{0}not json{0}", DEFAULT_DELIMITER);
    let hub = Arc::new(MemoryHub::new());
    let mut worker = ExportCoordinator::new(hub.clone(), test_options(10));
    let reader = FrameReader::new(
        Cursor::new(input.into_bytes()),
        FrameDecoder::new(DEFAULT_DELIMITER).unwrap(),
    );

    let err = worker.run_frames(reader).await.unwrap_err();
    assert!(!err.is_user_error());
    assert_eq!(err.exit_code(), 2);
    assert_eq!(hub.close_calls(), 1);
}
