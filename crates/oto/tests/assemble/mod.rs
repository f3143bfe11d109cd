use oto::{
    dash::parse_audio_template, HttpClient, OtoError, TrackAssembler, Url,
};
use wiremock::MockServer;

use crate::{fixtures, AssertWrapper};

#[tokio::test]
async fn test_assemble_over_http() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    fixtures::mount_segments(&server, "/media", 3, None).await;

    let template = parse_audio_template(&fixtures::mpd(6))?.with_total_count(3);
    let base_url: Url = format!("{}/media/", server.uri()).parse()?;

    let dir = tempfile::tempdir()?;
    let output = dir.path().join("track.mp4");
    let mut progress = Vec::new();
    let track = TrackAssembler::new(HttpClient::default(), dir.path().join("scratch"))
        .assemble(&template, &base_url, 3, &output, |done, total| {
            progress.push(done as f32 / total as f32)
        })
        .await
        .assert_success();

    assert_eq!(track.path, output);
    assert_eq!(track.segments, 3);
    assert_eq!(std::fs::read(&output)?, fixtures::expected_track(3));
    assert_eq!(progress.len(), 3);
    assert_eq!(progress.last().copied(), Some(1.0));

    Ok(())
}

#[tokio::test]
async fn test_failed_segment_keeps_prefix() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    fixtures::mount_segments(&server, "/media", 3, Some(3)).await;

    let template = parse_audio_template(&fixtures::mpd(6))?;
    let base_url: Url = format!("{}/media/", server.uri()).parse()?;

    let dir = tempfile::tempdir()?;
    let output = dir.path().join("track.mp4");
    let result = TrackAssembler::new(HttpClient::default(), dir.path())
        .assemble(&template, &base_url, 3, &output, |_, _| {})
        .await;

    match result {
        Err(OtoError::SegmentDownloadError { number, source }) => {
            assert_eq!(number, 3);
            assert!(matches!(*source, OtoError::HttpError(status) if status == 404));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(std::fs::read(&output)?, fixtures::expected_track(2));

    Ok(())
}
