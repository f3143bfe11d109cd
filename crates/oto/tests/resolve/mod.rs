use std::sync::Arc;

use oto::{
    locate::AssetLocator, ContainerSource, ContentKeyState, HttpClient, KeyStore,
    KeyStoreSource, OtoError, ResolveEvent, ResolveHandle, ResolveRequest, ResolveStage,
    ResolvedAsset, Resolver, ResolverOptions, Url,
};
use wiremock::MockServer;

use crate::{fixtures, AssertWrapper};

/// Drain every event, then wait for the task.
async fn finish(mut handle: ResolveHandle) -> (Vec<ResolveEvent>, oto::OtoResult<ResolvedAsset>) {
    let mut events = Vec::new();
    while let Some(event) = handle.events().recv().await {
        events.push(event);
    }
    (events, handle.join().await)
}

async fn encrypted_asset(server: &MockServer, count: u64, missing: Option<u64>) {
    let wrapped = fixtures::wrap_key(&fixtures::AES_KEY, &fixtures::CONTENT_KEY);
    let envelope = fixtures::envelope(fixtures::NONCE, &wrapped);

    fixtures::mount_body(
        server,
        "/assets/master.blurl",
        fixtures::container("manifest.mpd", Some(&envelope)),
    )
    .await;
    fixtures::mount_body(
        server,
        "/assets/manifest.mpd",
        fixtures::mpd(40).into_bytes(),
    )
    .await;
    fixtures::mount_segments(server, "/assets", count, missing).await;
}

#[tokio::test]
async fn test_resolve_encrypted_asset() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    encrypted_asset(&server, 23, None).await;

    let dir = tempfile::tempdir()?;
    let store = KeyStore::from_bytes(&fixtures::key_store());
    let resolver = Resolver::new(HttpClient::default())
        .with_key_store(KeyStoreSource::Table(Arc::new(store)))
        .with_options(ResolverOptions {
            scratch_dir: Some(dir.path().join("scratch")),
            ..Default::default()
        });

    let output = dir.path().join("out").join("track.mp4");
    let handle = resolver.spawn(ResolveRequest {
        source: ContainerSource::Url(format!("{}/assets/master.blurl", server.uri()).parse()?),
        output: output.clone(),
    });
    let (events, result) = finish(handle).await;
    let asset = result.assert_success();

    assert_eq!(asset.key, ContentKeyState::Key(fixtures::CONTENT_KEY));
    assert_eq!(asset.segment_count, 23);
    assert_eq!(asset.track.path, output);
    assert_eq!(std::fs::read(&output)?, fixtures::expected_track(23));

    let progress: Vec<f32> = events
        .iter()
        .filter_map(|event| match event {
            ResolveEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 24);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(100.0));

    assert!(events.iter().any(|event| matches!(
        event,
        ResolveEvent::Status(message) if message.starts_with("Found 23 segments (numbers 1..24)")
    )));
    assert_eq!(events.last(), Some(&ResolveEvent::Finished(asset)));

    // Per-request scratch directories are removed afterwards.
    assert_eq!(std::fs::read_dir(dir.path().join("scratch"))?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_resolve_through_locator() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    encrypted_asset(&server, 5, None).await;
    fixtures::mount_body(
        &server,
        "/descriptors/song-42",
        serde_json::json!({
            "id": "song-42",
            "track": { "baseUrls": [format!("{}/assets/audio/v1/", server.uri())] },
        })
        .to_string()
        .into_bytes(),
    )
    .await;

    let dir = tempfile::tempdir()?;
    let store_path = dir.path().join("keys.bin");
    std::fs::write(&store_path, fixtures::key_store())?;

    let locator = AssetLocator::new(format!("{}/descriptors", server.uri()).parse::<Url>()?);
    let resolver = Resolver::new(HttpClient::default())
        .with_key_store(KeyStoreSource::File(store_path))
        .with_options(ResolverOptions {
            locator: Some(locator),
            ..Default::default()
        });

    let (_, result) = finish(resolver.spawn(ResolveRequest {
        source: ContainerSource::Asset("song-42".to_string()),
        output: dir.path().join("track.mp4"),
    }))
    .await;
    let asset = result.assert_success();

    assert_eq!(
        asset.key.hex().as_deref(),
        Some(hex::encode(fixtures::CONTENT_KEY).as_str())
    );
    assert_eq!(asset.segment_count, 5);
    assert_eq!(
        std::fs::read(dir.path().join("track.mp4"))?,
        fixtures::expected_track(5)
    );

    Ok(())
}

#[tokio::test]
async fn test_unencrypted_local_container_with_inline_manifest() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    fixtures::mount_segments(&server, "/inline", 4, None).await;

    // The inline document replaces the fetch, the URL still anchors segments.
    let manifest_url = format!("{}/inline/manifest.mpd", server.uri());
    let json = serde_json::json!({
        "playlists": [{ "type": "main", "url": manifest_url, "data": fixtures::mpd(8) }],
    });
    let dir = tempfile::tempdir()?;
    let container_path = dir.path().join("local.blurl");
    std::fs::write(&container_path, raw_container(&json.to_string()))?;

    let (_, result) = finish(Resolver::new(HttpClient::default()).spawn(ResolveRequest {
        source: ContainerSource::File(container_path),
        output: dir.path().join("track.mp4"),
    }))
    .await;
    let asset = result.assert_success();

    assert_eq!(asset.key, ContentKeyState::Clear);
    assert_eq!(asset.segment_count, 4);
    assert_eq!(
        std::fs::read(dir.path().join("track.mp4"))?,
        fixtures::expected_track(4)
    );

    Ok(())
}

#[tokio::test]
async fn test_key_not_found_is_fatal() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    encrypted_asset(&server, 3, None).await;

    let dir = tempfile::tempdir()?;
    let decoy = fixtures::key_record([7, 7, 7, 7], fixtures::NONCE, &fixtures::AES_KEY, false);
    let resolver = Resolver::new(HttpClient::default())
        .with_key_store(KeyStoreSource::Table(Arc::new(KeyStore::from_bytes(&decoy))));

    let (events, result) = finish(resolver.spawn(ResolveRequest {
        source: ContainerSource::Url(format!("{}/assets/master.blurl", server.uri()).parse()?),
        output: dir.path().join("track.mp4"),
    }))
    .await;

    assert!(matches!(result, Err(OtoError::KeyNotFound(_))));
    match events.last() {
        Some(ResolveEvent::Error { stage, reason }) => {
            assert_eq!(*stage, ResolveStage::Key);
            assert!(reason.contains(fixtures::NONCE));
        }
        other => panic!("unexpected last event: {other:?}"),
    }
    assert!(!dir.path().join("track.mp4").exists());

    Ok(())
}

#[tokio::test]
async fn test_segment_failure_reports_assembly_stage() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    encrypted_asset(&server, 6, Some(3)).await;

    let dir = tempfile::tempdir()?;
    let resolver = Resolver::new(HttpClient::default()).with_key_store(KeyStoreSource::Table(
        Arc::new(KeyStore::from_bytes(&fixtures::key_store())),
    ));

    let output = dir.path().join("track.mp4");
    let (events, result) = finish(resolver.spawn(ResolveRequest {
        source: ContainerSource::Url(format!("{}/assets/master.blurl", server.uri()).parse()?),
        output: output.clone(),
    }))
    .await;

    assert!(matches!(
        result,
        Err(OtoError::SegmentDownloadError { number: 3, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(ResolveEvent::Error {
            stage: ResolveStage::Assembly,
            ..
        })
    ));
    assert_eq!(std::fs::read(&output)?, fixtures::expected_track(2));

    Ok(())
}

#[tokio::test]
async fn test_missing_audio_template() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    fixtures::mount_body(
        &server,
        "/video/master.blurl",
        fixtures::container("manifest.mpd", None),
    )
    .await;
    let video_only = fixtures::mpd(10)
        .replace(r#"contentType="audio" mimeType="audio/mp4""#, r#"contentType="video" mimeType="video/mp4""#);
    fixtures::mount_body(&server, "/video/manifest.mpd", video_only.into_bytes()).await;

    let dir = tempfile::tempdir()?;
    let (events, result) = finish(Resolver::new(HttpClient::default()).spawn(ResolveRequest {
        source: ContainerSource::Url(format!("{}/video/master.blurl", server.uri()).parse()?),
        output: dir.path().join("track.mp4"),
    }))
    .await;

    result.assert_error();
    assert!(matches!(
        events.last(),
        Some(ResolveEvent::Error {
            stage: ResolveStage::Manifest,
            ..
        })
    ));

    Ok(())
}

#[tokio::test]
async fn test_cancel_running_resolution() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    encrypted_asset(&server, 3, None).await;

    let dir = tempfile::tempdir()?;
    let handle = Resolver::new(HttpClient::default())
        .with_key_store(KeyStoreSource::Table(Arc::new(KeyStore::from_bytes(
            &fixtures::key_store(),
        ))))
        .spawn(ResolveRequest {
            source: ContainerSource::Url(format!("{}/assets/master.blurl", server.uri()).parse()?),
            output: dir.path().join("track.mp4"),
        });
    handle.cancel();

    let (events, result) = finish(handle).await;
    assert!(matches!(result, Err(OtoError::Cancelled)));
    assert!(matches!(events.last(), Some(ResolveEvent::Error { .. })));

    Ok(())
}

fn raw_container(json: &str) -> Vec<u8> {
    use std::io::Write;

    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(json.as_bytes()).unwrap();
    let mut data = vec![0u8; 8];
    data.extend(encoder.finish().unwrap());
    data
}
