use std::time::Duration;

use oto::{
    dash::{estimate_segment_count, parse_audio_template},
    discovery::{HttpProbe, ProbeFn},
    DiscoveryOptions, HttpClient, SegmentCountDiscovery, Url,
};
use wiremock::MockServer;

use crate::{fixtures, AssertWrapper};

#[tokio::test]
async fn test_http_probe_finds_count() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    fixtures::mount_segments(&server, "/media", 23, None).await;

    let xml = fixtures::mpd(40);
    let template = parse_audio_template(&xml)?;
    let estimate = estimate_segment_count(&xml, template.segment_duration, template.timescale);
    assert_eq!(estimate, 20);

    let manifest_url: Url = format!("{}/media/manifest.mpd", server.uri()).parse()?;
    let base_url = template.base_url(&manifest_url)?;
    let probe = HttpProbe::new(HttpClient::default(), template, base_url)
        .with_timeout(Duration::from_secs(5));

    let outcome = SegmentCountDiscovery::new(probe)
        .discover(estimate)
        .await
        .assert_success();
    assert_eq!(outcome.count, 23);
    assert_eq!(outcome.estimate, 20);
    assert!(outcome.verified);

    Ok(())
}

#[tokio::test]
async fn test_http_probe_overestimate() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    fixtures::mount_segments(&server, "/media", 7, None).await;

    let template = parse_audio_template(&fixtures::mpd(40))?;
    let base_url: Url = format!("{}/media/", server.uri()).parse()?;
    let probe = HttpProbe::new(HttpClient::default(), template, base_url);

    let outcome = SegmentCountDiscovery::new(probe).discover(20).await?;
    assert_eq!(outcome.count, 7);

    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_keeps_estimate() -> anyhow::Result<()> {
    let template = parse_audio_template(&fixtures::mpd(40))?;
    // Nothing listens on the discard port.
    let base_url: Url = "http://127.0.0.1:9/media/".parse()?;
    let probe = HttpProbe::new(HttpClient::default(), template, base_url)
        .with_timeout(Duration::from_millis(500));

    let outcome = SegmentCountDiscovery::new(probe).discover(20).await?;
    assert_eq!(outcome.count, 20);
    assert!(!outcome.verified);

    Ok(())
}

#[tokio::test]
async fn test_probe_count_is_logarithmic() {
    for n in [1u64, 57, 212, 700] {
        let outcome = SegmentCountDiscovery::new(ProbeFn(move |index: u64| index <= n))
            .discover(100)
            .await
            .assert_success();
        assert_eq!(outcome.count, n);

        // seed + expansion + bisection + verification window
        let options = DiscoveryOptions::default();
        let bound = 1
            + options.max_expansion_probes
            + 2 * (64 - n.leading_zeros()).max(7)
            + options.verification_window as u32;
        assert!(
            outcome.probes <= bound,
            "n={n}: {} probes exceeds {bound}",
            outcome.probes
        );
    }
}
