//! Segment count discovery.
//!
//! Template-addressed manifests only state a nominal segment duration, so the
//! number of segments that actually exist on the CDN has to be found by
//! asking for them. Existence is assumed to be monotonic: if segment `i`
//! exists, so does every segment in `1..i`, and there is a finite last one.
//!
//! ```text
//!  seed ──ok──► expand (+10, +20, +40, +50 …) ──fail──► bisect ──► verify
//!    │                     │ budget spent
//!    │                     ├──► verify from the last segment seen
//!    │                     └──► gallop (×2, opt-in) ──fail──► bisect ──► verify
//!    └──fail──► bisect [1, seed) ─────────────────────────────────► verify
//! ```
//!
//! Probes that error out or time out count as "absent". The verification
//! pass after bisection catches a transient negative right at the boundary.

use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    dash::SegmentTemplate,
    error::{OtoError, OtoResult},
    util::http::HttpClient,
};

/// Answers whether a numbered segment exists.
pub trait SegmentProbe: Send + Sync {
    /// `index` is 1-based, independent of the template's `startNumber`.
    fn exists(&self, index: u64) -> impl Future<Output = bool> + Send;
}

/// Adapts a plain function into a [`SegmentProbe`].
pub struct ProbeFn<F>(pub F);

impl<F> SegmentProbe for ProbeFn<F>
where
    F: Fn(u64) -> bool + Send + Sync,
{
    fn exists(&self, index: u64) -> impl Future<Output = bool> + Send {
        std::future::ready((self.0)(index))
    }
}

/// Probes segments with `HEAD` requests against their media URL.
pub struct HttpProbe {
    client: HttpClient,
    template: SegmentTemplate,
    base_url: Url,
    timeout: Option<Duration>,
}

impl HttpProbe {
    pub fn new(client: HttpClient, template: SegmentTemplate, base_url: Url) -> Self {
        Self {
            client,
            template,
            base_url,
            timeout: None,
        }
    }

    /// Per-probe timeout, shorter than the client's download timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl SegmentProbe for HttpProbe {
    fn exists(&self, index: u64) -> impl Future<Output = bool> + Send {
        let number = self.template.segment_number(index);
        let request = self
            .template
            .media_url(&self.base_url, number)
            .map(|url| {
                let request = self.client.head(url.clone());
                let request = match self.timeout {
                    Some(timeout) => request.timeout(timeout),
                    None => request,
                };
                (url, request)
            });

        async move {
            let (url, request) = match request {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("Can not build URL of segment {number}: {e}");
                    return false;
                }
            };

            match request.send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    log::debug!("Probe of {url} failed: {e}");
                    false
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// First step of the expansion stage.
    pub initial_step: u64,
    /// Expansion steps double up to this value.
    pub max_step: u64,
    /// Probes allowed in the expansion stage.
    pub max_expansion_probes: u32,
    /// Probes allowed for doubling once the expansion budget is spent
    /// without finding a missing segment. Off by default, which keeps the
    /// forward walk within `max_expansion_probes`.
    pub max_gallop_probes: u32,
    /// Indices probed past the bisected boundary.
    pub verification_window: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            initial_step: 10,
            max_step: 50,
            max_expansion_probes: 15,
            max_gallop_probes: 0,
            verification_window: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Number of segments, counted from the template's first segment.
    pub count: u64,
    /// The seed estimate discovery started from.
    pub estimate: u64,
    /// Total probes issued.
    pub probes: u32,
    /// `false` when no probe succeeded and `count` is the bare estimate.
    pub verified: bool,
}

pub struct SegmentCountDiscovery<P> {
    prober: P,
    options: DiscoveryOptions,
    cancel: CancellationToken,
    probes: u32,
}

impl<P> SegmentCountDiscovery<P>
where
    P: SegmentProbe,
{
    pub fn new(probe: P) -> Self {
        Self {
            prober: probe,
            options: DiscoveryOptions::default(),
            cancel: CancellationToken::new(),
            probes: 0,
        }
    }

    pub fn with_options(mut self, options: DiscoveryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Find the index of the last existing segment, starting from `estimate`.
    pub async fn discover(mut self, estimate: u64) -> OtoResult<DiscoveryOutcome> {
        let estimate = estimate.max(1);

        let boundary = if self.probe(estimate).await? {
            let (last_valid, first_missing) = self.expand(estimate).await?;
            match first_missing {
                Some(first_missing) => self.bisect(last_valid, first_missing).await?,
                None => last_valid,
            }
        } else {
            log::debug!("Estimate of {estimate} segments overshoots, searching below it");
            // 0 stands in for "nothing known to exist yet".
            self.bisect(0, estimate).await?
        };

        let count = self.verify(boundary).await?;
        if count == 0 {
            log::warn!(
                "No segment could be probed after {} attempts, keeping the estimate of {estimate}",
                self.probes
            );
            return Ok(DiscoveryOutcome {
                count: estimate,
                estimate,
                probes: self.probes,
                verified: false,
            });
        }

        log::info!(
            "Found {count} segments (estimated {estimate}) with {} probes",
            self.probes
        );
        Ok(DiscoveryOutcome {
            count,
            estimate,
            probes: self.probes,
            verified: true,
        })
    }

    async fn probe(&mut self, index: u64) -> OtoResult<bool> {
        if self.cancel.is_cancelled() {
            return Err(OtoError::Cancelled);
        }

        self.probes += 1;
        let exists = self.prober.exists(index).await;
        log::trace!("probe #{}: segment {index} exists={exists}", self.probes);
        Ok(exists)
    }

    /// Walk forward from a known segment with growing steps.
    ///
    /// Returns the last index seen to exist and the first one seen missing.
    async fn expand(&mut self, start: u64) -> OtoResult<(u64, Option<u64>)> {
        let mut last_valid = start;
        let mut step = self.options.initial_step.max(1);

        for _ in 0..self.options.max_expansion_probes {
            let current = last_valid + step;
            if !self.probe(current).await? {
                return Ok((last_valid, Some(current)));
            }
            last_valid = current;
            step = (step * 2).min(self.options.max_step.max(1));
        }

        if self.options.max_gallop_probes == 0 {
            log::debug!("Expansion budget spent at segment {last_valid}");
            return Ok((last_valid, None));
        }

        log::debug!("Expansion budget spent at segment {last_valid}, doubling from there");
        for _ in 0..self.options.max_gallop_probes {
            let current = last_valid.saturating_mul(2);
            if !self.probe(current).await? {
                return Ok((last_valid, Some(current)));
            }
            last_valid = current;
        }

        Ok((last_valid, None))
    }

    /// Greatest existing index in `[good, bad)`, given `good` exists (or is 0)
    /// and `bad` does not.
    async fn bisect(&mut self, mut good: u64, mut bad: u64) -> OtoResult<u64> {
        while bad - good > 1 {
            let mid = good + (bad - good) / 2;
            if self.probe(mid).await? {
                good = mid;
            } else {
                bad = mid;
            }
        }
        Ok(good)
    }

    /// Probe past the boundary and keep the greatest index that exists.
    async fn verify(&mut self, boundary: u64) -> OtoResult<u64> {
        let mut verified = boundary;
        for offset in 1..=self.options.verification_window {
            let index = boundary + offset;
            if self.probe(index).await? {
                log::debug!("Segment {index} exists past the bisected boundary {boundary}");
                verified = index;
            }
        }
        Ok(verified)
    }
}
