use std::path::{Path, PathBuf};

use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    dash::SegmentTemplate,
    error::{OtoError, OtoResult},
    fetch::SegmentFetcher,
};

/// A track written by [`TrackAssembler::assemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTrack {
    pub path: PathBuf,
    /// Media segments appended after the initialization segment.
    pub segments: u64,
    pub bytes: u64,
}

/// Concatenates the initialization segment and numbered media segments into
/// one file, in order.
///
/// Each segment passes through a scratch file that is removed as soon as it
/// has been appended, so at most one segment is held on disk besides the
/// output.
pub struct TrackAssembler<F> {
    fetcher: F,
    scratch_dir: PathBuf,
    cancel: CancellationToken,
}

impl<F> TrackAssembler<F>
where
    F: SegmentFetcher,
{
    pub fn new(fetcher: F, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            scratch_dir: scratch_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Download `count` media segments of `template` into `output`.
    ///
    /// `on_progress(done, count)` is called after every appended media
    /// segment. On a failed download the output keeps every segment
    /// appended so far and the error names the failing segment number.
    pub async fn assemble<P>(
        &self,
        template: &SegmentTemplate,
        base_url: &Url,
        count: u64,
        output: impl AsRef<Path>,
        mut on_progress: P,
    ) -> OtoResult<AssembledTrack>
    where
        P: FnMut(u64, u64) + Send,
    {
        let path = output.as_ref().to_path_buf();
        if !self.scratch_dir.exists() {
            tokio::fs::create_dir_all(&self.scratch_dir).await?;
        }

        let init_url = template.init_url(base_url)?;
        let init = self
            .fetcher
            .fetch(&init_url)
            .await
            .map_err(|e| OtoError::InitDownloadError(Box::new(e)))?;

        let mut writer = BufWriter::new(File::create(&path).await?);
        let mut bytes = self.append(&mut writer, "init", &init_url, &init).await?;
        log::debug!("Initialization segment written to {}", path.display());

        for index in 1..=count {
            if self.cancel.is_cancelled() {
                writer.flush().await?;
                return Err(OtoError::Cancelled);
            }

            let number = template.segment_number(index);
            let url = template.media_url(base_url, number)?;
            let data = match self.fetcher.fetch(&url).await {
                Ok(data) => data,
                Err(e) => {
                    log::error!("Failed to download segment {number} from {url}: {e}");
                    writer.flush().await?;
                    return Err(OtoError::SegmentDownloadError {
                        number,
                        source: Box::new(e),
                    });
                }
            };

            bytes += self
                .append(&mut writer, &format!("{number:06}"), &url, &data)
                .await?;
            on_progress(index, count);
        }

        writer.flush().await?;
        log::info!(
            "Assembled {count} segments ({bytes} bytes) into {}",
            path.display()
        );

        Ok(AssembledTrack {
            path,
            segments: count,
            bytes,
        })
    }

    async fn append(
        &self,
        writer: &mut BufWriter<File>,
        prefix: &str,
        url: &Url,
        data: &[u8],
    ) -> OtoResult<u64> {
        let scratch = self.scratch_dir.join(scratch_file_name(prefix, url));
        tokio::fs::write(&scratch, data).await?;

        let mut segment = File::open(&scratch).await?;
        let copied = tokio::io::copy(&mut segment, writer).await?;
        drop(segment);

        tokio::fs::remove_file(&scratch).await?;
        Ok(copied)
    }
}

fn scratch_file_name(prefix: &str, url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("segment");
    format!("{prefix}_{}", name.replace('/', "__"))
}
