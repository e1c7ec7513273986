#![forbid(unsafe_code)]

//! The watch loop: poll the channel on a fixed cadence until the run window
//! closes, relaying each new upload exactly once.
//!
//! Every iteration is a single `Result`-returning call. The loop logs an
//! `Err` and keeps going, so a persistent failure (expired cookies, a broken
//! network) shows up as one log line per poll until the window ends.

use crate::cleanup::sweep_except;
use crate::config::{CommitPolicy, Settings};
use crate::notify::{Delivery, Notifier, build_caption};
use crate::sent_log::SentLog;
use crate::source::{DownloadArtifact, Rendition, VideoRecord, VideoSource};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tracing::{error, info, warn};

/// Wall-clock interval the watcher is allowed to run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl PollWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_now(duration: Duration) -> Self {
        let start = Utc::now();
        let end = TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| start.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { start, end }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The channel listing came back without any entry.
    NoEntry,
    AlreadySent { id: String },
    /// Both renditions were downloaded, delivery was attempted, and the id
    /// was committed to the sent log.
    Processed { id: String, deliveries: Vec<Delivery> },
    /// Deliveries failed under [`CommitPolicy::AfterDelivery`]; the id stays
    /// out of the sent log and is retried next poll.
    Withheld { id: String, deliveries: Vec<Delivery> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: usize,
    pub processed: usize,
    pub failures: usize,
}

pub struct Poller<'a, S, N> {
    settings: &'a Settings,
    source: S,
    notifier: N,
    sent_log: SentLog,
}

impl<'a, S, N> Poller<'a, S, N>
where
    S: VideoSource,
    N: Notifier,
{
    pub fn new(settings: &'a Settings, source: S, notifier: N, sent_log: SentLog) -> Self {
        Self {
            settings,
            source,
            notifier,
            sent_log,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn sent_log(&self) -> &SentLog {
        &self.sent_log
    }

    /// Polls until `window` closes. Iteration errors are logged and never
    /// end the run; the interval sleep always follows an iteration.
    pub async fn run(&mut self, window: &PollWindow) -> RunSummary {
        let mut summary = RunSummary::default();

        while window.is_open(Utc::now()) {
            summary.iterations += 1;
            match self.run_iteration().await {
                Ok(IterationOutcome::Processed { .. }) => summary.processed += 1,
                Ok(_) => {}
                Err(err) => {
                    summary.failures += 1;
                    error!(error = %format!("{err:#}"), "poll iteration failed");
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        info!(
            iterations = summary.iterations,
            processed = summary.processed,
            failures = summary.failures,
            "monitoring finished"
        );
        summary
    }

    /// Checks the newest channel entry and relays it if it has not been sent.
    pub async fn run_iteration(&mut self) -> Result<IterationOutcome> {
        info!("checking for updates");

        let Some(latest) = self.source.latest().await.context("fetching channel info")? else {
            warn!("channel listing returned no entries");
            return Ok(IterationOutcome::NoEntry);
        };

        if self.sent_log.contains(&latest.id) {
            info!(video_id = %latest.id, "no new video");
            return Ok(IterationOutcome::AlreadySent { id: latest.id });
        }

        info!(video_id = %latest.id, title = %latest.title, "found new video");

        let (video, title) = self.fetch(&latest, Rendition::VideoOnly).await?;
        let (audio, _) = self.fetch(&latest, Rendition::AudioOnly).await?;

        let mut deliveries = Vec::with_capacity(2);
        for artifact in [&video, &audio] {
            let caption = build_caption(&artifact.path, &title, &latest.url);
            deliveries.push(self.notify_best_effort(artifact, &caption).await);
        }

        let commit = match self.settings.commit_policy {
            CommitPolicy::AfterAttempt => true,
            CommitPolicy::AfterDelivery => deliveries.iter().all(Delivery::is_sent),
        };
        if commit {
            self.sent_log
                .commit(&latest.id)
                .with_context(|| format!("recording {} as sent", latest.id))?;
        }

        // The sent log may be configured to live inside the download directory.
        let log_path = self.sent_log.path();
        let keep = [
            video.path.clone(),
            audio.path.clone(),
            log_path.to_path_buf(),
            log_path.with_extension("tmp"),
        ];
        let removed = sweep_except(&self.settings.download_dir, &keep);
        if removed > 0 {
            info!(removed, "pruned download directory");
        }

        if commit {
            Ok(IterationOutcome::Processed {
                id: latest.id,
                deliveries,
            })
        } else {
            warn!(video_id = %latest.id, "deliveries failed; will retry next poll");
            Ok(IterationOutcome::Withheld {
                id: latest.id,
                deliveries,
            })
        }
    }

    /// Uploads one artifact. A failure is logged and reported in the returned
    /// [`Delivery`] but is never retried or propagated.
    pub async fn notify_best_effort(&self, artifact: &DownloadArtifact, caption: &str) -> Delivery {
        match self.notifier.send(&artifact.path, caption).await {
            Ok(()) => {
                info!(
                    video_id = %artifact.video_id,
                    rendition = artifact.rendition.label(),
                    path = %artifact.path.display(),
                    "sent"
                );
                Delivery::Sent
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(
                    video_id = %artifact.video_id,
                    rendition = artifact.rendition.label(),
                    path = %artifact.path.display(),
                    error = %reason,
                    "failed to send"
                );
                Delivery::Failed(reason)
            }
        }
    }

    async fn fetch(
        &self,
        video: &VideoRecord,
        rendition: Rendition,
    ) -> Result<(DownloadArtifact, String)> {
        let format = match rendition {
            Rendition::VideoOnly => &self.settings.video_format,
            Rendition::AudioOnly => &self.settings.audio_format,
        };
        let download = self
            .source
            .download(&video.url, format, &self.settings.download_dir)
            .await
            .with_context(|| format!("downloading {} {}", video.id, rendition.label()))?;
        info!(
            video_id = %video.id,
            rendition = rendition.label(),
            path = %download.path.display(),
            "downloaded"
        );
        Ok((
            DownloadArtifact {
                path: download.path,
                rendition,
                video_id: video.id.clone(),
            },
            download.title,
        ))
    }
}
