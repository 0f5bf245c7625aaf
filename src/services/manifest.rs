//! HLS output layout and master playlist generation

use m3u8_rs::{MasterPlaylist, Resolution, VariantStream};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TranscodingConfig;
use crate::errors::{TranscodingError, TranscodingResult};
use crate::models::TranscodingJob;
use crate::repositories::JobRepository;

const RENDITION_PLAYLIST: &str = "index.m3u8";
const MASTER_PLAYLIST: &str = "master.m3u8";

/// Where renditions and master playlists live on disk and how they are served.
///
/// ```text
/// {output_dir}/{stream_id}/master.m3u8
/// {output_dir}/{stream_id}/{rendition}/index.m3u8
/// ```
#[derive(Debug, Clone)]
pub struct OutputLayout {
    output_dir: PathBuf,
    public_base_url: String,
}

impl OutputLayout {
    pub fn new(output_dir: PathBuf, public_base_url: &str) -> Self {
        Self {
            output_dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &TranscodingConfig) -> Self {
        Self::new(config.output_dir.clone(), &config.public_base_url)
    }

    pub fn stream_dir(&self, stream_id: Uuid) -> PathBuf {
        self.output_dir.join(stream_id.to_string())
    }

    pub fn rendition_dir(&self, stream_id: Uuid, slug: &str) -> PathBuf {
        self.stream_dir(stream_id).join(slug)
    }

    pub fn rendition_playlist_path(&self, stream_id: Uuid, slug: &str) -> PathBuf {
        self.rendition_dir(stream_id, slug).join(RENDITION_PLAYLIST)
    }

    pub fn rendition_playlist_url(&self, stream_id: Uuid, slug: &str) -> String {
        format!("{}/{}", self.stream_url_prefix(stream_id), Self::relative_playlist(slug))
    }

    pub fn master_path(&self, stream_id: Uuid) -> PathBuf {
        self.stream_dir(stream_id).join(MASTER_PLAYLIST)
    }

    pub fn master_url(&self, stream_id: Uuid) -> String {
        format!("{}/{}", self.stream_url_prefix(stream_id), MASTER_PLAYLIST)
    }

    fn stream_url_prefix(&self, stream_id: Uuid) -> String {
        format!("{}/{}", self.public_base_url, stream_id)
    }

    fn relative_playlist(slug: &str) -> String {
        format!("{}/{}", slug, RENDITION_PLAYLIST)
    }

    /// Variant URI relative to the master playlist, absolute when the
    /// rendition lives somewhere else
    fn variant_uri(&self, job: &TranscodingJob, playlist_url: &str) -> String {
        let prefix = format!("{}/", self.stream_url_prefix(job.stream_id));
        match playlist_url.strip_prefix(&prefix) {
            Some(relative) => relative.to_string(),
            None => playlist_url.to_string(),
        }
    }
}

/// Result of writing a master playlist
#[derive(Debug, Clone, PartialEq)]
pub struct MasterManifest {
    pub url: String,
    pub path: PathBuf,
    pub renditions: usize,
}

/// Builds the adaptive-bitrate master playlist for a stream
#[derive(Clone)]
pub struct ManifestGenerator {
    jobs: JobRepository,
    layout: OutputLayout,
}

impl ManifestGenerator {
    pub fn new(jobs: JobRepository, layout: OutputLayout) -> Self {
        Self { jobs, layout }
    }

    /// Write `master.m3u8` for every rendition that has output and return its URL.
    ///
    /// Calling it again without rendition changes rewrites identical bytes.
    pub async fn generate_master_manifest(
        &self,
        stream_id: Uuid,
    ) -> TranscodingResult<MasterManifest> {
        let jobs = self.jobs.list_renditions(stream_id).await?;
        let playlist = self.build_playlist(&jobs);
        if playlist.variants.is_empty() {
            return Err(TranscodingError::NoRenditionsReady(stream_id));
        }

        let mut bytes = Vec::new();
        playlist.write_to(&mut bytes)?;

        let path = self.layout.master_path(stream_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Replace atomically so players never read a half-written playlist
        let tmp_path = path.with_extension("m3u8.tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        let manifest = MasterManifest {
            url: self.layout.master_url(stream_id),
            path,
            renditions: playlist.variants.len(),
        };
        info!(
            stream_id = %stream_id,
            renditions = manifest.renditions,
            "Wrote master playlist {}",
            manifest.path.display()
        );
        Ok(manifest)
    }

    fn build_playlist(&self, jobs: &[TranscodingJob]) -> MasterPlaylist {
        // One variant per rendition directory; a re-run of the same profile wins
        let mut latest: HashMap<String, &TranscodingJob> = HashMap::new();
        for job in jobs {
            if job.hls_playlist_url.is_none() {
                continue;
            }
            let slug = job.encode.rendition_slug();
            match latest.get(&slug) {
                Some(existing) if existing.created_at >= job.created_at => {}
                _ => {
                    latest.insert(slug, job);
                }
            }
        }

        let mut selected: Vec<&TranscodingJob> = latest.into_values().collect();
        selected.sort_by(|a, b| {
            b.encode
                .bandwidth()
                .cmp(&a.encode.bandwidth())
                .then_with(|| b.encode.height.cmp(&a.encode.height))
                .then_with(|| a.encode.profile_name.cmp(&b.encode.profile_name))
                .then_with(|| a.id.cmp(&b.id))
        });

        let variants = selected
            .into_iter()
            .filter_map(|job| {
                let playlist_url = job.hls_playlist_url.as_deref()?;
                debug!(job_id = %job.id, "Adding variant {}", playlist_url);
                Some(VariantStream {
                    uri: self.layout.variant_uri(job, playlist_url),
                    bandwidth: job.encode.bandwidth(),
                    resolution: Some(Resolution {
                        width: job.encode.width as u64,
                        height: job.encode.height as u64,
                    }),
                    frame_rate: Some(job.encode.framerate as f64),
                    ..Default::default()
                })
            })
            .collect();

        MasterPlaylist {
            version: Some(3),
            variants,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::models::EncodeParameters;
    use chrono::Utc;

    fn encode(name: &str, height: u32, video_bitrate: u32) -> EncodeParameters {
        EncodeParameters {
            profile_id: Uuid::new_v4(),
            profile_name: name.to_string(),
            width: height * 16 / 9,
            height,
            video_bitrate,
            audio_bitrate: 128,
            framerate: 30,
            preset: "veryfast".to_string(),
        }
    }

    async fn processing_job(
        repo: &JobRepository,
        layout: &OutputLayout,
        stream_id: Uuid,
        encode: &EncodeParameters,
    ) -> TranscodingJob {
        let job = repo
            .create_pending(stream_id, "rtmp://localhost/live/key", encode)
            .await
            .unwrap();
        let slug = encode.rendition_slug();
        repo.mark_processing(
            job.id,
            1,
            &layout.rendition_dir(stream_id, &slug).to_string_lossy(),
            &layout.rendition_playlist_url(stream_id, &slug),
            Utc::now(),
        )
        .await
        .unwrap();
        job
    }

    #[test]
    fn layout_paths_and_urls() {
        let layout = OutputLayout::new(PathBuf::from("/srv/hls"), "https://cdn.example.com/hls/");
        let stream_id = Uuid::nil();

        assert_eq!(
            layout.master_path(stream_id),
            PathBuf::from("/srv/hls/00000000-0000-0000-0000-000000000000/master.m3u8")
        );
        assert_eq!(
            layout.rendition_playlist_url(stream_id, "720p_x"),
            "https://cdn.example.com/hls/00000000-0000-0000-0000-000000000000/720p_x/index.m3u8"
        );
    }

    #[tokio::test]
    async fn no_renditions_is_an_error() {
        let db = Database::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let generator = ManifestGenerator::new(
            JobRepository::new(db.pool()),
            OutputLayout::new(dir.path().to_path_buf(), "http://localhost/hls"),
        );

        let stream_id = Uuid::new_v4();
        let err = generator.generate_master_manifest(stream_id).await.unwrap_err();
        assert!(matches!(err, TranscodingError::NoRenditionsReady(id) if id == stream_id));
    }

    #[tokio::test]
    async fn manifest_lists_renditions_highest_bandwidth_first() {
        let db = Database::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let repo = JobRepository::new(db.pool());
        let layout = OutputLayout::new(dir.path().to_path_buf(), "http://localhost/hls");
        let generator = ManifestGenerator::new(repo.clone(), layout.clone());
        let stream_id = Uuid::new_v4();

        let low = encode("480p", 480, 1000);
        let high = encode("720p", 720, 2500);
        processing_job(&repo, &layout, stream_id, &low).await;
        processing_job(&repo, &layout, stream_id, &high).await;
        // Still pending, no output yet
        repo.create_pending(stream_id, "rtmp://localhost/live/key", &encode("1080p", 1080, 5000))
            .await
            .unwrap();

        let manifest = generator.generate_master_manifest(stream_id).await.unwrap();
        assert_eq!(manifest.renditions, 2);
        assert_eq!(manifest.url, layout.master_url(stream_id));

        let content = std::fs::read_to_string(&manifest.path).unwrap();
        let high_at = content.find(&high.rendition_slug()).unwrap();
        let low_at = content.find(&low.rendition_slug()).unwrap();
        assert!(high_at < low_at);
        assert!(content.contains("BANDWIDTH=2628000"));
        assert!(content.contains("RESOLUTION=1280x720"));
        assert!(!content.contains("1080p"));
    }
}
