//! 媒体下载服务 - 业务能力层

use std::path::PathBuf;
use std::time::Duration;

use tokio::fs;
use tracing::debug;

use crate::error::{AppError, AppResult, MediaError};
use crate::models::MediaKind;

const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "ogg", "m4a"];
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// 把题目附带的图片 / 音频下载到本地
pub struct MediaDownloader {
    client: reqwest::Client,
    images_dir: PathBuf,
    audio_dir: PathBuf,
}

impl MediaDownloader {
    pub fn new(
        images_dir: impl Into<PathBuf>,
        audio_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MediaError::DownloadFailed {
                url: String::new(),
                source: Box::new(e),
            })?;
        Ok(Self {
            client,
            images_dir: images_dir.into(),
            audio_dir: audio_dir.into(),
        })
    }

    /// 下载并保存为 `{key}.{ext}`，返回写入输出表的文件名
    pub async fn download(&self, url: &str, key: &str, kind: MediaKind) -> AppResult<String> {
        let file_name = media_file_name(key, url, kind);
        let dir = match kind {
            MediaKind::Image => &self.images_dir,
            MediaKind::Audio => &self.audio_dir,
        };
        let failed = |e: reqwest::Error| {
            AppError::Media(MediaError::DownloadFailed {
                url: url.to_string(),
                source: Box::new(e),
            })
        };

        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(failed)?
            .bytes()
            .await
            .map_err(failed)?;

        fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::file_write_failed(dir.display().to_string(), e))?;
        let path = dir.join(&file_name);
        fs::write(&path, &bytes)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        debug!("已下载媒体 {} ({} 字节)", path.display(), bytes.len());
        Ok(file_name)
    }
}

/// 由题目 Key 和媒体 URL 决定本地文件名
pub fn media_file_name(key: &str, url: &str, kind: MediaKind) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    let (allowed, fallback): (&[&str], &str) = match kind {
        MediaKind::Audio => (&AUDIO_EXTENSIONS, "mp3"),
        MediaKind::Image => (&IMAGE_EXTENSIONS, "jpg"),
    };
    let ext = ext
        .filter(|e| allowed.contains(&e.as_str()))
        .unwrap_or_else(|| fallback.to_string());

    format!("{}.{}", key, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_file_name_extensions() {
        assert_eq!(
            media_file_name("Question_SOUND_Parsed_0001", "https://x.com/a/clip.WAV?v=2", MediaKind::Audio),
            "Question_SOUND_Parsed_0001.wav"
        );
        assert_eq!(
            media_file_name("Question_SOUND_Parsed_0002", "https://x.com/play.php", MediaKind::Audio),
            "Question_SOUND_Parsed_0002.mp3"
        );
        assert_eq!(
            media_file_name("Question_MQ_Parsed_0003", "https://x.com/pics/cat.webp", MediaKind::Image),
            "Question_MQ_Parsed_0003.webp"
        );
        assert_eq!(
            media_file_name("Question_MQ_Parsed_0004", "https://x.com/v1.2/image", MediaKind::Image),
            "Question_MQ_Parsed_0004.jpg"
        );
    }
}
