use std::collections::HashMap;
use anyhow::{Context, Result};
use serde::Deserialize;
use crate::media::{AudioTrack, MediaProbe, MetadataTags, VideoTrack};

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<String>,
    pub sample_aspect_ratio: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    pub side_data_list: Option<Vec<HashMap<String, serde_json::Value>>>,
    pub disposition: Option<HashMap<String, i32>>,
}

impl FFProbeStream {
    fn is_kind(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }

    /// Cover art is exposed as a video stream but is not playable video
    pub fn is_attached_picture(&self) -> bool {
        self.disposition
            .as_ref()
            .and_then(|d| d.get("attached_pic"))
            .copied()
            .unwrap_or(0)
            == 1
    }

    /// Rotation in degrees from the display matrix or the legacy `rotate` tag
    fn rotation(&self) -> i64 {
        let from_side_data = self.side_data_list.as_ref().and_then(|list| {
            list.iter()
                .find_map(|entry| entry.get("rotation").and_then(|v| v.as_i64()))
        });
        let from_tag = self
            .tags
            .as_ref()
            .and_then(|t| t.get("rotate"))
            .and_then(|r| r.parse::<i64>().ok());
        from_side_data.or(from_tag).unwrap_or(0)
    }

    /// Width and height as displayed: SAR applied, swapped for 90/270 rotation
    pub fn display_dimensions(&self) -> Option<(u32, u32)> {
        let width = u32::try_from(self.width?).ok()?;
        let height = u32::try_from(self.height?).ok()?;

        let width = match self.sample_aspect_ratio.as_deref().and_then(parse_ratio) {
            Some(sar) if sar > 0.0 && (sar - 1.0).abs() > f64::EPSILON => {
                (width as f64 * sar).round() as u32
            }
            _ => width,
        };

        if self.rotation().rem_euclid(180) == 90 {
            Some((height, width))
        } else {
            Some((width, height))
        }
    }
}

/// Parse `num:den` ratios such as a sample aspect ratio of `4:3`
fn parse_ratio(ratio: &str) -> Option<f64> {
    let (num, den) = ratio.split_once(':')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Parse duration strings
///
/// Supports formats:
/// - "HH:MM:SS.mmm"
/// - "seconds.milliseconds"
pub fn parse_duration(duration_str: &str) -> Result<f64> {
    let duration_str = duration_str.trim();
    if duration_str.contains(':') {
        let parts: Vec<&str> = duration_str.split(':').collect();
        if parts.len() == 3 {
            let hours: f64 = parts[0].parse()?;
            let minutes: f64 = parts[1].parse()?;
            let seconds: f64 = parts[2].parse()?;
            return Ok(hours * 3600.0 + minutes * 60.0 + seconds);
        }
        anyhow::bail!("Unrecognised duration: {}", duration_str);
    }

    Ok(duration_str.parse()?)
}

/// Look up a tag case-insensitively; containers disagree on key casing
fn tag(tags: &HashMap<String, String>, key: &str) -> Option<String> {
    tags.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl FFProbeData {
    /// Parse raw `ffprobe -print_format json` output
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse ffprobe JSON")
    }

    /// Total duration: the container's value, else the longest stream, else a
    /// `DURATION` tag (Matroska writes it there)
    pub fn duration_secs(&self) -> Option<f64> {
        if let Some(d) = self.format.duration.as_deref().and_then(|d| parse_duration(d).ok()) {
            return Some(d);
        }

        let longest_stream = self
            .streams
            .iter()
            .filter_map(|s| s.duration.as_deref())
            .filter_map(|d| parse_duration(d).ok())
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));
        if longest_stream.is_some() {
            return longest_stream;
        }

        self.streams
            .iter()
            .filter_map(|s| s.tags.as_ref())
            .filter_map(|t| tag(t, "DURATION"))
            .filter_map(|d| parse_duration(&d).ok())
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))))
    }

    /// Reduce the raw probe to the facts the orchestration layer reads
    pub fn into_media_probe(self) -> Result<MediaProbe> {
        let duration_secs = self
            .duration_secs()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .context("ffprobe reported no usable duration")?;

        let video = self
            .streams
            .iter()
            .filter(|s| s.is_kind("video") && !s.is_attached_picture())
            .find_map(|s| {
                s.display_dimensions().map(|(w, h)| VideoTrack {
                    display_width: w,
                    display_height: h,
                    codec: s.codec_name.clone(),
                })
            });

        let audio = self
            .streams
            .iter()
            .find(|s| s.is_kind("audio"))
            .map(|s| AudioTrack {
                codec: s.codec_name.clone(),
            });

        let tags = self.format.tags.as_ref().map(|t| MetadataTags {
            title: tag(t, "title"),
            artist: tag(t, "artist"),
            comment: tag(t, "comment"),
            description: tag(t, "description"),
        });

        Ok(MediaProbe {
            duration_secs,
            video,
            audio,
            tags: tags.filter(|t| !t.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "sample_aspect_ratio": "1:1",
                "disposition": {"default": 1, "attached_pic": 0}
            },
            {
                "index": 1,
                "codec_type": "audio",
                "codec_name": "aac"
            },
            {
                "index": 2,
                "codec_type": "video",
                "codec_name": "mjpeg",
                "width": 600,
                "height": 600,
                "disposition": {"attached_pic": 1}
            }
        ],
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "12.480000",
            "tags": {"TITLE": "Harbour at dusk", "artist": "", "comment": "shot on a phone"}
        }
    }"#;

    #[test]
    fn test_media_probe_from_ffprobe_json() {
        let probe = FFProbeData::from_json(SAMPLE).unwrap().into_media_probe().unwrap();

        assert!((probe.duration_secs - 12.48).abs() < 1e-9);
        let video = probe.video.unwrap();
        assert_eq!((video.display_width, video.display_height), (1920, 1080));
        assert_eq!(video.codec.as_deref(), Some("h264"));
        assert_eq!(probe.audio.unwrap().codec.as_deref(), Some("aac"));

        let tags = probe.tags.unwrap();
        assert_eq!(tags.title.as_deref(), Some("Harbour at dusk"));
        assert_eq!(tags.artist, None);
        assert_eq!(tags.comment.as_deref(), Some("shot on a phone"));
    }

    #[test]
    fn test_cover_art_is_not_a_video_track() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "audio", "codec_name": "mp3"},
                {"index": 1, "codec_type": "video", "codec_name": "png", "width": 500, "height": 500,
                 "disposition": {"attached_pic": 1}}
            ],
            "format": {"duration": "200.0"}
        }"#;
        let probe = FFProbeData::from_json(json).unwrap().into_media_probe().unwrap();
        assert!(probe.video.is_none());
        assert!(probe.audio.is_some());
        assert!(probe.tags.is_none());
    }

    #[test]
    fn test_rotation_and_sar_applied() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "hevc", "width": 1920, "height": 1080,
                 "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}
            ],
            "format": {"duration": "3.0"}
        }"#;
        let probe = FFProbeData::from_json(json).unwrap().into_media_probe().unwrap();
        let video = probe.video.unwrap();
        assert_eq!((video.display_width, video.display_height), (1080, 1920));

        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "mpeg2video", "width": 720, "height": 576,
                 "sample_aspect_ratio": "16:15"}
            ],
            "format": {"duration": "3.0"}
        }"#;
        let probe = FFProbeData::from_json(json).unwrap().into_media_probe().unwrap();
        assert_eq!(probe.video.unwrap().display_width, 768);
    }

    #[test]
    fn test_duration_fallbacks() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "width": 10, "height": 10,
                 "tags": {"DURATION": "00:01:30.500000000"}}
            ],
            "format": {}
        }"#;
        let data = FFProbeData::from_json(json).unwrap();
        assert!((data.duration_secs().unwrap() - 90.5).abs() < 1e-6);

        let json = r#"{"streams": [], "format": {}}"#;
        let data = FFProbeData::from_json(json).unwrap();
        assert!(data.into_media_probe().is_err());
    }

    #[test]
    fn test_duration_parsing() {
        assert!((parse_duration("01:30:45.500").unwrap() - 5445.5).abs() < 0.1);
        assert!((parse_duration("123.456").unwrap() - 123.456).abs() < 0.1);
        assert!((parse_duration("00:00:00").unwrap() - 0.0).abs() < 0.1);
        assert!(parse_duration("12:30").is_err());
    }
}
