//! Media materializer: downloads rewritten media, converts it to the filenames
//! the sanitizer assigned, and packs everything into an in-memory zip.
//!
//! Every invocation works in its own UUID-named directory under the scratch
//! root. The directory is removed when the call returns, on success and on
//! error alike.

mod ffmpeg;

pub use ffmpeg::{FfmpegProcessor, MediaProcessor};

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

use crate::error::{RehostError, Result};
use crate::sanitizer::manifest::{KEPT_ASSET_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::sanitizer::{MediaManifest, normalized_filename};

/// Animated formats that are never downloaded; only their posters travel.
const SKIPPED_ANIMATION_EXTENSIONS: &[&str] = &["gif"];

/// Output format accepted by [`MediaMaterializer::convert_images`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageExtension {
    Jpg,
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl ImageExtension {
    pub const ALL: [ImageExtension; 5] = [
        ImageExtension::Jpg,
        ImageExtension::Jpeg,
        ImageExtension::Png,
        ImageExtension::Webp,
        ImageExtension::Avif,
    ];

    /// Extension without the leading dot.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageExtension::Jpg => "jpg",
            ImageExtension::Jpeg => "jpeg",
            ImageExtension::Png => "png",
            ImageExtension::Webp => "webp",
            ImageExtension::Avif => "avif",
        }
    }
}

impl fmt::Display for ImageExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.as_str())
    }
}

impl FromStr for ImageExtension {
    type Err = RehostError;

    /// Accepts a bare extension (`png`, `.PNG`) or a file name (`photo.png`).
    fn from_str(s: &str) -> Result<Self> {
        let extension = s.trim().rsplit('.').next().unwrap_or_default();
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(extension))
            .ok_or_else(|| RehostError::InvalidExtension(s.to_string()))
    }
}

/// Downloads, converts, and zips media files.
pub struct MediaMaterializer<P: MediaProcessor> {
    client: reqwest::Client,
    processor: Arc<P>,
    scratch_root: PathBuf,
}

impl<P: MediaProcessor> MediaMaterializer<P> {
    pub fn new(client: reqwest::Client, processor: Arc<P>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            processor,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Build a zip holding every media file in `manifest` plus the caller's
    /// inline images (`base64 payload -> filename`, the same shape as the
    /// manifest's inline entries; the payload may be a `data:` URL).
    ///
    /// Remote video and animation sources are skipped. A remote file that
    /// cannot be downloaded is logged and left out. A failed format
    /// conversion or malformed base64 fails the whole call.
    pub async fn download_and_zip(
        &self,
        manifest: &MediaManifest,
        inline_base64: &HashMap<String, String>,
    ) -> Result<Vec<u8>> {
        let output = ScratchDir::create(&self.scratch_root, "output").await?;
        let input = ScratchDir::create(&self.scratch_root, "input").await?;

        let zipped = self
            .collect_media(manifest, inline_base64, input.path(), output.path())
            .await;

        input.remove().await;
        output.remove().await;
        zipped
    }

    /// Convert each uploaded `(file name, bytes)` into `extension` and zip the
    /// results. Any conversion failure fails the call.
    pub async fn convert_images(&self, extension: ImageExtension, files: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>> {
        let output = ScratchDir::create(&self.scratch_root, "output").await?;
        let input = ScratchDir::create(&self.scratch_root, "input").await?;

        let zipped = self.convert_all(extension, files, input.path(), output.path()).await;

        input.remove().await;
        output.remove().await;
        zipped
    }

    async fn collect_media(
        &self,
        manifest: &MediaManifest,
        inline_base64: &HashMap<String, String>,
        input: &Path,
        output: &Path,
    ) -> Result<Vec<u8>> {
        let downloads = manifest
            .remote()
            .filter(|(url, _)| {
                let skip = is_skipped_source(url);
                if skip {
                    tracing::debug!("Skipping video source {url}");
                }
                !skip
            })
            .map(|(url, filename)| self.materialize_remote(url, filename, input, output));
        futures::future::try_join_all(downloads).await?;

        let inline = manifest
            .inline()
            .map(|(payload, filename)| (filename, payload))
            .chain(inline_base64.iter().map(|(p, f)| (f.as_str(), p.as_str())));
        for (filename, payload) in inline {
            if filename.trim().is_empty() || payload.trim().is_empty() {
                continue;
            }
            let bytes = decode_payload(payload)?;
            let name = sanitize_filename(filename, "inline.jpg");
            tokio::fs::write(output.join(name), bytes).await?;
        }

        zip_directory(output.to_path_buf()).await
    }

    async fn convert_all(
        &self,
        extension: ImageExtension,
        files: Vec<(String, Vec<u8>)>,
        input: &Path,
        output: &Path,
    ) -> Result<Vec<u8>> {
        for (index, (name, bytes)) in files.into_iter().enumerate() {
            let name = sanitize_filename(&name, &format!("image-{index}"));
            let source = input.join(&name);
            tokio::fs::write(&source, bytes).await?;

            let converted = self.processor.convert_format(&source, extension.as_str()).await?;
            let stem = Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("image");
            tokio::fs::write(output.join(format!("{stem}{extension}")), converted).await?;
        }

        zip_directory(output.to_path_buf()).await
    }

    /// Download one manifest entry into `output` under its assigned name,
    /// converting when the format changes. Download failures are logged and
    /// skipped; conversion failures are returned.
    async fn materialize_remote(&self, url: &str, filename: &str, input: &Path, output: &Path) -> Result<()> {
        let bytes = match self.download(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Skipping media file {url}: {e}");
                return Ok(());
            }
        };

        let filename = sanitize_filename(filename, "media.jpg");
        let source_extension = url_extension(url);
        let target_extension = extension_of(&filename);

        if needs_conversion(&source_extension, &target_extension) {
            let source = input.join(format!("{}.{source_extension}", uuid::Uuid::new_v4()));
            tokio::fs::write(&source, &bytes).await?;
            let converted = self
                .processor
                .convert_format(&source, &target_extension)
                .await
                .inspect_err(|e| tracing::error!("Failed to convert {url} to {filename}: {e}"))?;
            tokio::fs::write(output.join(&filename), converted).await?;
        } else {
            tokio::fs::write(output.join(&filename), &bytes).await?;
        }

        tracing::debug!("Materialized {url} as {filename}");
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let absolute = absolute_url(url).ok_or_else(|| RehostError::InvalidUrl(url.to_string()))?;

        let response = self.client.get(absolute.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RehostError::Retrieval(format!("{absolute} returned {status}")));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// A per-call scratch directory. [`remove`](Self::remove) deletes it
/// asynchronously; dropping it without that (early return, panic,
/// cancellation) falls back to a blocking delete.
struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    async fn create(root: &Path, suffix: &str) -> Result<Self> {
        let path = root.join(format!("{}_{suffix}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path, removed: false })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove scratch directory {}: {e}", self.path.display());
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Blocking, but scratch directories hold one call's media at most.
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove scratch directory {}: {e}", self.path.display());
            }
        }
    }
}

fn is_skipped_source(url: &str) -> bool {
    let extension = url_extension(url);
    VIDEO_EXTENSIONS.contains(&extension.as_str()) || SKIPPED_ANIMATION_EXTENSIONS.contains(&extension.as_str())
}

/// Lower-cased extension of the URL's last path segment, query and fragment
/// ignored.
fn url_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let basename = path.rsplit('/').next().unwrap_or_default();
    extension_of(basename)
}

fn extension_of(filename: &str) -> String {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => filename[dot + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Only raster images change format; kept assets (fonts, svg) and files
/// without a known source extension are stored as downloaded.
fn needs_conversion(source: &str, target: &str) -> bool {
    !source.is_empty() && !KEPT_ASSET_EXTENSIONS.contains(&target) && !same_format(source, target)
}

fn same_format(a: &str, b: &str) -> bool {
    let canonical = |e: &str| if e == "jpeg" { "jpg".to_string() } else { e.to_string() };
    canonical(a) == canonical(b)
}

/// Protocol-relative URLs default to https; relative URLs cannot be fetched.
fn absolute_url(url: &str) -> Option<url::Url> {
    match url.strip_prefix("//") {
        Some(rest) => url::Url::parse(&format!("https://{rest}")).ok(),
        None => url::Url::parse(url).ok(),
    }
}

/// Decode a base64 payload, with or without a `data:...;base64,` prefix.
fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let encoded = match payload.find(";base64,") {
        Some(index) => &payload[index + ";base64,".len()..],
        None => payload,
    };
    Ok(STANDARD.decode(encoded.trim())?)
}

/// Base name only, so entries cannot escape the scratch directory.
fn sanitize_filename(filename: &str, fallback: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(str::to_string)
        .unwrap_or_else(|| normalized_filename(fallback))
}

async fn zip_directory(dir: PathBuf) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || zip_directory_blocking(&dir))
        .await
        .map_err(|e| RehostError::Io(std::io::Error::other(e)))?
}

fn zip_directory_blocking(dir: &Path) -> Result<Vec<u8>> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(1));

    for (name, path) in files {
        zip.start_file(name, options)?;
        zip.write_all(&std::fs::read(path)?)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Every file under `dir` with its `/`-separated path relative to `base`.
fn collect_files(base: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(base) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push((name, path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    struct EchoProcessor;

    impl MediaProcessor for EchoProcessor {
        async fn convert_format(&self, input: &Path, extension: &str) -> Result<Vec<u8>> {
            let mut bytes = tokio::fs::read(input).await?;
            bytes.extend_from_slice(extension.as_bytes());
            Ok(bytes)
        }

        async fn poster_frame(&self, _video_url: &str, _extension: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct BrokenProcessor;

    impl MediaProcessor for BrokenProcessor {
        async fn convert_format(&self, _input: &Path, _extension: &str) -> Result<Vec<u8>> {
            Err(RehostError::Conversion("ffmpeg exited with status 1".into()))
        }

        async fn poster_frame(&self, _video_url: &str, _extension: &str) -> Result<Vec<u8>> {
            Err(RehostError::Conversion("ffmpeg exited with status 1".into()))
        }
    }

    fn materializer(root: &Path) -> MediaMaterializer<EchoProcessor> {
        with_processor(root, EchoProcessor)
    }

    fn with_processor<P: MediaProcessor>(root: &Path, processor: P) -> MediaMaterializer<P> {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        MediaMaterializer::new(client, Arc::new(processor), root)
    }

    /// Serves `body` with status 200 for every request; returns the base URL.
    async fn serve(body: &'static [u8]) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0_u8; 2048];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    fn entries(zip: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(zip)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes).unwrap();
                (file.name().to_string(), bytes)
            })
            .collect()
    }

    #[test]
    fn image_extension_parsing() {
        assert_eq!("photo.PNG".parse::<ImageExtension>().unwrap(), ImageExtension::Png);
        assert_eq!(".webp".parse::<ImageExtension>().unwrap(), ImageExtension::Webp);
        assert_eq!("avif".parse::<ImageExtension>().unwrap(), ImageExtension::Avif);
        assert_eq!(ImageExtension::Jpeg.to_string(), ".jpeg");
        assert!(matches!(
            "clip.mp4".parse::<ImageExtension>(),
            Err(RehostError::InvalidExtension(_))
        ));
    }

    #[test]
    fn video_and_gif_sources_are_skipped() {
        assert!(is_skipped_source("https://cdn.example/clip.MP4?x=1"));
        assert!(is_skipped_source("//cdn/anim.gif"));
        assert!(!is_skipped_source("https://cdn.example/photo.webp"));
        assert!(!is_skipped_source("https://cdn.example/noext"));
    }

    #[test]
    fn payload_prefix_is_optional() {
        assert_eq!(decode_payload("data:image/jpeg;base64,AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(decode_payload("AQID").unwrap(), vec![1, 2, 3]);
        assert!(decode_payload("not base64!").is_err());
    }

    #[test]
    fn filenames_cannot_escape_scratch() {
        assert_eq!(sanitize_filename("../../etc/passwd", "x.jpg"), "passwd");
        assert_eq!(sanitize_filename("..", "x.jpg"), "x.jpg");
    }

    #[tokio::test]
    async fn inline_payloads_are_zipped_and_scratch_removed() {
        let scratch = TempDir::new().unwrap();
        let mut manifest = MediaManifest::new();
        manifest.register("data:image/jpeg;base64,AQID", "poster-0.jpg");
        manifest.register("https://cdn.example/clip.mp4", "clip.mp4");
        let inline = HashMap::from([("BAUG".to_string(), "extra.png".to_string())]);

        let zip = materializer(scratch.path())
            .download_and_zip(&manifest, &inline)
            .await
            .unwrap();

        assert_eq!(
            entries(zip),
            vec![
                ("extra.png".to_string(), vec![4, 5, 6]),
                ("poster-0.jpg".to_string(), vec![1, 2, 3]),
            ]
        );
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreachable_media_is_left_out() {
        let scratch = TempDir::new().unwrap();
        let mut manifest = MediaManifest::new();
        manifest.register("http://127.0.0.1:9/photo.png", "photo.png");

        let zip = materializer(scratch.path())
            .download_and_zip(&manifest, &HashMap::new())
            .await
            .unwrap();

        assert!(entries(zip).is_empty());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn bad_base64_fails_and_still_cleans_up() {
        let scratch = TempDir::new().unwrap();
        let inline = HashMap::from([("%%%".to_string(), "x.png".to_string())]);

        let err = materializer(scratch.path())
            .download_and_zip(&MediaManifest::new(), &inline)
            .await
            .unwrap_err();

        assert!(matches!(err, RehostError::Base64(_)));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn uploads_are_converted_to_the_requested_extension() {
        let scratch = TempDir::new().unwrap();
        let files = vec![("shot.webp".to_string(), b"img".to_vec())];

        let zip = materializer(scratch.path())
            .convert_images(ImageExtension::Png, files)
            .await
            .unwrap();

        assert_eq!(entries(zip), vec![("shot.png".to_string(), b"imgpng".to_vec())]);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn downloaded_image_is_converted_to_its_manifest_name() {
        let scratch = TempDir::new().unwrap();
        let base = serve(b"raw").await;
        let mut manifest = MediaManifest::new();
        manifest.register(&format!("{base}/photo.webp"), "photo.jpg");

        let zip = materializer(scratch.path())
            .download_and_zip(&manifest, &HashMap::new())
            .await
            .unwrap();

        assert_eq!(entries(zip), vec![("photo.jpg".to_string(), b"rawjpg".to_vec())]);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_conversion_fails_the_call_and_cleans_up() {
        let scratch = TempDir::new().unwrap();
        let base = serve(b"raw").await;
        let mut manifest = MediaManifest::new();
        manifest.register(&format!("{base}/photo.webp"), "photo.jpg");

        let err = with_processor(scratch.path(), BrokenProcessor)
            .download_and_zip(&manifest, &HashMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RehostError::Conversion(_)));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn fonts_are_stored_without_conversion() {
        let scratch = TempDir::new().unwrap();
        let base = serve(b"wOF2").await;
        let mut manifest = MediaManifest::new();
        let url = format!("{base}/fonts/Roboto.woff2");
        manifest.register(&url, &normalized_filename(&url));

        let zip = with_processor(scratch.path(), BrokenProcessor)
            .download_and_zip(&manifest, &HashMap::new())
            .await
            .unwrap();

        assert_eq!(entries(zip), vec![("roboto.woff2".to_string(), b"wOF2".to_vec())]);
    }

    #[test]
    fn only_raster_format_changes_need_conversion() {
        assert!(needs_conversion("webp", "jpg"));
        assert!(!needs_conversion("jpeg", "jpg"));
        assert!(!needs_conversion("", "jpg"));
        assert!(!needs_conversion("woff2", "woff2"));
        assert!(!needs_conversion("ttf", "svg"));
    }
}
