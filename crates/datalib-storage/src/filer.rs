use std::path::{Path, PathBuf};

use async_trait::async_trait;
use datalib_core::Asset;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FilerError {
    #[error("unknown image mime type `{0}`")]
    UnknownMimeType(String),
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for binary assets such as company icons and logos.
#[async_trait]
pub trait Filer: Send + Sync {
    async fn create_file(&self, name: &str, data: &[u8]) -> Result<PathBuf, FilerError>;
}

/// Resolves a filer spec such as `file:///var/lib/datalib/logos/`.
pub fn filer_from_spec(spec: &str) -> Option<Box<dyn Filer>> {
    spec.strip_prefix("file://")
        .map(|path| Box::new(FsFiler::new(path)) as Box<dyn Filer>)
}

#[derive(Debug, Clone)]
pub struct FsFiler {
    root: PathBuf,
}

impl FsFiler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Filer for FsFiler {
    /// Writes through a temp file and renames into place, replacing any older copy.
    async fn create_file(&self, name: &str, data: &[u8]) -> Result<PathBuf, FilerError> {
        let io = |action: &'static str, path: &Path| {
            let path = path.to_path_buf();
            move |source| FilerError::Io { action, path, source }
        };

        fs::create_dir_all(&self.root)
            .await
            .map_err(io("creating directory", &self.root))?;

        let target = self.root.join(name);
        let temp_path = self.root.join(format!(".{}.{}.tmp", Uuid::new_v4(), data.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io("opening temp file", &temp_path))?;
        file.write_all(data)
            .await
            .map_err(io("writing temp file", &temp_path))?;
        file.flush()
            .await
            .map_err(io("flushing temp file", &temp_path))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io("renaming into", &target)(err));
        }
        Ok(target)
    }
}

/// A named branding image pulled off an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrandingFile<'a> {
    pub name: String,
    pub data: &'a [u8],
}

fn image_extension(mime_type: &str) -> Result<Option<&'static str>, FilerError> {
    match mime_type {
        "" => Ok(None),
        "image/jpeg" => Ok(Some("jpg")),
        "image/png" => Ok(Some("png")),
        "image/svg+xml" | "image/svg" => Ok(Some("svg")),
        other => Err(FilerError::UnknownMimeType(other.to_string())),
    }
}

/// `<figi>-icon.<ext>` and `<figi>-logo.<ext>` for whichever images are present.
pub fn branding_files(asset: &Asset) -> Result<Vec<BrandingFile<'_>>, FilerError> {
    let mut files = Vec::with_capacity(2);
    for (kind, mime_type, data) in [
        ("icon", asset.icon_mime_type.as_str(), asset.icon.as_slice()),
        ("logo", asset.logo_mime_type.as_str(), asset.logo.as_slice()),
    ] {
        if let Some(ext) = image_extension(mime_type)? {
            if data.is_empty() {
                continue;
            }
            files.push(BrandingFile {
                name: format!("{}-{kind}.{ext}", asset.composite_figi),
                data,
            });
        }
    }
    Ok(files)
}

pub async fn save_branding(filer: &dyn Filer, asset: &Asset) -> Result<Vec<PathBuf>, FilerError> {
    let mut written = Vec::new();
    for file in branding_files(asset)? {
        written.push(filer.create_file(&file.name, file.data).await?);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn branded_asset() -> Asset {
        Asset {
            ticker: "AAPL".into(),
            composite_figi: "BBG000B9XRY4".into(),
            icon: b"\x89PNG".to_vec(),
            icon_mime_type: "image/png".into(),
            logo: b"<svg/>".to_vec(),
            logo_mime_type: "image/svg+xml".into(),
            ..Default::default()
        }
    }

    #[test]
    fn file_spec_resolves_to_filesystem_filer() {
        assert!(filer_from_spec("file:///tmp/logos/").is_some());
        assert!(filer_from_spec("s3://bucket/logos").is_none());
    }

    #[test]
    fn branding_names_follow_mime_type() {
        let asset = branded_asset();
        let names: Vec<_> = branding_files(&asset)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["BBG000B9XRY4-icon.png", "BBG000B9XRY4-logo.svg"]);
    }

    #[test]
    fn unknown_mime_type_is_an_error() {
        let mut asset = branded_asset();
        asset.logo_mime_type = "image/webp".into();
        assert!(matches!(
            branding_files(&asset),
            Err(FilerError::UnknownMimeType(m)) if m == "image/webp"
        ));
    }

    #[tokio::test]
    async fn filesystem_filer_writes_and_overwrites() {
        let dir = tempdir().expect("tempdir");
        let filer = FsFiler::new(dir.path().join("logos"));
        let asset = branded_asset();

        let written = save_branding(&filer, &asset).await.expect("first save");
        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read(&written[0]).unwrap(), b"\x89PNG");

        let mut updated = asset.clone();
        updated.icon = b"\x89PNG-v2".to_vec();
        save_branding(&filer, &updated).await.expect("second save");
        assert_eq!(std::fs::read(&written[0]).unwrap(), b"\x89PNG-v2");

        let leftovers = std::fs::read_dir(filer.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
