//! 서버 미디어 디렉터리
//!
//! - 허용 확장자 필터링
//! - 프레이밍을 깨는 이름(`#`, `;`) 제외
//! - 선택 이름을 디렉터리 밖으로 벗어나지 못하게 검증

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::message::LIST_SEPARATOR;
use crate::{Config, Error, Result, DELIMITER};

/// 서버가 광고하는 미디어 소스 집합
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    root: PathBuf,
    extensions: Vec<String>,
}

impl MediaLibrary {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.media_dir.clone(), config.extensions.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 광고 가능한 소스 이름 목록 (정렬됨)
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("non UTF-8 file name skipped: {:?}", entry.file_name());
                continue;
            };
            if !self.has_allowed_extension(&name) {
                continue;
            }
            if !is_wire_safe(&name) {
                warn!("file name collides with framing, skipped: {:?}", name);
                continue;
            }
            names.push(name);
        }

        names.sort();
        debug!("{} sources in {:?}", names.len(), self.root);
        Ok(names)
    }

    /// 선택 이름을 실제 파일 경로로 변환
    ///
    /// 경로 구분자/상위 디렉터리 참조, 비허용 확장자, 존재하지 않는 파일은 모두 `SelectionNotFound`
    pub async fn resolve(&self, name: &str) -> Result<PathBuf> {
        let not_found = || Error::SelectionNotFound {
            name: name.to_string(),
        };

        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || !is_wire_safe(name)
            || !self.has_allowed_extension(name)
        {
            return Err(not_found());
        }

        let path = self.root.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(not_found()),
        }
    }

    fn has_allowed_extension(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

fn is_wire_safe(name: &str) -> bool {
    !name.as_bytes().contains(&DELIMITER) && !name.contains(LIST_SEPARATOR)
}
