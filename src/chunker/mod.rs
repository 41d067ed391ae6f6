//! Text Chunking Module
//!
//! 문서 텍스트를 고정 크기의 오버랩 청크로 분할하고,
//! 각 청크를 독립된 텍스트 아티팩트로 영속화합니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 연속 청크 간 오버랩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 500,
            overlap_characters: 50,
        }
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 문서에서 잘라낸 텍스트 청크
///
/// `index`는 문서 내 원본 순서입니다 (필터링 후 0부터 부여).
/// 생성 후에는 불변입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 원본 순서 인덱스 (0-based)
    pub index: usize,
    /// 청크 텍스트
    pub text: String,
}

// ============================================================================
// Splitting
// ============================================================================

/// 텍스트를 고정 크기 슬라이딩 윈도우로 분할
///
/// 각 청크는 최대 `max_characters` 문자이고, 연속 청크는 이전 청크의
/// 마지막 `overlap_characters` 문자를 반복합니다. 마지막 청크는 텍스트
/// 끝을 넘어 패딩되지 않습니다. 문자 단위로 동작하므로 UTF-8 안전합니다.
pub fn split_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![];
    }

    let max = config.max_characters.max(1);
    // 오버랩이 청크 크기 이상이면 진행이 불가능하므로 제한
    let overlap = config.overlap_characters.min(max - 1);
    let step = max - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max).min(chars.len());
        chunks.push(chars[start..end].iter().collect());

        if end >= chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// 페이지별 텍스트를 청크 컬렉션으로 변환
///
/// 각 페이지를 독립적으로 분할하고, 공백뿐인 청크를 버린 뒤
/// 문서 전체 기준의 순서 인덱스를 부여합니다.
pub fn chunk_pages(pages: &[(usize, String)], config: &ChunkConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (_page, text) in pages {
        for piece in split_text(text, config) {
            if piece.trim().is_empty() {
                continue;
            }
            chunks.push(Chunk {
                index: chunks.len(),
                text: piece,
            });
        }
    }

    chunks
}

// ============================================================================
// ChunkStore
// ============================================================================

/// 온디스크 청크 저장소
///
/// 청크 하나당 UTF-8 텍스트 파일 하나를 씁니다 (구분자/메타데이터 없음).
/// 파일명에 0 패딩된 정렬 가능 인덱스를 넣어 재로드 시 원본 문서 순서를
/// 복원합니다.
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// 저장소 디렉토리 지정
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// 저장소 디렉토리 존재 여부
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// 청크 컬렉션을 아티팩트로 기록
    ///
    /// 디렉토리가 없으면 생성합니다. 빈 컬렉션도 성공합니다 (빈 출력).
    /// 기존 아티팩트는 먼저 제거하여 이전 빌드 잔여물이 섞이지 않게 합니다.
    pub fn write(&self, chunks: &[Chunk]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create chunk directory: {:?}", self.dir))?;

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove stale chunk: {:?}", path))?;
            }
        }

        for chunk in chunks {
            let path = self.chunk_path(chunk.index);
            std::fs::write(&path, &chunk.text)
                .with_context(|| format!("Failed to write chunk artifact: {:?}", path))?;
        }

        tracing::info!("Wrote {} chunk artifacts to {:?}", chunks.len(), self.dir);
        Ok(())
    }

    /// 아티팩트에서 청크 컬렉션 재로드
    ///
    /// 파일명에서 파싱한 숫자 인덱스로 정렬하여 원본 순서를 복원합니다.
    /// 문자열 정렬이 아니므로 패딩 자리수를 넘는 인덱스에서도 순서가
    /// 유지됩니다.
    pub fn load(&self) -> Result<Vec<Chunk>> {
        let mut entries: Vec<(usize, PathBuf)> = Vec::new();

        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read chunk directory: {:?}", self.dir))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }

            let index = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("chunk_"))
                .and_then(|n| n.parse::<usize>().ok());

            if let Some(index) = index {
                entries.push((index, path));
            }
        }

        entries.sort_by_key(|(index, _)| *index);

        let mut chunks = Vec::with_capacity(entries.len());
        for (index, path) in entries {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read chunk artifact: {:?}", path))?;

            chunks.push(Chunk { index, text });
        }

        Ok(chunks)
    }

    /// 저장된 아티팩트 개수
    pub fn count(&self) -> usize {
        std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("txt"))
                    .count()
            })
            .unwrap_or(0)
    }

    fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("chunk_{:04}.txt", index))
    }
}

// ============================================================================
// Tests
// ============================================================================
