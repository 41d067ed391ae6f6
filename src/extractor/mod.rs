//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 소스 PDF에서 페이지별 텍스트를 추출합니다.
//! 입력 문서는 읽기 전용이며 초기화 시 한 번만 읽습니다.

use std::path::Path;

use anyhow::{Context, Result};

/// PDF에서 텍스트 추출
///
/// 페이지별로 텍스트를 추출하여 (페이지 번호, 텍스트) 튜플 벡터로 반환합니다.
/// 페이지 번호는 1부터 시작합니다.
pub fn extract_text_from_pdf(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    // 텍스트가 비어있으면 경고 (스캔 문서 가능성)
    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![(1, String::new())]);
    }

    let pages = split_pdf_pages(&text);

    if pages.is_empty() {
        Ok(vec![(1, text)])
    } else {
        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| (i + 1, text))
            .collect())
    }
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)로 페이지 분리 시도
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // 페이지 구분자 패턴으로 시도 (일부 PDF에서 사용)
    // 예: "--- Page 1 ---" 또는 "=== 2 ===" 형태의 줄
    let page_pattern = regex::Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
        .expect("Invalid regex");

    if page_pattern.is_match(text) {
        let pages: Vec<String> = page_pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    // 분리 실패 - 전체를 하나의 페이지로
    vec![text.to_string()]
}

// ============================================================================
// Tests
// ============================================================================
