//! CLI 모듈
//!
//! docrag CLI 명령어 정의 및 구현

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::chunker::ChunkStore;
use crate::embedding::{EmbeddingProvider, LocalEmbedding};
use crate::extractor::extract_text_from_pdf;
use crate::index::LanceVectorIndex;
use crate::pipeline::{
    build_stores, document_fingerprint, store_state, BuildManifest, PipelineConfig, RagPipeline,
    StoreState,
};
use crate::qa::{has_api_key, AnswerGenerator, DEFAULT_CHAT_MODEL};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docrag")]
#[command(version, about = "단일 PDF 문서 질의응답 RAG 파이프라인", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// PDF를 청킹하고 벡터 인덱스를 구축
    Ingest {
        /// 소스 PDF 경로
        #[arg(short, long)]
        pdf: PathBuf,

        /// 데이터 디렉토리 (기본: ~/.docrag)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// 저장소가 Ready여도 강제 재구축
        #[arg(long)]
        force: bool,
    },

    /// 문서에 대한 단일 질의에 답변
    Ask {
        /// 질의 텍스트
        query: String,

        /// 소스 PDF 경로
        #[arg(short, long)]
        pdf: PathBuf,

        /// 데이터 디렉토리 (기본: ~/.docrag)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// 완성 모델 식별자
        #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
        model: String,
    },

    /// 대화형 질의응답 세션
    Chat {
        /// 소스 PDF 경로
        #[arg(short, long)]
        pdf: PathBuf,

        /// 데이터 디렉토리 (기본: ~/.docrag)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// 완성 모델 식별자
        #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
        model: String,
    },

    /// 상태 확인
    Status {
        /// 소스 PDF 경로 (지정 시 저장소 최신 여부 판정)
        #[arg(short, long)]
        pdf: Option<PathBuf>,

        /// 데이터 디렉토리 (기본: ~/.docrag)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            pdf,
            data_dir,
            force,
        } => cmd_ingest(pdf, data_dir, force).await,
        Commands::Ask {
            query,
            pdf,
            data_dir,
            model,
        } => cmd_ask(&query, pdf, data_dir, model).await,
        Commands::Chat {
            pdf,
            data_dir,
            model,
        } => cmd_chat(pdf, data_dir, model).await,
        Commands::Status { pdf, data_dir } => cmd_status(pdf, data_dir).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 구축 명령어 (ingest)
///
/// 청크 저장소와 벡터 인덱스를 구축합니다. API 키는 필요 없습니다
/// (임베딩은 로컬 모델).
async fn cmd_ingest(pdf: PathBuf, data_dir: Option<PathBuf>, force: bool) -> Result<()> {
    let config = PipelineConfig::new(pdf, data_dir);

    let doc_bytes = std::fs::read(&config.document)
        .with_context(|| format!("PDF를 읽을 수 없습니다: {:?}", config.document))?;
    let fingerprint = document_fingerprint(&doc_bytes);

    println!("[*] 임베딩 모델 로딩 중...");
    let embedder = LocalEmbedding::new().context("임베딩 모델 초기화 실패")?;

    let state = store_state(&config, &fingerprint, embedder.name())?;
    if state == StoreState::Ready && !force {
        println!("[OK] 저장소가 이미 최신입니다 (--force로 재구축 가능)");
        return Ok(());
    }

    println!("[*] PDF 청킹 중: {:?}", config.document);
    let pages = extract_text_from_pdf(&config.document)?;

    println!("[*] 임베딩 및 인덱스 구축 중...");
    let index = build_stores(&config, &pages, &embedder, &fingerprint)
        .await
        .context("저장소 구축 실패")?;

    let chunk_count = ChunkStore::new(&config.chunk_dir()).count();
    println!("[OK] 구축 완료: 청크 {} 개, 벡터 {} 개", chunk_count, index.count().await?);
    println!("     데이터 디렉토리: {}", config.data_dir.display());

    Ok(())
}

/// 단일 질의 명령어 (ask)
async fn cmd_ask(
    query: &str,
    pdf: PathBuf,
    data_dir: Option<PathBuf>,
    model: String,
) -> Result<()> {
    let pipeline = init_pipeline(pdf, data_dir, model).await?;

    println!("[*] 검색 및 답변 생성 중...");
    let answer = pipeline.answer(query).await.context("답변 생성 실패")?;

    println!("\n{}", answer);
    Ok(())
}

/// 대화형 세션 명령어 (chat)
///
/// 질의별 생성 에러는 해당 질의의 결과로 표시될 뿐이며 세션은
/// 계속됩니다.
async fn cmd_chat(pdf: PathBuf, data_dir: Option<PathBuf>, model: String) -> Result<()> {
    let pipeline = init_pipeline(pdf, data_dir, model).await?;

    println!("[OK] 준비 완료. 문서에 대해 질문하세요 (빈 줄 또는 exit로 종료)\n");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("질문> ");
        std::io::stdout().flush().ok();

        let line = match lines.next() {
            Some(line) => line.context("입력 읽기 실패")?,
            None => break,
        };

        let query = line.trim();
        if query.is_empty() || query == "exit" || query == "quit" {
            break;
        }

        match pipeline.answer(query).await {
            Ok(answer) => println!("\n{}\n", answer),
            Err(e) => println!("\n[!] 오류: {}\n", e),
        }
    }

    println!("[OK] 세션 종료");
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(pdf: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<()> {
    println!("docrag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = data_dir.unwrap_or_else(crate::pipeline::get_data_dir);
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GROQ_API_KEY=your-key");
    }

    let chunk_store = ChunkStore::new(&data_dir.join("chunks"));
    if chunk_store.exists() {
        println!("[OK] 청크 저장소: {} 아티팩트", chunk_store.count());
    } else {
        println!("[!] 청크 저장소: 없음");
    }

    if LanceVectorIndex::exists(&data_dir.join("vectordb")) {
        println!("[OK] 벡터 인덱스: 존재함");
    } else {
        println!("[!] 벡터 인덱스: 없음");
    }

    let config = PipelineConfig::new(pdf.clone().unwrap_or_default(), Some(data_dir));

    match BuildManifest::load(&config.manifest_path())? {
        Some(manifest) => {
            println!("[OK] 매니페스트:");
            println!("     청크 수: {}", manifest.chunk_count);
            println!("     임베딩 모델: {}", manifest.embedding_model);
            println!(
                "     구축 시각: {}",
                manifest.built_at.format("%Y-%m-%d %H:%M")
            );

            // PDF가 지정되면 최신 여부 판정
            if let Some(ref pdf_path) = pdf {
                let doc_bytes = std::fs::read(pdf_path)
                    .with_context(|| format!("PDF를 읽을 수 없습니다: {:?}", pdf_path))?;
                let fingerprint = document_fingerprint(&doc_bytes);
                let state = store_state(&config, &fingerprint, &manifest.embedding_model)?;
                println!("[*] 저장소 상태: {:?}", state);
            }
        }
        None => println!("[!] 매니페스트: 없음 (ingest를 먼저 실행하세요)"),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 질의용 파이프라인 초기화
///
/// API 키 확인 (네트워크 요청 전 즉시 실패) 후 임베딩 모델을 로드하고,
/// 저장소가 없거나 오래되었으면 구축합니다.
async fn init_pipeline(
    pdf: PathBuf,
    data_dir: Option<PathBuf>,
    model: String,
) -> Result<RagPipeline> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GROQ_API_KEY=your-api-key\n\n\
             API 키 발급: https://console.groq.com/keys"
        );
    }

    let mut config = PipelineConfig::new(pdf, data_dir);
    config.chat_model = model.clone();

    let generator = AnswerGenerator::from_env(model).context("답변 생성기 초기화 실패")?;

    println!("[*] 임베딩 모델 로딩 중...");
    let embedder = Arc::new(LocalEmbedding::new().context("임베딩 모델 초기화 실패")?);

    println!("[*] 파이프라인 초기화 중...");
    RagPipeline::initialize(&config, embedder, generator, false)
        .await
        .context("파이프라인 초기화 실패")
}

// ============================================================================
// Tests
// ============================================================================
