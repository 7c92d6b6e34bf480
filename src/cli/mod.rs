//! CLI 모듈
//!
//! fusion-rag CLI 명령어 정의 및 구현. 청크 풀은 `DocumentChunk` JSON 배열
//! 파일로 받고, 내장 참조 구현(메모리 벡터 저장소, 해싱 임베딩, 패턴 추출기)으로
//! 엔진을 구성합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{get_config_dir, RagConfig};
use crate::knowledge::{
    DocumentChunk, EvalCase, FusionEngine, FusionStrategy, Query, RetrievalEvaluator, RetrievalMode,
    RetrievalWeights,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "fusion-rag")]
#[command(version, about = "하이브리드 검색 융합/리랭킹 엔진", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: ~/.fusion-rag/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 청크 풀 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 청크 풀 JSON 파일
        #[arg(short, long)]
        pool: PathBuf,

        /// 검색 모드 (vector, keyword, graph, hybrid, all, adaptive)
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<RetrievalMode>,

        /// 결과 개수
        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,

        /// 융합 전략 (weighted, rrf, max)
        #[arg(short, long, value_parser = parse_fusion)]
        fusion: Option<FusionStrategy>,

        /// 융합 가중치 "vector,keyword,graph" (예: 0.5,0.3,0.2)
        #[arg(short, long, value_parser = parse_weights)]
        weights: Option<RetrievalWeights>,

        /// 리랭킹 끄기
        #[arg(long)]
        no_rerank: bool,

        /// 쿼리 확장 사용
        #[arg(long)]
        expand: bool,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 지식 그래프 구축 및 통계
    Graph {
        /// 청크 풀 JSON 파일
        #[arg(short, long)]
        pool: PathBuf,

        /// 출력할 상위 엔티티 수
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// 평가 세트 실행 (융합 전략별)
    Eval {
        /// 청크 풀 JSON 파일
        #[arg(short, long)]
        pool: PathBuf,

        /// 평가 케이스 JSON 파일
        #[arg(short, long)]
        cases: PathBuf,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 적용 중인 설정 출력
    Config,

    /// 상태 확인 (풀을 주면 색인/그래프 구축 후 확인)
    Status {
        /// 청크 풀 JSON 파일
        #[arg(short, long)]
        pool: Option<PathBuf>,
    },
}

fn parse_mode(s: &str) -> std::result::Result<RetrievalMode, String> {
    RetrievalMode::parse(s).ok_or_else(|| format!("알 수 없는 검색 모드: {}", s))
}

fn parse_fusion(s: &str) -> std::result::Result<FusionStrategy, String> {
    FusionStrategy::parse(s).ok_or_else(|| format!("알 수 없는 융합 전략: {}", s))
}

fn parse_weights(s: &str) -> std::result::Result<RetrievalWeights, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<f64>, _>>()
        .map_err(|e| format!("잘못된 가중치: {} ({})", s, e))?;

    match values.as_slice() {
        &[vector, keyword, graph] if values.iter().all(|v| v.is_finite() && *v >= 0.0) => Ok(RetrievalWeights {
            vector,
            keyword,
            graph,
        }),
        _ => Err(format!("가중치는 0 이상의 숫자 3개여야 합니다: {}", s)),
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;

    match cli.command {
        Commands::Search {
            query,
            pool,
            mode,
            top_k,
            fusion,
            weights,
            no_rerank,
            expand,
            json,
        } => {
            let mut q = Query::new(query)
                .with_top_k(top_k)
                .with_reranking(!no_rerank)
                .with_expansion(expand);
            if let Some(mode) = mode {
                q = q.with_mode(mode);
            }
            if let Some(fusion) = fusion {
                q = q.with_fusion(fusion);
            }
            if let Some(weights) = weights {
                q = q.with_weights(weights);
            }
            cmd_search(config, &q, &pool, json).await
        }
        Commands::Graph { pool, top } => cmd_graph(config, &pool, top).await,
        Commands::Eval { pool, cases, json } => cmd_eval(config, &pool, &cases, json).await,
        Commands::Config => cmd_config(&config),
        Commands::Status { pool } => cmd_status(config, pool.as_deref()).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 검색 명령어 (search)
async fn cmd_search(config: RagConfig, query: &Query, pool_path: &Path, json: bool) -> Result<()> {
    let pool = load_pool(pool_path)?;
    let engine = prepare_engine(config, &pool).await?;

    if !json {
        println!("[*] 검색 중: \"{}\"", query.text);
    }

    let response = engine.search(query, &pool).await.context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다 (필터 적용 후 0 건).");
        return Ok(());
    }

    let mode = response
        .debug_info
        .get("retrieval_mode")
        .and_then(|v| v.as_str())
        .unwrap_or("-");
    println!(
        "\n[OK] 검색 결과 ({} 건, 모드: {}, 신뢰도: {:.3}, 커버리지: {:.3}):\n",
        response.results.len(),
        mode,
        response.confidence_score,
        response.coverage_score
    );

    for result in &response.results {
        let chunk = &result.chunk;
        println!(
            "{}. [{}] [점수: {:.4}] {}",
            result.rank, result.retrieval_method, result.score, chunk.id
        );
        match chunk.page_number {
            Some(page) => println!("   출처: {} (p.{})", chunk.source_doc_id, page),
            None => println!("   출처: {}", chunk.source_doc_id),
        }
        println!("   내용: {}", truncate_text(&chunk.content, 200));
        println!();
    }

    println!(
        "[*] 검색 {:?}, 리랭킹 {:?}",
        response.retrieval_time, response.rerank_time
    );

    Ok(())
}

/// 그래프 명령어 (graph)
async fn cmd_graph(config: RagConfig, pool_path: &Path, top: usize) -> Result<()> {
    let pool = load_pool(pool_path)?;
    let engine = FusionEngine::with_reference_stack(config).context("엔진 생성 실패")?;

    println!("[*] 지식 그래프 구축 중...");
    let report = engine.build_graph(&pool).await.context("그래프 구축 실패")?;

    if report.degraded() {
        println!(
            "[!] 일부 청크 추출 실패 ({} / {}), 빈도 기반 중요도 사용",
            report.failures(), report.chunks
        );
    }
    println!(
        "[OK] 엔티티 {} 개, 관계 {} 개 ({} 청크)",
        report.entities, report.relations, report.chunks
    );

    let Some(built) = engine.knowledge_graph() else {
        return Ok(());
    };

    println!("\n[*] 중요도 상위 엔티티:\n");
    for (i, entity) in built.graph.top_entities(top).into_iter().enumerate() {
        println!(
            "  {:>2}. {:<30} [{}] 중요도 {:.3}, 빈도 {}",
            i + 1,
            truncate_text(&entity.name, 30),
            entity.entity_type,
            entity.importance_score,
            entity.frequency
        );
    }

    Ok(())
}

/// 평가 명령어 (eval)
async fn cmd_eval(config: RagConfig, pool_path: &Path, cases_path: &Path, json: bool) -> Result<()> {
    let pool = load_pool(pool_path)?;
    let raw = std::fs::read_to_string(cases_path)
        .with_context(|| format!("평가 케이스 파일 읽기 실패: {}", cases_path.display()))?;
    let cases: Vec<EvalCase> = serde_json::from_str(&raw).context("평가 케이스 JSON 파싱 실패")?;

    let engine = prepare_engine(config, &pool).await?;

    if !json {
        println!("[*] {} 개 쿼리 평가 중 (전략: weighted, rrf, max)", cases.len());
    }

    let report = RetrievalEvaluator::default().run_suite(&engine, &cases, &pool).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n[OK] 전체 지표 ({} 쿼리):\n", report.num_queries);
    for (metric, value) in &report.overall_metrics {
        println!("  {:<28} {:.4}", metric, value);
    }

    for (category, metrics) in &report.category_metrics {
        println!("\n[*] 카테고리: {}", category);
        for strategy in FusionStrategy::ALL {
            let key = format!("{}_mrr", strategy);
            if let Some(mrr) = metrics.get(&key) {
                let map = metrics.get(&format!("{}_map", strategy)).copied().unwrap_or(0.0);
                println!("  {:<10} MRR {:.4}  MAP {:.4}", strategy.as_str(), mrr, map);
            }
        }
    }

    if report.failed_queries > 0 {
        println!("\n[!] 실패한 검색: {} 건 (빈 결과로 평가)", report.failed_queries);
    }

    Ok(())
}

/// 설정 명령어 (config)
fn cmd_config(config: &RagConfig) -> Result<()> {
    println!("[*] 설정 디렉토리: {}", get_config_dir().display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig, pool_path: Option<&Path>) -> Result<()> {
    println!("fusion-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let engine = match pool_path {
        Some(path) => {
            let pool = load_pool(path)?;
            let engine = prepare_engine(config, &pool).await?;
            engine.build_graph(&pool).await.context("그래프 구축 실패")?;
            engine
        }
        None => FusionEngine::with_reference_stack(config).context("엔진 생성 실패")?,
    };

    let status = engine.status().await;
    println!("[OK] 검색기: {}", status.retrievers.join(", "));
    println!("[OK] 리랭킹 파이프라인: {}", status.rerank_pipeline.join(" -> "));
    if let Some(state) = status.graph_state {
        println!(
            "[*] 지식 그래프: {} (엔티티 {}, 관계 {})",
            state.as_str(),
            status.entity_count,
            status.relation_count
        );
    }
    println!("[*] BM25 색인 청크: {}", status.indexed_chunks);
    match status.vector_count {
        Some(count) => println!("[*] 벡터 수: {}", count),
        None => println!("[!] 벡터 저장소: 사용 불가"),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 청크 풀 JSON 로드
fn load_pool(path: &Path) -> Result<Vec<Arc<DocumentChunk>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("청크 풀 파일 읽기 실패: {}", path.display()))?;
    let chunks: Vec<DocumentChunk> = serde_json::from_str(&raw).context("청크 풀 JSON 파싱 실패")?;

    tracing::info!("Loaded {} chunks ({})", chunks.len(), format_bytes(raw.len()));
    Ok(chunks.into_iter().map(Arc::new).collect())
}

/// 참조 구현 엔진 생성 후 청크 임베딩 색인
async fn prepare_engine(config: RagConfig, pool: &[Arc<DocumentChunk>]) -> Result<FusionEngine> {
    let engine = FusionEngine::with_reference_stack(config).context("엔진 생성 실패")?;
    engine.index_vectors(pool).await.context("벡터 색인 실패")?;
    Ok(engine)
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("검색\n결과", 20), "검색 결과");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
    }

    #[test]
    fn test_parse_search_args() {
        let cli = Cli::try_parse_from([
            "fusion-rag", "search", "rust ownership", "--pool", "pool.json", "--mode", "all", "-k", "3",
            "--fusion", "rrf", "--weights", "0.2, 0.7,0.1", "--no-rerank",
        ])
        .unwrap();

        match cli.command {
            Commands::Search {
                query,
                mode,
                top_k,
                fusion,
                weights,
                no_rerank,
                expand,
                ..
            } => {
                assert_eq!(query, "rust ownership");
                assert_eq!(mode, Some(RetrievalMode::HybridAll));
                assert_eq!(top_k, 3);
                assert_eq!(fusion, Some(FusionStrategy::Rrf));
                assert_eq!(weights.map(|w| w.keyword), Some(0.7));
                assert!(no_rerank);
                assert!(!expand);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn test_parse_weights_rejects_bad_input() {
        assert!(parse_weights("0.5,0.5").is_err());
        assert!(parse_weights("0.5,-0.1,0.6").is_err());
        assert!(parse_weights("a,b,c").is_err());
        assert_eq!(parse_weights("1,0,0").unwrap().vector, 1.0);
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let parsed = Cli::try_parse_from(["fusion-rag", "search", "q", "--pool", "p.json", "--mode", "fuzzy"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_load_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(
            &path,
            r#"[{ "id": "c1", "content": "Rust is fast", "source_doc_id": "d1", "page_number": 3 }]"#,
        )
        .unwrap();

        let pool = load_pool(&path).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].page_number, Some(3));

        std::fs::write(&path, "not json").unwrap();
        assert!(load_pool(&path).is_err());
    }
}
