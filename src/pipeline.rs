//! The two-stage question-answering pipeline.
//!
//! Per request: the informal question is reformulated into a formal legal
//! query, the reformulated query drives retrieval, and the retrieved
//! context plus the reformulated query produce one grounded answer. The
//! stages are strictly sequential; a failure at any stage aborts the
//! request with a typed error — never a partial or fabricated answer.
//!
//! Reformulation failures propagate. There is no fallback to retrieving on
//! the raw question, so retrieval always operates on the reformulated text.

use sqlx::SqlitePool;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::generation::Generator;
use crate::models::{Answer, AnswerSections, RetrievedChunk};
use crate::prompt::{self, SENTINEL};
use crate::retrieve;

/// Everything produced for one request.
#[derive(Debug)]
pub struct QueryOutcome {
    pub raw_text: String,
    pub reformulated_text: String,
    pub retrieved: Vec<RetrievedChunk>,
    pub answer: Answer,
}

/// Run the full pipeline for one informal question.
pub async fn ask(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    retrieval: &RetrievalConfig,
    raw_text: &str,
    k: usize,
) -> Result<QueryOutcome> {
    let reformulated_text = reformulate(raw_text, generator).await?;
    let retrieved = retrieve::retrieve(pool, embedder, retrieval, &reformulated_text, k).await?;
    let answer = answer(&reformulated_text, &retrieved, generator).await?;

    Ok(QueryOutcome {
        raw_text: raw_text.to_string(),
        reformulated_text,
        retrieved,
        answer,
    })
}

/// Rewrite an informal question as a formal legal query.
///
/// One generator call; the output is trimmed and otherwise returned
/// verbatim. No retry at this layer and no validation of "formality" —
/// that is the model's responsibility.
pub async fn reformulate(raw_text: &str, generator: &dyn Generator) -> Result<String> {
    let prompt = prompt::reformulation_prompt(raw_text)?;
    let output = generator.generate(&prompt).await?;
    Ok(output.trim().to_string())
}

/// Produce a grounded answer from retrieved context.
///
/// Empty or whitespace-only context short-circuits to the sentinel without
/// a model call, so the no-fabrication guarantee does not depend on the
/// model honoring its instructions.
pub async fn answer(
    reformulated_query: &str,
    chunks: &[RetrievedChunk],
    generator: &dyn Generator,
) -> Result<Answer> {
    let context = prompt::format_context(chunks);
    if context.trim().is_empty() {
        return Ok(Answer {
            text: SENTINEL.to_string(),
            sections: None,
            grounded: false,
        });
    }

    let prompt = prompt::answer_prompt(&context, reformulated_query)?;
    let raw = generator.generate(&prompt).await?;
    Ok(parse_answer(&raw))
}

/// Wrap raw generator output into an [`Answer`].
///
/// The sentinel is matched case-insensitively after trimming and marks the
/// answer ungrounded. Section parsing is best-effort: all four headings in
/// order yield structured sections, anything else falls back to raw text.
pub fn parse_answer(raw: &str) -> Answer {
    let trimmed = raw.trim();

    if trimmed.eq_ignore_ascii_case(SENTINEL) {
        return Answer {
            text: SENTINEL.to_string(),
            sections: None,
            grounded: false,
        };
    }

    Answer {
        text: trimmed.to_string(),
        sections: parse_sections(trimmed),
        grounded: true,
    }
}

const SECTION_HEADINGS: [&str; 4] = [
    "relevant laws",
    "legal reasoning",
    "potential remedies",
    "conclusion",
];

fn parse_sections(text: &str) -> Option<AnswerSections> {
    // ASCII lowering keeps byte positions aligned with `text`.
    let lower = text.to_ascii_lowercase();

    let mut positions = Vec::with_capacity(SECTION_HEADINGS.len());
    let mut search_from = 0usize;
    for heading in SECTION_HEADINGS {
        let pos = lower[search_from..].find(heading)? + search_from;
        positions.push((pos, heading.len()));
        search_from = pos + heading.len();
    }

    let section = |i: usize| -> String {
        let (pos, heading_len) = positions[i];
        let heading_end = pos + heading_len;
        let end = positions
            .get(i + 1)
            .map(|(next, _)| *next)
            .unwrap_or(text.len());

        // Content begins after the heading line's colon, if any — headings
        // may carry trailing label text ("Potential Remedies or Actions:").
        let rest = &text[heading_end..end];
        let line_end = rest.find('\n').unwrap_or(rest.len());
        let content_start = match rest[..line_end].find(':') {
            Some(c) => c + 1,
            None => 0,
        };

        let mut slice = &rest[content_start..];
        // Drop the next heading's own line prefix ("2. ", "3) ", ...).
        if i + 1 < positions.len() {
            if let Some(nl) = slice.rfind('\n') {
                slice = &slice[..nl];
            }
        }
        slice
            .trim_matches(|c: char| c == ':' || c.is_whitespace())
            .to_string()
    };

    Some(AnswerSections {
        relevant_laws: section(0),
        legal_reasoning: section(1),
        remedies: section(2),
        conclusion: section(3),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::db;
    use crate::embedding::testing::HashEmbedder;
    use crate::error::PipelineError;
    use crate::generation::Generator;
    use crate::index;
    use crate::migrate;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Stub generator returning a fixed string, counting calls.
    struct FixedGenerator {
        output: String,
        calls: AtomicU32,
    }

    impl FixedGenerator {
        fn new(output: &str) -> Self {
            Self {
                output: output.to_string(),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Generator for FixedGenerator {
        fn model_name(&self) -> &str {
            "fixed-test"
        }

        async fn generate(&self, _prompt: &str) -> crate::error::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    /// Stub generator that always fails.
    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        fn model_name(&self) -> &str {
            "failing-test"
        }

        async fn generate(&self, _prompt: &str) -> crate::error::Result<String> {
            Err(PipelineError::generation("model unavailable", true))
        }
    }

    /// Stub that answers reformulation and answer prompts differently.
    struct TwoStageGenerator;

    #[async_trait]
    impl Generator for TwoStageGenerator {
        fn model_name(&self) -> &str {
            "two-stage-test"
        }

        async fn generate(&self, prompt: &str) -> crate::error::Result<String> {
            if prompt.contains("legal query reformulator") {
                Ok("What are the legal provisions for unpaid wages?".to_string())
            } else {
                Ok("1. Relevant Laws: Payment of Wages Act, 1936.\n\
                    2. Legal Reasoning: Wages are due monthly.\n\
                    3. Potential Remedies or Actions: File a claim.\n\
                    4. Conclusion: The deduction is unlawful."
                    .to_string())
            }
        }
    }

    fn retrieved(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            source_id: "labour.txt".to_string(),
            chunk_index: 0,
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[tokio::test]
    async fn test_reformulate_returns_stub_output_trimmed() {
        let generator = FixedGenerator::new(
            "  What are the legal provisions under Indian Labour Law regarding \
             unauthorized salary deductions by employers?\n",
        );
        let out = reformulate("Can my boss reduce my salary randomly?", &generator)
            .await
            .unwrap();
        assert_eq!(
            out,
            "What are the legal provisions under Indian Labour Law regarding \
             unauthorized salary deductions by employers?"
        );
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_reformulate_failure_propagates() {
        let err = reformulate("anything", &FailingGenerator).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation { .. }));
    }

    #[tokio::test]
    async fn test_empty_context_short_circuits_to_sentinel() {
        let generator = FixedGenerator::new("should never be used");
        let answer = answer("a formal query", &[], &generator).await.unwrap();
        assert_eq!(answer.text, SENTINEL);
        assert!(!answer.grounded);
        assert!(answer.sections.is_none());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_whitespace_only_context_short_circuits() {
        let generator = FixedGenerator::new("should never be used");
        let chunks = vec![retrieved("   "), retrieved("\n")];
        let answer = answer("a formal query", &chunks, &generator).await.unwrap();
        assert_eq!(answer.text, SENTINEL);
        assert!(!answer.grounded);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_sentinel_detected_case_insensitively() {
        let generator = FixedGenerator::new("  i DON'T know.  ");
        let chunks = vec![retrieved("Section 15 forbids deductions.")];
        let answer = answer("a formal query", &chunks, &generator).await.unwrap();
        assert_eq!(answer.text, SENTINEL);
        assert!(!answer.grounded);
        assert!(answer.sections.is_none());
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_answer_failure_propagates() {
        let chunks = vec![retrieved("Section 15 forbids deductions.")];
        let err = answer("a formal query", &chunks, &FailingGenerator)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Generation { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_answer_structured_sections() {
        let raw = "1. Relevant Laws: The Payment of Wages Act, 1936, section 15.\n\
                   2. Legal Reasoning: Deductions require statutory authorization.\n\
                   3. Potential Remedies or Actions: File a claim before the authority.\n\
                   4. Conclusion: The deduction is unlawful.";
        let answer = parse_answer(raw);
        assert!(answer.grounded);
        let sections = answer.sections.expect("sections should parse");
        assert_eq!(
            sections.relevant_laws,
            "The Payment of Wages Act, 1936, section 15."
        );
        assert_eq!(
            sections.legal_reasoning,
            "Deductions require statutory authorization."
        );
        assert_eq!(sections.remedies, "File a claim before the authority.");
        assert_eq!(sections.conclusion, "The deduction is unlawful.");
    }

    #[test]
    fn test_parse_answer_unstructured_falls_back_to_text() {
        let answer = parse_answer("The deduction appears unlawful under the Act.\n");
        assert!(answer.grounded);
        assert!(answer.sections.is_none());
        assert_eq!(answer.text, "The deduction appears unlawful under the Act.");
    }

    #[test]
    fn test_parse_answer_headings_out_of_order_fall_back() {
        let raw = "Conclusion: unlawful.\nRelevant Laws: the Act.\n\
                   Legal Reasoning: none.\nPotential Remedies: none.";
        assert!(parse_answer(raw).sections.is_none());
    }

    // ---- full pipeline over a real index ----

    fn test_config(root: &std::path::Path) -> Config {
        let config: Config = toml::from_str(&format!(
            r#"
            [db]
            path = "{}/data/lexify.sqlite"

            [corpus]
            root = "{}/documents"

            [chunking]
            chunk_size = 120
            overlap = 0
            "#,
            root.display(),
            root.display()
        ))
        .unwrap();
        config::validate(&config).unwrap();
        config
    }

    #[tokio::test]
    async fn test_ask_runs_all_three_stages() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let docs = tmp.path().join("documents");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(
            docs.join("labour.txt"),
            "Wages must be paid before the seventh day. Deductions require authorization.",
        )
        .unwrap();

        migrate::run_migrations(&config).await.unwrap();
        let arc: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(8));
        index::run_ingest_with(&config, Some(arc), None).await.unwrap();

        let pool = db::connect(&config).await.unwrap();
        let embedder = HashEmbedder::new(8);
        let outcome = ask(
            &pool,
            &embedder,
            &TwoStageGenerator,
            &config.retrieval,
            "My employer didn't pay me for 2 months!",
            3,
        )
        .await
        .unwrap();
        pool.close().await;

        assert_eq!(
            outcome.reformulated_text,
            "What are the legal provisions for unpaid wages?"
        );
        assert!(!outcome.retrieved.is_empty());
        assert!(outcome.answer.grounded);
        assert!(outcome.answer.sections.is_some());
        assert_eq!(outcome.raw_text, "My employer didn't pay me for 2 months!");
    }

    #[tokio::test]
    async fn test_ask_on_empty_index_answers_sentinel() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        std::fs::create_dir_all(tmp.path().join("documents")).unwrap();
        migrate::run_migrations(&config).await.unwrap();

        let pool = db::connect(&config).await.unwrap();
        let embedder = HashEmbedder::new(8);
        let outcome = ask(
            &pool,
            &embedder,
            &TwoStageGenerator,
            &config.retrieval,
            "Some question",
            3,
        )
        .await
        .unwrap();
        pool.close().await;

        assert!(outcome.retrieved.is_empty());
        assert_eq!(outcome.answer.text, SENTINEL);
        assert!(!outcome.answer.grounded);
    }
}
