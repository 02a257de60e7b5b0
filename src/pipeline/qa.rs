//! Conversational QA evaluation
//!
//! Answers every question of a conversation (search, then generate), scores
//! the answers, and folds the scores into a per-category report. Answering is
//! the only part that touches the network; scoring is pure and reads a primed
//! [`EmbeddingCache`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::answer::{AnswerGenerator, NO_ANSWER};
use crate::data::{Category, Conversation};
use crate::embedding::{Embedder, EmbeddingCache};
use crate::evaluation::aggregate::{
    AnswerGrade, CategoryAggregator, EvaluationReport, GradeThresholds, QuestionScore,
    SemanticScore,
};
use crate::evaluation::generation::{normalize_text, AnswerScores};
use crate::evaluation::semantic::{ConfusionOutcome, SemanticClassifier, SimilarityMetrics};
use crate::memory::{MemoryClient, SearchRequest};

/// Configuration for answering questions
#[derive(Debug, Clone)]
pub struct QaConfig {
    /// Results requested per search
    pub search_limit: usize,
    /// Maximum questions in flight at once
    pub max_concurrency: usize,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            search_limit: 3,
            max_concurrency: 5,
        }
    }
}

/// A generated answer, tagged with where its question came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub sample_id: String,
    pub question_index: usize,
    pub category: Category,
    pub question: String,
    pub ground_truth: String,
    /// Raw generator output, untrimmed
    pub generated: String,
    /// Number of context passages the generator saw
    pub context_passages: usize,
}

/// Semantic part of a question's details
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemanticDetail {
    pub similarity: f64,
    pub exact_match: bool,
    pub outcome: ConfusionOutcome,
    pub grade: AnswerGrade,
}

/// Per-question record written to the details file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDetail {
    #[serde(flatten)]
    pub answer: GeneratedAnswer,
    pub lexical: AnswerScores,
    pub lexical_grade: AnswerGrade,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticDetail>,
}

/// Searches and generates answers for conversations
pub struct QaRunner {
    memory: Arc<dyn MemoryClient>,
    generator: Arc<dyn AnswerGenerator>,
    config: QaConfig,
}

impl QaRunner {
    pub fn new(
        memory: Arc<dyn MemoryClient>,
        generator: Arc<dyn AnswerGenerator>,
        config: QaConfig,
    ) -> Self {
        Self {
            memory,
            generator,
            config,
        }
    }

    /// Answer every question of one conversation
    ///
    /// Questions run concurrently (bounded by `max_concurrency`); answers come
    /// back in question order. A failed search leaves the question without
    /// context and a failed generation yields [`NO_ANSWER`].
    pub async fn answer_conversation(&self, conversation: &Conversation) -> Result<Vec<GeneratedAnswer>> {
        let total = conversation.qa.len();
        let mut answers: Vec<Option<GeneratedAnswer>> = vec![None; total];
        let mut pending = conversation.qa.iter().enumerate();
        let mut join_set = JoinSet::new();
        let limit = self.config.max_concurrency.max(1);

        loop {
            while join_set.len() < limit {
                let Some((index, item)) = pending.next() else { break };
                let memory = Arc::clone(&self.memory);
                let generator = Arc::clone(&self.generator);
                let sample_id = conversation.sample_id.clone();
                let item = item.clone();
                let search_limit = self.config.search_limit;

                join_set.spawn(async move {
                    let request = SearchRequest::new(item.question.as_str(), search_limit)
                        .with_filter("sample_id", sample_id.as_str());
                    let context = match memory.search(&request).await {
                        Ok(response) => response.context_passages(),
                        Err(e) => {
                            tracing::warn!(
                                "Search failed for {} question {} ({}): {:#}",
                                sample_id,
                                index,
                                item.category,
                                e
                            );
                            Vec::new()
                        }
                    };

                    let generated = match generator.generate(&item.question, &context).await {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(
                                "Generation failed for {} question {} ({}): {:#}",
                                sample_id,
                                index,
                                item.category,
                                e
                            );
                            NO_ANSWER.to_string()
                        }
                    };

                    GeneratedAnswer {
                        sample_id,
                        question_index: index,
                        category: item.category,
                        question: item.question,
                        ground_truth: item.answer,
                        generated,
                        context_passages: context.len(),
                    }
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let answer = joined.context("Question task panicked")?;
            let index = answer.question_index;
            answers[index] = Some(answer);
        }

        answers
            .into_iter()
            .enumerate()
            .map(|(i, a)| a.with_context(|| format!("Question {} of {} was not answered", i, conversation.sample_id)))
            .collect()
    }

    /// Answer every question of every conversation, in dataset order
    pub async fn answer_all(&self, conversations: &[Conversation]) -> Result<Vec<GeneratedAnswer>> {
        let mut all = Vec::new();
        for conversation in conversations {
            let start = Instant::now();
            let answers = self.answer_conversation(conversation).await?;
            tracing::info!(
                "Answered {} questions for {} in {:.1}s",
                answers.len(),
                conversation.sample_id,
                start.elapsed().as_secs_f64()
            );
            all.extend(answers);
        }
        Ok(all)
    }
}

/// Scores answers against ground truth
#[derive(Debug, Clone, Default)]
pub struct AnswerScorer {
    pub classifier: SemanticClassifier,
    pub thresholds: GradeThresholds,
    /// Whether semantic scores are computed
    pub semantic: bool,
}

impl AnswerScorer {
    pub fn new(classifier: SemanticClassifier, thresholds: GradeThresholds, semantic: bool) -> Self {
        Self {
            classifier,
            thresholds,
            semantic,
        }
    }

    /// Texts the cache must hold before [`AnswerScorer::score`] is called
    pub fn texts_to_embed(&self, answers: &[GeneratedAnswer]) -> Vec<String> {
        if !self.semantic {
            return Vec::new();
        }
        let generated: Vec<&str> = answers.iter().map(|a| a.generated.as_str()).collect();
        let truths: Vec<&str> = answers.iter().map(|a| a.ground_truth.as_str()).collect();
        self.classifier.texts_to_embed(&generated, &truths)
    }

    /// Score one answer from a primed cache
    ///
    /// The lexical matcher's similarity hint is the cached cosine of the pair,
    /// 0 when either side has no embedding.
    pub fn score(&self, answer: GeneratedAnswer, cache: &EmbeddingCache) -> (QuestionScore, QuestionDetail) {
        let hint = cache
            .similarity(&answer.generated, &answer.ground_truth)
            .unwrap_or(0.0);
        let lexical = AnswerScores::compute(&answer.generated, &answer.ground_truth, hint);
        let lexical_grade = self.thresholds.lexical_grade(lexical.f1);

        let semantic = self.semantic.then(|| {
            let classification = self
                .classifier
                .classify(&answer.generated, &answer.ground_truth, cache);
            SemanticScore {
                similarity: classification.similarity,
                exact_match: normalize_text(&answer.generated) == normalize_text(&answer.ground_truth),
                outcome: classification.outcome,
            }
        });

        let score = QuestionScore {
            category: answer.category,
            lexical,
            semantic,
        };
        let detail = QuestionDetail {
            answer,
            lexical,
            lexical_grade,
            semantic: semantic.map(|s| SemanticDetail {
                similarity: s.similarity,
                exact_match: s.exact_match,
                outcome: s.outcome,
                grade: self.thresholds.semantic_grade(s.exact_match, s.similarity),
            }),
        };

        (score, detail)
    }
}

/// Receives scored questions as they are produced
pub trait ScoringObserver {
    fn on_question(&mut self, detail: &QuestionDetail);

    fn on_complete(&mut self, _report: &EvaluationReport) {}
}

/// Logs each scored question at debug level and the totals at info
#[derive(Debug, Default)]
pub struct TracingObserver {
    scored: usize,
}

impl ScoringObserver for TracingObserver {
    fn on_question(&mut self, detail: &QuestionDetail) {
        self.scored += 1;
        tracing::debug!(
            "[{} #{}] {} | truth={:?} generated={:?} f1={:.3} grade={}{}",
            detail.answer.sample_id,
            detail.answer.question_index,
            detail.answer.category,
            detail.answer.ground_truth,
            detail.answer.generated,
            detail.lexical.f1,
            detail.lexical_grade,
            detail
                .semantic
                .map(|s| format!(" similarity={:.3} outcome={} semantic={}", s.similarity, s.outcome, s.grade))
                .unwrap_or_default()
        );
    }

    fn on_complete(&mut self, report: &EvaluationReport) {
        tracing::info!(
            "Scored {} questions, overall F1 {:.2}%",
            self.scored,
            report.overall.f1 * 100.0
        );
    }
}

/// Result of scoring a QA run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaEvaluation {
    pub report: EvaluationReport,
    pub questions: Vec<QuestionDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_metrics: Option<SimilarityMetrics>,
}

/// Contents of a `qa_details_<timestamp>.json` file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaDetailsFile {
    pub timestamp: String,
    pub generation_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub semantic_threshold: f64,
    #[serde(flatten)]
    pub evaluation: QaEvaluation,
}

impl QaDetailsFile {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read details file: {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse details file: {:?}", path))
    }

    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        crate::utils::write_json(path, self)
    }

    /// Generated answers and ground truths, in question order
    pub fn answer_pairs(&self) -> (Vec<&str>, Vec<&str>) {
        self.evaluation
            .questions
            .iter()
            .map(|q| (q.answer.generated.as_str(), q.answer.ground_truth.as_str()))
            .unzip()
    }
}

/// Score answers and build the category report
///
/// Primes `cache` once for the whole batch (when semantic scoring is on and
/// an embedder is given), then scores every answer from it.
pub async fn evaluate_answers(
    answers: Vec<GeneratedAnswer>,
    scorer: &AnswerScorer,
    embedder: Option<&Arc<dyn Embedder>>,
    cache: &mut EmbeddingCache,
    observer: &mut dyn ScoringObserver,
) -> Result<QaEvaluation> {
    if let Some(embedder) = embedder {
        let texts = scorer.texts_to_embed(&answers);
        let stats = cache.prime(embedder, &texts).await?;
        tracing::info!(
            "Embedding cache primed: {} new texts ({} from store, {} embedded, {} failed)",
            stats.requested,
            stats.from_store,
            stats.embedded,
            stats.failed
        );
    }

    let semantic_metrics = if scorer.semantic {
        let generated: Vec<&str> = answers.iter().map(|a| a.generated.as_str()).collect();
        let truths: Vec<&str> = answers.iter().map(|a| a.ground_truth.as_str()).collect();
        Some(scorer.classifier.evaluate(&generated, &truths, cache)?)
    } else {
        None
    };

    let mut aggregator = CategoryAggregator::new(scorer.thresholds);
    let mut questions = Vec::with_capacity(answers.len());
    for answer in answers {
        let (score, detail) = scorer.score(answer, cache);
        aggregator.record(&score);
        observer.on_question(&detail);
        questions.push(detail);
    }

    let report = aggregator.finish();
    observer.on_complete(&report);

    Ok(QaEvaluation {
        report,
        questions,
        semantic_metrics,
    })
}
