//! Console and CSV rendering of an [`EvaluationReport`]

use anyhow::{Context, Result};
use std::path::Path;

use crate::evaluation::aggregate::{CategoryMetrics, EvaluationReport};

/// CSV header row
pub const CSV_HEADERS: [&str; 13] = [
    "Question Type",
    "Total Questions",
    "F1 Score",
    "BLEU-1 Score",
    "Precision",
    "Recall",
    "Correct Answers (%)",
    "Partial Answers (%)",
    "Incorrect Answers (%)",
    "Average Similarity (%)",
    "Semantic Correct (%)",
    "Semantic Partial (%)",
    "Semantic Incorrect (%)",
];

fn pct(value: f64) -> String {
    format!("{:.2}", value * 100.0)
}

fn csv_row(metrics: &CategoryMetrics) -> Vec<String> {
    let mut row = vec![
        metrics.name.clone(),
        metrics.total_questions.to_string(),
        pct(metrics.f1),
        pct(metrics.bleu1),
        pct(metrics.precision),
        pct(metrics.recall),
        pct(metrics.correct_rate),
        pct(metrics.partial_rate),
        pct(metrics.incorrect_rate),
    ];

    match &metrics.semantic {
        Some(sem) => row.extend([
            pct(sem.average_similarity),
            pct(sem.correct_rate),
            pct(sem.partial_rate),
            pct(sem.incorrect_rate),
        ]),
        None => row.extend(std::iter::repeat("N/A".to_string()).take(4)),
    }

    row
}

/// Write the report as CSV: one row per non-empty category, then Overall
pub fn write_csv<W: std::io::Write>(report: &EvaluationReport, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADERS)?;

    for category in report.categories.iter().filter(|c| c.total_questions > 0) {
        wtr.write_record(csv_row(category))?;
    }
    wtr.write_record(csv_row(&report.overall))?;

    wtr.flush()?;
    Ok(())
}

/// Write the report as CSV to `path`
pub fn export_csv(report: &EvaluationReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create CSV file: {:?}", path))?;
    write_csv(report, file).with_context(|| format!("Failed to write CSV file: {:?}", path))?;
    tracing::info!("Metrics exported to {:?}", path);
    Ok(())
}

fn write_block(f: &mut std::fmt::Formatter<'_>, metrics: &CategoryMetrics) -> std::fmt::Result {
    writeln!(f, "{} ({} questions)", metrics.name, metrics.total_questions)?;
    writeln!(f, "  Correct:     {:.2}%", metrics.correct_rate * 100.0)?;
    writeln!(f, "  Partial:     {:.2}%", metrics.partial_rate * 100.0)?;
    writeln!(f, "  Incorrect:   {:.2}%", metrics.incorrect_rate * 100.0)?;
    writeln!(f, "  F1:          {:.2}%", metrics.f1 * 100.0)?;
    writeln!(f, "  BLEU-1:      {:.2}%", metrics.bleu1 * 100.0)?;
    writeln!(f, "  Precision:   {:.2}%", metrics.precision * 100.0)?;
    writeln!(f, "  Recall:      {:.2}%", metrics.recall * 100.0)?;
    if let Some(sem) = &metrics.semantic {
        writeln!(f, "  Semantic ({} questions):", sem.questions)?;
        writeln!(f, "    Avg similarity: {:.2}%", sem.average_similarity * 100.0)?;
        writeln!(f, "    Correct:        {:.2}%", sem.correct_rate * 100.0)?;
        writeln!(f, "    Partial:        {:.2}%", sem.partial_rate * 100.0)?;
        writeln!(f, "    Incorrect:      {:.2}%", sem.incorrect_rate * 100.0)?;
        writeln!(f, "    Precision:      {:.2}%", sem.precision * 100.0)?;
        writeln!(f, "    Recall:         {:.2}%", sem.recall * 100.0)?;
        writeln!(f, "    F1:             {:.2}%", sem.f1 * 100.0)?;
        writeln!(f, "    Accuracy:       {:.2}%", sem.accuracy * 100.0)?;
    }
    Ok(())
}

impl std::fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "QA Evaluation Results")?;
        writeln!(f, "========================================")?;
        write_block(f, &self.overall)?;
        writeln!(f)?;
        writeln!(f, "By category:")?;
        writeln!(f, "----------------------------------------")?;
        for category in self.categories.iter().filter(|c| c.total_questions > 0) {
            write_block(f, category)?;
            writeln!(f)?;
        }
        Ok(())
    }
}
