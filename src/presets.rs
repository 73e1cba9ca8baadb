//! Ready-made checks for question answering over documentation.
//!
//! Rows are expected to carry `question`, `response`, `document_text`,
//! `document_link`, `question_idx` and `experiment_id`, plus the
//! `question_embeddings`, `context_embeddings` and `response_embeddings`
//! produced by [`embedding_pass`].

use crate::check::CheckSpec;
use crate::operators::{DistributionMetric, DistributionShape, OneOrMany, OperatorSpec, RougeType};
use crate::plots::PlotSpec;

/// Text column → embedding column pairs computed before the checks run.
pub const EMBEDDED_COLUMNS: [(&str, &str); 3] = [
    ("question", "question_embeddings"),
    ("document_text", "context_embeddings"),
    ("response", "response_embeddings"),
];

const GROUP_BY: [&str; 2] = ["question_idx", "experiment_id"];

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Embedding operators for every column in [`EMBEDDED_COLUMNS`].
///
/// `model` of `None` uses `models.embedding_model` from the settings.
pub fn embedding_pass(model: Option<&str>) -> Vec<OperatorSpec> {
    EMBEDDED_COLUMNS
        .iter()
        .map(|(text, embs)| OperatorSpec::Embedding {
            model: model.map(str::to_string),
            col_in_text: text.to_string(),
            col_out: embs.to_string(),
        })
        .collect()
}

/// The four documentation Q&A checks.
pub fn docs_qna_checks() -> Vec<CheckSpec> {
    vec![
        CheckSpec {
            name: "distribution_of_document_embeddings".to_string(),
            operators: vec![OperatorSpec::Distribution {
                metric: DistributionMetric::CosineSimilarity,
                col_in: strings(&["context_embeddings", "response_embeddings"]),
                col_in_groupby: strings(&GROUP_BY),
                col_out: strings(&["similarity-context", "similarity-response"]),
                shape: DistributionShape::Broadcast,
            }],
            plots: vec![
                PlotSpec::histogram("Embeddings similarity - Context", "similarity-context", 20),
                PlotSpec::histogram(
                    "Embeddings similarity - Responses",
                    "similarity-response",
                    20,
                ),
            ],
            persist_columns: Some(strings(&[
                "question_idx",
                "experiment_id",
                "similarity-context",
                "similarity-response",
            ])),
        },
        CheckSpec {
            name: "text_overlap_between_documents".to_string(),
            operators: vec![OperatorSpec::Distribution {
                metric: DistributionMetric::Rouge,
                col_in: strings(&["document_text"]),
                col_in_groupby: strings(&GROUP_BY),
                col_out: strings(&["rouge_f1"]),
                shape: DistributionShape::Broadcast,
            }],
            plots: vec![PlotSpec::histogram(
                "Text Overlap between document embeddings",
                "rouge_f1",
                20,
            )],
            persist_columns: Some(strings(&["question_idx", "experiment_id", "rouge_f1"])),
        },
        CheckSpec {
            name: "quality_scores".to_string(),
            operators: vec![
                OperatorSpec::DocsLinkVersion {
                    col_in_text: "document_link".to_string(),
                    col_out: "document_link_version".to_string(),
                },
                OperatorSpec::TextLength {
                    col_in_text: "document_text".to_string(),
                    col_out: "document_context_length".to_string(),
                },
                OperatorSpec::RougeScore {
                    score_type: Some(RougeType::F1),
                    col_in_generated: "response".to_string(),
                    col_in_source: "document_text".to_string(),
                    col_out: "response_document_overlap_score".to_string(),
                },
                OperatorSpec::CosineSimilarity {
                    col_in_vector_1: "question_embeddings".to_string(),
                    col_in_vector_2: "response_embeddings".to_string(),
                    col_out: "question_response_similarity".to_string(),
                },
                OperatorSpec::TextComparison {
                    reference_texts: OneOrMany::One("<EMPTY MESSAGE>".to_string()),
                    col_in_text: "response".to_string(),
                    col_out: "empty_response".to_string(),
                },
            ],
            plots: vec![
                PlotSpec::table("Quality scores"),
                PlotSpec::bar_chart("Bar Plot of Link version", "document_link_version"),
                PlotSpec::histogram(
                    "Histogram of Context Length",
                    "document_context_length",
                    20,
                ),
            ],
            persist_columns: None,
        },
        CheckSpec {
            name: "question_umap".to_string(),
            operators: vec![OperatorSpec::Umap {
                col_in_embs_1: "question_embeddings".to_string(),
                col_in_embs_2: Some("response_embeddings".to_string()),
            }],
            plots: vec![PlotSpec::ScatterPlot {
                title: "UMAP for question embeddings".to_string(),
                x: "umap_0".to_string(),
                y: "umap_1".to_string(),
                symbol: Some("symbol".to_string()),
                color: Some("cluster".to_string()),
            }],
            persist_columns: Some(strings(&[
                "question",
                "question_idx",
                "umap_0",
                "umap_1",
                "cluster",
                "symbol",
            ])),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{RecordBatch, Value};
    use crate::check::Check;
    use crate::checkset::CheckSet;
    use crate::config::Settings;
    use crate::persistence::MemorySource;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn qna_rows() -> RecordBatch {
        let rows = [
            (0, "How do I install it?", "Run pip install foo.", "Install with pip install foo", "https://docs.example.com/en/1.2/install"),
            (0, "How do I install it?", "Use pip.", "Installation guide for foo", "https://docs.example.com/en/1.2/guide"),
            (1, "What is a check?", "<EMPTY MESSAGE>", "A check runs operators over data", "https://docs.example.com/en/latest/checks"),
            (1, "What is a check?", "A chain of operators.", "Checks and check sets", "https://docs.example.com/en/2.0/checks"),
            (2, "Where are logs stored?", "In the logs folder.", "Logs live under the logs folder", "https://docs.example.com/en/2.0/logs"),
            (2, "Where are logs stored?", "Under /tmp.", "Settings control the logs folder", "https://docs.example.com/en/2.0/settings"),
        ];
        RecordBatch::from_columns(vec![
            ("question_idx", rows.iter().map(|r| Value::Int(r.0)).collect()),
            ("experiment_id", rows.iter().map(|_| Value::Int(1)).collect()),
            ("question", rows.iter().map(|r| Value::from(r.1)).collect()),
            ("response", rows.iter().map(|r| Value::from(r.2)).collect()),
            ("document_text", rows.iter().map(|r| Value::from(r.3)).collect()),
            ("document_link", rows.iter().map(|r| Value::from(r.4)).collect()),
        ])
        .unwrap()
    }

    fn embedded(settings: &Settings) -> RecordBatch {
        let mut batch = qna_rows();
        for spec in embedding_pass(None) {
            let mut op = spec.build().unwrap();
            op.setup(settings).unwrap();
            batch = op.run(&batch).unwrap();
        }
        batch
    }

    #[test]
    fn test_embedding_pass_columns() {
        let settings = Settings::default();
        let batch = embedded(&settings);
        for (_, column) in EMBEDDED_COLUMNS {
            let vectors = batch.vectors(column).unwrap();
            assert!(vectors.iter().all(|v| v.map(|v| v.len()) == Some(384)));
        }
    }

    #[test]
    fn test_preset_names() {
        let names: Vec<String> = docs_qna_checks().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![
                "distribution_of_document_embeddings",
                "text_overlap_between_documents",
                "quality_scores",
                "question_umap"
            ]
        );
    }

    #[test]
    fn test_presets_run_end_to_end() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::with_logs_folder(temp.path());
        settings.metrics.umap_epochs = 50;

        let checks = docs_qna_checks()
            .iter()
            .map(Check::from_spec)
            .collect::<crate::error::Result<Vec<_>>>()
            .unwrap();
        let source = MemorySource::new(embedded(&settings));
        let report = CheckSet::new(Box::new(source), checks)
            .setup(&settings)
            .unwrap()
            .run()
            .unwrap();

        for (name, status) in report.statuses() {
            assert!(status.is_success(), "{} was {:?}", name, status);
        }
    }

    #[test]
    fn test_presets_without_embeddings() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::with_logs_folder(temp.path());
        let checks = docs_qna_checks()
            .iter()
            .map(Check::from_spec)
            .collect::<crate::error::Result<Vec<_>>>()
            .unwrap();
        let report = CheckSet::new(Box::new(MemorySource::new(qna_rows())), checks)
            .setup(&settings)
            .unwrap()
            .run()
            .unwrap();

        let statuses: Vec<String> = report.statuses().values().map(|s| s.to_string()).collect();
        assert_eq!(
            statuses,
            vec![
                "failed: ConfigurationError",
                "succeeded",
                "failed: ConfigurationError",
                "failed: ConfigurationError"
            ]
        );
    }
}
