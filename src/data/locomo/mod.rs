//! LoCoMo conversational QA dataset
//!
//! The file is a JSON array of conversations, each carrying a list of
//! questions with a ground-truth answer and a numeric category. The same
//! file holds the transcripts themselves: `session_N` dialog turns plus
//! per-session observations and summaries, read by [`load_transcripts`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::answer::NO_ANSWER;

/// Question category of the conversational benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Multi-Hop")]
    MultiHop,
    #[serde(rename = "Single-Hop")]
    SingleHop,
    #[serde(rename = "Open-Domain")]
    OpenDomain,
    Temporal,
    Adversarial,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::MultiHop,
        Category::SingleHop,
        Category::OpenDomain,
        Category::Temporal,
        Category::Adversarial,
    ];

    /// Dataset id, 1 through 5
    pub fn id(self) -> u8 {
        match self {
            Self::MultiHop => 1,
            Self::SingleHop => 2,
            Self::OpenDomain => 3,
            Self::Temporal => 4,
            Self::Adversarial => 5,
        }
    }

    pub fn from_id(id: u64) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| u64::from(c.id()) == id)
            .with_context(|| format!("Unknown question category id: {}", id))
    }

    /// Display name used in reports
    pub fn name(self) -> &'static str {
        match self {
            Self::MultiHop => "Multi-Hop",
            Self::SingleHop => "Single-Hop",
            Self::OpenDomain => "Open-Domain",
            Self::Temporal => "Temporal",
            Self::Adversarial => "Adversarial",
        }
    }

    /// Command-line spelling (`multi-hop`, `temporal`, ...)
    pub fn cli_name(self) -> String {
        self.name().to_lowercase()
    }

    /// Parse a command-line filter value
    ///
    /// Accepts the lowercase name or the numeric id.
    pub fn from_cli_name(name: &str) -> Result<Self> {
        let name = name.trim().to_lowercase();
        if let Ok(id) = name.parse::<u64>() {
            return Self::from_id(id);
        }
        Self::ALL
            .into_iter()
            .find(|c| c.cli_name() == name)
            .with_context(|| {
                format!(
                    "Unknown category '{}', expected one of: multi-hop, single-hop, open-domain, temporal, adversarial",
                    name
                )
            })
    }

    /// Parse the dataset's category field: an integer or a numeric string
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => {
                let id = n
                    .as_u64()
                    .with_context(|| format!("Invalid question category: {}", n))?;
                Self::from_id(id)
            }
            Value::String(s) => Self::from_cli_name(s),
            other => anyhow::bail!("Invalid question category: {}", other),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One question with its ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaItem {
    pub question: String,
    /// Ground-truth answer; the no-answer sentinel for unanswerable questions
    pub answer: String,
    pub category: Category,
    pub evidence: Vec<String>,
}

/// A conversation and the questions asked about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub sample_id: String,
    pub qa: Vec<QaItem>,
}

impl Conversation {
    /// Keep only the questions of one category
    pub fn retain_category(&mut self, category: Category) {
        self.qa.retain(|item| item.category == category);
    }
}

#[derive(Debug, Deserialize)]
struct RawConversation {
    sample_id: String,
    #[serde(default)]
    qa: Vec<RawQaItem>,
}

#[derive(Debug, Deserialize)]
struct RawQaItem {
    question: String,
    #[serde(default)]
    answer: Option<Value>,
    category: Value,
    #[serde(default)]
    evidence: Vec<String>,
}

impl RawQaItem {
    fn into_item(self) -> Result<QaItem> {
        let category = Category::from_value(&self.category)?;

        let answer = match self.answer {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            None | Some(Value::Null) if category == Category::Adversarial => NO_ANSWER.to_string(),
            None | Some(Value::Null) => {
                anyhow::bail!("Question '{}' has no ground-truth answer", self.question)
            }
            Some(other) => anyhow::bail!(
                "Question '{}' has an unsupported answer value: {}",
                self.question,
                other
            ),
        };

        Ok(QaItem {
            question: self.question,
            answer,
            category,
            evidence: self.evidence,
        })
    }
}

/// Load conversations from a LoCoMo JSON file
pub fn load_locomo(path: &Path) -> Result<Vec<Conversation>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open LoCoMo data file: {:?}", path))?;

    let raw: Vec<RawConversation> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse LoCoMo data file: {:?}", path))?;

    raw.into_iter()
        .map(|conv| {
            let sample_id = conv.sample_id;
            let qa = conv
                .qa
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    item.into_item()
                        .with_context(|| format!("Invalid question {} in conversation {}", i + 1, sample_id))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Conversation { sample_id, qa })
        })
        .collect()
}

/// One utterance in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogTurn {
    pub speaker: String,
    pub dia_id: String,
    #[serde(default)]
    pub text: String,
    /// A URL or a list of URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blip_caption: Option<String>,
}

/// Everything said in one conversation, ready for ingestion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub sample_id: String,
    pub turns: Vec<DialogTurn>,
    pub observations: Vec<String>,
    pub summaries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTranscript {
    sample_id: String,
    #[serde(default)]
    conversation: Map<String, Value>,
    #[serde(default)]
    observation: Option<Map<String, Value>>,
    #[serde(default)]
    session_summary: Option<Map<String, Value>>,
}

/// Keys of `conversation` holding dialog sessions, in session order
///
/// Speaker names and `session_N_date_time` stamps are skipped.
fn session_keys(conversation: &Map<String, Value>) -> Vec<&str> {
    let mut keys: Vec<&str> = conversation
        .keys()
        .map(String::as_str)
        .filter(|key| !matches!(*key, "speaker_a" | "speaker_b"))
        .filter(|key| key.starts_with("session_") && !key.contains("date_time"))
        .collect();
    keys.sort_by_key(|key| {
        let number = key["session_".len()..].parse::<u64>().unwrap_or(u64::MAX);
        (number, *key)
    });
    keys
}

/// Collect fact strings from an observation value
///
/// Observations are either plain text or `speaker -> [[fact, dialog_id], ...]`.
fn collect_facts(value: &Value, facts: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => facts.push(s.clone()),
        Value::Array(items) => match items.first() {
            Some(Value::String(fact)) if items.len() == 2 && items[1].is_string() => {
                if !fact.trim().is_empty() {
                    facts.push(fact.clone());
                }
            }
            _ => items.iter().for_each(|item| collect_facts(item, facts)),
        },
        Value::Object(map) => map.values().for_each(|item| collect_facts(item, facts)),
        _ => {}
    }
}

/// Text of a session's observation or summary, if present and non-empty
fn session_text(table: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    let mut facts = Vec::new();
    collect_facts(table?.get(key)?, &mut facts);
    (!facts.is_empty()).then(|| facts.join("\n"))
}

impl RawTranscript {
    fn into_transcript(self) -> Result<Transcript> {
        let mut transcript = Transcript {
            sample_id: self.sample_id,
            ..Transcript::default()
        };

        for key in session_keys(&self.conversation) {
            let turns = match &self.conversation[key] {
                Value::Array(_) => vec![self.conversation[key].clone()],
                Value::Object(map) => map.values().cloned().collect(),
                _ => continue,
            };
            for session in turns {
                let parsed: Vec<DialogTurn> = serde_json::from_value(session)
                    .with_context(|| format!("Invalid dialog turns in {}", key))?;
                transcript.turns.extend(parsed);
            }

            if let Some(text) = session_text(self.observation.as_ref(), &format!("{}_observation", key)) {
                transcript.observations.push(text);
            }
            if let Some(text) = session_text(self.session_summary.as_ref(), &format!("{}_summary", key)) {
                transcript.summaries.push(text);
            }
        }

        Ok(transcript)
    }
}

/// Load the dialog transcripts from a LoCoMo JSON file
pub fn load_transcripts(path: &Path) -> Result<Vec<Transcript>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open LoCoMo data file: {:?}", path))?;

    let raw: Vec<RawTranscript> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse LoCoMo data file: {:?}", path))?;

    raw.into_iter()
        .map(|conv| {
            let sample_id = conv.sample_id.clone();
            conv.into_transcript()
                .with_context(|| format!("Invalid transcript in conversation {}", sample_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_json(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_locomo() {
        let file = write_json(
            r#"[
                {
                    "sample_id": "conv-1",
                    "conversation": {"speaker_a": "A", "speaker_b": "B"},
                    "qa": [
                        {"question": "Where?", "answer": "Paris", "category": 2, "evidence": ["D1:3"]},
                        {"question": "How many?", "answer": 42, "category": "1"},
                        {"question": "Trick?", "adversarial_answer": "yes", "category": 5}
                    ]
                }
            ]"#,
        );

        let conversations = load_locomo(file.path()).unwrap();
        assert_eq!(conversations.len(), 1);

        let qa = &conversations[0].qa;
        assert_eq!(qa[0].answer, "Paris");
        assert_eq!(qa[0].category, Category::SingleHop);
        assert_eq!(qa[0].evidence, vec!["D1:3".to_string()]);
        assert_eq!(qa[1].answer, "42");
        assert_eq!(qa[1].category, Category::MultiHop);
        assert_eq!(qa[2].answer, NO_ANSWER);
        assert_eq!(qa[2].category, Category::Adversarial);
    }

    #[test]
    fn test_missing_answer_outside_adversarial_is_an_error() {
        let file = write_json(r#"[{"sample_id": "c", "qa": [{"question": "Q", "category": 4}]}]"#);
        assert!(load_locomo(file.path()).is_err());
    }

    #[test]
    fn test_unknown_category_is_an_error() {
        let file = write_json(r#"[{"sample_id": "c", "qa": [{"question": "Q", "answer": "a", "category": 9}]}]"#);
        let err = load_locomo(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown question category id: 9"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_locomo(Path::new("/nonexistent/locomo.json")).is_err());
    }

    #[test]
    fn test_load_transcripts() {
        let file = write_json(
            r#"[
                {
                    "sample_id": "conv-7",
                    "conversation": {
                        "speaker_a": "Caroline",
                        "speaker_b": "Melanie",
                        "session_1_date_time": "1:56 pm on 8 May, 2023",
                        "session_1": [
                            {"speaker": "Caroline", "dia_id": "D1:1", "text": "Hey Mel!"},
                            {"speaker": "Melanie", "dia_id": "D1:2", "text": "Look at this",
                             "img_url": ["https://example.com/a.jpg"], "blip_caption": "a dog on a beach"}
                        ],
                        "session_10": [
                            {"speaker": "Melanie", "dia_id": "D10:1", "text": "Back again"}
                        ],
                        "session_2_date_time": "7:00 pm on 9 May, 2023",
                        "session_2": [
                            {"speaker": "Caroline", "dia_id": "D2:1", "text": "Morning"}
                        ]
                    },
                    "observation": {
                        "session_1_observation": {
                            "Caroline": [["Caroline greets Melanie.", "D1:1"]],
                            "Melanie": [["Melanie has a dog.", "D1:2"]]
                        },
                        "session_2_observation": "Caroline says good morning."
                    },
                    "session_summary": {
                        "session_1_summary": "They catch up.",
                        "session_2_summary": ""
                    },
                    "qa": []
                }
            ]"#,
        );

        let transcripts = load_transcripts(file.path()).unwrap();
        assert_eq!(transcripts.len(), 1);
        let transcript = &transcripts[0];
        assert_eq!(transcript.sample_id, "conv-7");

        let ids: Vec<&str> = transcript.turns.iter().map(|t| t.dia_id.as_str()).collect();
        assert_eq!(ids, vec!["D1:1", "D1:2", "D2:1", "D10:1"]);
        assert_eq!(transcript.turns[1].blip_caption.as_deref(), Some("a dog on a beach"));
        assert!(transcript.turns[0].img_url.is_none());

        assert_eq!(
            transcript.observations,
            vec![
                "Caroline greets Melanie.\nMelanie has a dog.".to_string(),
                "Caroline says good morning.".to_string(),
            ]
        );
        // Empty summaries are dropped
        assert_eq!(transcript.summaries, vec!["They catch up.".to_string()]);
    }

    #[test]
    fn test_transcript_without_sessions() {
        let file = write_json(r#"[{"sample_id": "c", "conversation": {"speaker_a": "A", "speaker_b": "B"}}]"#);
        let transcripts = load_transcripts(file.path()).unwrap();
        assert!(transcripts[0].turns.is_empty());
        assert!(transcripts[0].observations.is_empty());
        assert!(transcripts[0].summaries.is_empty());
    }

    #[test]
    fn test_malformed_turn_is_an_error() {
        let file = write_json(r#"[{"sample_id": "c", "conversation": {"session_1": [{"text": "no speaker"}]}}]"#);
        let err = load_transcripts(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid dialog turns in session_1"));
    }

    #[test]
    fn test_category_names() {
        assert_eq!(Category::from_cli_name("multi-hop").unwrap(), Category::MultiHop);
        assert_eq!(Category::from_cli_name("Open-Domain").unwrap(), Category::OpenDomain);
        assert_eq!(Category::from_cli_name("4").unwrap(), Category::Temporal);
        assert!(Category::from_cli_name("hard").is_err());

        for category in Category::ALL {
            assert_eq!(Category::from_id(category.id() as u64).unwrap(), category);
        }
        assert_eq!(Category::Adversarial.to_string(), "Adversarial");
    }

    #[test]
    fn test_retain_category() {
        let mut conv = Conversation {
            sample_id: "c".to_string(),
            qa: vec![
                QaItem {
                    question: "a".to_string(),
                    answer: "x".to_string(),
                    category: Category::Temporal,
                    evidence: vec![],
                },
                QaItem {
                    question: "b".to_string(),
                    answer: "y".to_string(),
                    category: Category::SingleHop,
                    evidence: vec![],
                },
            ],
        };
        conv.retain_category(Category::Temporal);
        assert_eq!(conv.qa.len(), 1);
        assert_eq!(conv.qa[0].question, "a");
    }
}
