use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// How answers to a question aggregate in exports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuestionKind {
    Geotagging,
    Categorical,
}

impl QuestionKind {
    fn from_type_name(value: &str) -> Self {
        match value {
            "geotagging" => QuestionKind::Geotagging,
            _ => QuestionKind::Categorical,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    projects: BTreeMap<String, ProjectSchemaDef>,
}

#[derive(Debug, Deserialize)]
struct ProjectSchemaDef {
    #[serde(default)]
    questions: Vec<QuestionDef>,
}

#[derive(Debug, Deserialize)]
struct QuestionDef {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    answer: AnswerDef,
}

#[derive(Debug, Deserialize)]
struct AnswerDef {
    saved_as: String,
}

/// A question with its kind resolved once at load time.
#[derive(Clone, Debug)]
pub struct ResolvedQuestion {
    pub kind: QuestionKind,
    pub title: String,
}

#[derive(Debug, Default)]
pub struct ProjectQuestions {
    by_key: BTreeMap<String, ResolvedQuestion>,
}

impl ProjectQuestions {
    pub fn get(&self, saved_as: &str) -> Option<&ResolvedQuestion> {
        self.by_key.get(saved_as)
    }
}

/// Question schemas for every project that participates in exports,
/// keyed by project short name. Projects without an entry are skipped
/// by the aggregator.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    projects: BTreeMap<String, ProjectQuestions>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|err| format!("read schema config {}: {err}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        let file: SchemaFile =
            toml::from_str(raw).map_err(|err| format!("parse schema config: {err}"))?;

        let mut projects = BTreeMap::new();
        for (short_name, def) in file.projects {
            let mut by_key = BTreeMap::new();
            for question in def.questions {
                by_key.insert(
                    question.answer.saved_as,
                    ResolvedQuestion {
                        kind: QuestionKind::from_type_name(&question.kind),
                        title: question.title,
                    },
                );
            }
            projects.insert(short_name, ProjectQuestions { by_key });
        }

        Ok(Self { projects })
    }

    pub fn questions(&self, short_name: &str) -> Option<&ProjectQuestions> {
        self.projects.get(short_name)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Answer keys are namespaced per project so two projects saving under
/// the same name never collide in one export.
pub fn namespaced_key(short_name: &str, saved_as: &str) -> String {
    format!("{short_name}::{saved_as}")
}
