use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// A parsed `.feature` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureModel {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
    pub scenarios: Vec<Scenario>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Background {
    pub line: usize,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub outline: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Examples>,
}

/// One `Examples:` table of an outline. The first row is the header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Examples {
    pub line: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub keyword: StepKeyword,
    pub text: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Vec<Vec<String>>>,
}

impl Step {
    pub fn new(keyword: StepKeyword, text: impl Into<String>) -> Self {
        Self {
            keyword,
            text: text.into(),
            line: 0,
            doc_string: None,
            table: None,
        }
    }

    pub fn with_doc_string(mut self, doc_string: impl Into<String>) -> Self {
        self.doc_string = Some(doc_string.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKeyword {
    Given,
    When,
    Then,
    And,
    But,
    /// `*`
    Star,
}

impl StepKeyword {
    pub const ALL: [StepKeyword; 6] = [
        StepKeyword::Given,
        StepKeyword::When,
        StepKeyword::Then,
        StepKeyword::And,
        StepKeyword::But,
        StepKeyword::Star,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKeyword::Given => "Given",
            StepKeyword::When => "When",
            StepKeyword::Then => "Then",
            StepKeyword::And => "And",
            StepKeyword::But => "But",
            StepKeyword::Star => "*",
        }
    }

    /// Split a trimmed line into keyword and step text.
    pub fn split(line: &str) -> Option<(StepKeyword, &str)> {
        StepKeyword::ALL.into_iter().find_map(|keyword| {
            let rest = line.strip_prefix(keyword.as_str())?;
            rest.starts_with(char::is_whitespace)
                .then(|| (keyword, rest.trim()))
        })
    }
}

impl Display for StepKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FeatureModel {
    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Feature and scenario tags, deduplicated and sorted.
    pub fn all_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .tags
            .iter()
            .chain(self.scenarios.iter().flat_map(|s| s.tags.iter()))
            .cloned()
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    pub fn step_count(&self) -> usize {
        self.scenarios.iter().map(|s| s.steps.len()).sum()
    }

    /// Canonical feature text. Output depends only on the model, so equal
    /// models always render byte-identical text.
    pub fn to_feature_text(&self) -> String {
        let mut out = Writer::default();
        if !self.tags.is_empty() {
            out.line(0, &self.tags.join(" "));
        }
        out.line(0, &format!("Feature: {}", self.name));
        if let Some(description) = &self.description {
            for line in description.lines() {
                out.line(1, line.trim());
            }
        }

        if let Some(background) = &self.background {
            out.blank();
            out.line(1, "Background:");
            for step in &background.steps {
                out.step(step);
            }
        }

        for scenario in &self.scenarios {
            out.blank();
            if !scenario.tags.is_empty() {
                out.line(1, &scenario.tags.join(" "));
            }
            let header = if scenario.outline { "Scenario Outline" } else { "Scenario" };
            out.line(1, &format!("{header}: {}", scenario.name));
            if let Some(description) = &scenario.description {
                for line in description.lines() {
                    out.line(2, line.trim());
                }
            }
            for step in &scenario.steps {
                out.step(step);
            }
            for examples in &scenario.examples {
                out.blank();
                if !examples.tags.is_empty() {
                    out.line(2, &examples.tags.join(" "));
                }
                out.line(2, "Examples:");
                let mut rows = vec![examples.header.clone()];
                rows.extend(examples.rows.iter().cloned());
                out.table(3, &rows);
            }
        }
        out.finish()
    }
}

#[derive(Default)]
struct Writer {
    text: String,
}

impl Writer {
    fn line(&mut self, depth: usize, content: &str) {
        if !content.is_empty() {
            self.text.push_str(&"  ".repeat(depth));
            self.text.push_str(content);
        }
        self.text.push('\n');
    }

    fn blank(&mut self) {
        self.text.push('\n');
    }

    fn step(&mut self, step: &Step) {
        self.line(2, &format!("{} {}", step.keyword, step.text));
        if let Some(doc) = &step.doc_string {
            self.line(3, "\"\"\"");
            for line in doc.lines() {
                self.line(3, line);
            }
            self.line(3, "\"\"\"");
        }
        if let Some(table) = &step.table {
            self.table(3, table);
        }
    }

    fn table(&mut self, depth: usize, rows: &[Vec<String>]) {
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        let widths: Vec<usize> = (0..columns)
            .map(|col| {
                rows.iter()
                    .filter_map(|row| row.get(col))
                    .map(|cell| cell.chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        for row in rows {
            let cells: Vec<String> = widths
                .iter()
                .enumerate()
                .map(|(col, width)| {
                    let cell = row.get(col).map(String::as_str).unwrap_or("");
                    format!(" {cell:<width$} ")
                })
                .collect();
            self.line(depth, &format!("|{}|", cells.join("|")));
        }
    }

    fn finish(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_needs_whitespace() {
        assert_eq!(StepKeyword::split("Given path '/x'"), Some((StepKeyword::Given, "path '/x'")));
        assert_eq!(StepKeyword::split("* def a = 1"), Some((StepKeyword::Star, "def a = 1")));
        assert_eq!(StepKeyword::split("Givenpath"), None);
        assert_eq!(StepKeyword::split("Andrew said"), None);
    }

    #[test]
    fn renders_canonical_text() {
        let model = FeatureModel {
            name: "Items".into(),
            tags: vec!["@api".into()],
            scenarios: vec![Scenario {
                name: "create".into(),
                steps: vec![
                    Step::new(StepKeyword::Given, "path '/items'"),
                    Step::new(StepKeyword::And, "request").with_doc_string("{\n  \"a\": 1\n}"),
                    Step::new(StepKeyword::When, "method post"),
                ],
                outline: true,
                examples: vec![Examples {
                    header: vec!["name".into(), "n".into()],
                    rows: vec![vec!["widget".into(), "1".into()]],
                    ..Examples::default()
                }],
                ..Scenario::default()
            }],
            ..FeatureModel::default()
        };
        let expected = "\
@api
Feature: Items

  Scenario Outline: create
    Given path '/items'
    And request
      \"\"\"
      {
        \"a\": 1
      }
      \"\"\"
    When method post

    Examples:
      | name   | n |
      | widget | 1 |
";
        assert_eq!(model.to_feature_text(), expected);
    }
}
