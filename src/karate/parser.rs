use tracing::debug;

use super::model::{Background, Examples, FeatureModel, Scenario, Step, StepKeyword};
use crate::error::FeatureSyntaxError;

/// Line-oriented parser for Karate `.feature` files.
///
/// Structure is validated as it is read; the first problem aborts the parse
/// and no partial model is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct KarateFeatureParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    FeatureDescription,
    Background,
    Scenario,
    Examples,
}

struct DocString {
    line: usize,
    column: usize,
    delimiter: &'static str,
    lines: Vec<String>,
}

struct State {
    section: Section,
    feature: Option<FeatureModel>,
    feature_line: usize,
    pending_tags: Vec<(usize, String)>,
    background: Option<Background>,
    scenario: Option<Scenario>,
    scenarios: Vec<Scenario>,
    description: Vec<String>,
    doc: Option<DocString>,
}

impl KarateFeatureParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> Result<FeatureModel, FeatureSyntaxError> {
        let mut state = State {
            section: Section::Preamble,
            feature: None,
            feature_line: 0,
            pending_tags: Vec::new(),
            background: None,
            scenario: None,
            scenarios: Vec::new(),
            description: Vec::new(),
            doc: None,
        };

        let mut last_line = 0;
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            last_line = line;
            state.line(line, raw)?;
        }
        state.finish(last_line)
    }
}

impl State {
    fn line(&mut self, line: usize, raw: &str) -> Result<(), FeatureSyntaxError> {
        let trimmed = raw.trim();
        let column = raw.len() - raw.trim_start().len() + 1;

        if let Some(doc) = &mut self.doc {
            if trimmed == doc.delimiter {
                return self.close_doc_string();
            }
            doc.lines.push(strip_indent(raw, doc.column - 1));
            return Ok(());
        }

        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }

        if trimmed.starts_with('@') {
            for tag in trimmed.split_whitespace().take_while(|t| !t.starts_with('#')) {
                if tag.len() < 2 || !tag.starts_with('@') {
                    return Err(FeatureSyntaxError::new(line, column, format!("invalid tag `{tag}`")));
                }
                self.pending_tags.push((line, tag.to_string()));
            }
            return Ok(());
        }

        if let Some(name) = trimmed.strip_prefix("Feature:") {
            if self.feature.is_some() {
                return Err(FeatureSyntaxError::new(line, column, "duplicate `Feature:` header"));
            }
            self.feature = Some(FeatureModel {
                name: name.trim().to_string(),
                tags: self.take_tags(),
                ..FeatureModel::default()
            });
            self.feature_line = line;
            self.section = Section::FeatureDescription;
            return Ok(());
        }

        if self.feature.is_none() {
            return Err(FeatureSyntaxError::new(line, column, "expected a `Feature:` header"));
        }

        if trimmed.starts_with("Background:") {
            if self.background.is_some() {
                return Err(FeatureSyntaxError::new(line, column, "duplicate `Background:` section"));
            }
            if self.scenario.is_some() || !self.scenarios.is_empty() {
                return Err(FeatureSyntaxError::new(line, column, "`Background:` must come before any scenario"));
            }
            self.reject_tags("Background")?;
            self.flush_description();
            self.background = Some(Background {
                line,
                steps: Vec::new(),
            });
            self.section = Section::Background;
            return Ok(());
        }

        if let Some((outline, name)) = scenario_header(trimmed) {
            self.flush_description();
            self.close_scenario()?;
            self.scenario = Some(Scenario {
                name: name.to_string(),
                line,
                tags: self.take_tags(),
                outline,
                ..Scenario::default()
            });
            self.section = Section::Scenario;
            return Ok(());
        }

        if trimmed.starts_with("Examples:") || trimmed.starts_with("Scenarios:") {
            let tags = self.take_tags();
            match &mut self.scenario {
                Some(scenario) if scenario.outline => {
                    scenario.examples.push(Examples {
                        line,
                        tags,
                        ..Examples::default()
                    });
                    self.section = Section::Examples;
                    return Ok(());
                }
                _ => {
                    return Err(FeatureSyntaxError::new(
                        line,
                        column,
                        "`Examples:` outside of a `Scenario Outline:`",
                    ));
                }
            }
        }

        if trimmed.starts_with('|') {
            return self.table_row(line, column, trimmed);
        }

        if let Some(delimiter) = ["\"\"\"", "```"].into_iter().find(|d| trimmed.starts_with(d)) {
            if self.last_step().is_none() || self.section == Section::Examples {
                return Err(FeatureSyntaxError::new(line, column, "doc string without a preceding step"));
            }
            self.doc = Some(DocString {
                line,
                column,
                delimiter,
                lines: Vec::new(),
            });
            return Ok(());
        }

        if let Some((keyword, text)) = StepKeyword::split(trimmed) {
            self.reject_tags("a step")?;
            let step = Step {
                keyword,
                text: text.to_string(),
                line,
                doc_string: None,
                table: None,
            };
            return match self.section {
                Section::Background => {
                    if let Some(background) = &mut self.background {
                        background.steps.push(step);
                    }
                    Ok(())
                }
                Section::Scenario => {
                    if let Some(scenario) = &mut self.scenario {
                        scenario.steps.push(step);
                    }
                    Ok(())
                }
                Section::Examples => Err(FeatureSyntaxError::new(line, column, "step after an `Examples:` table")),
                Section::Preamble | Section::FeatureDescription => Err(FeatureSyntaxError::new(
                    line,
                    column,
                    "step outside of a `Scenario:` or `Background:`",
                )),
            };
        }

        match self.section {
            Section::FeatureDescription => {
                self.description.push(trimmed.to_string());
                Ok(())
            }
            Section::Scenario => match &mut self.scenario {
                Some(scenario) if scenario.steps.is_empty() => {
                    let description = scenario.description.get_or_insert_with(String::new);
                    if !description.is_empty() {
                        description.push('\n');
                    }
                    description.push_str(trimmed);
                    Ok(())
                }
                _ => Err(FeatureSyntaxError::new(line, column, format!("unexpected text `{trimmed}`"))),
            },
            _ => Err(FeatureSyntaxError::new(line, column, format!("unexpected text `{trimmed}`"))),
        }
    }

    fn table_row(&mut self, line: usize, column: usize, trimmed: &str) -> Result<(), FeatureSyntaxError> {
        if !trimmed.ends_with('|') || trimmed.len() < 2 {
            return Err(FeatureSyntaxError::new(line, column, "unterminated table row"));
        }
        let cells: Vec<String> = trimmed[1..trimmed.len() - 1]
            .split('|')
            .map(|cell| cell.trim().to_string())
            .collect();

        let width_error = |expected: usize| {
            FeatureSyntaxError::new(
                line,
                column,
                format!("table row has {} cells, expected {expected}", cells.len()),
            )
        };

        if self.section == Section::Examples {
            let examples = self
                .scenario
                .as_mut()
                .and_then(|s| s.examples.last_mut())
                .ok_or_else(|| FeatureSyntaxError::new(line, column, "table row without an `Examples:` header"))?;
            if examples.header.is_empty() {
                examples.header = cells;
            } else if cells.len() != examples.header.len() {
                return Err(width_error(examples.header.len()));
            } else {
                examples.rows.push(cells);
            }
            return Ok(());
        }

        let step = self
            .last_step_mut()
            .ok_or_else(|| FeatureSyntaxError::new(line, column, "table row without a preceding step"))?;
        let table = step.table.get_or_insert_with(Vec::new);
        if let Some(first) = table.first()
            && first.len() != cells.len()
        {
            return Err(width_error(first.len()));
        }
        table.push(cells);
        Ok(())
    }

    fn close_doc_string(&mut self) -> Result<(), FeatureSyntaxError> {
        let Some(doc) = self.doc.take() else {
            return Ok(());
        };
        let text = doc.lines.join("\n");
        let step = self
            .last_step_mut()
            .ok_or_else(|| FeatureSyntaxError::new(doc.line, doc.column, "doc string without a preceding step"))?;
        step.doc_string = Some(text);
        Ok(())
    }

    fn last_step(&self) -> Option<&Step> {
        match self.section {
            Section::Background => self.background.as_ref()?.steps.last(),
            Section::Scenario => self.scenario.as_ref()?.steps.last(),
            _ => None,
        }
    }

    fn last_step_mut(&mut self) -> Option<&mut Step> {
        match self.section {
            Section::Background => self.background.as_mut()?.steps.last_mut(),
            Section::Scenario => self.scenario.as_mut()?.steps.last_mut(),
            _ => None,
        }
    }

    fn take_tags(&mut self) -> Vec<String> {
        self.pending_tags.drain(..).map(|(_, tag)| tag).collect()
    }

    fn reject_tags(&self, target: &str) -> Result<(), FeatureSyntaxError> {
        match self.pending_tags.first() {
            Some((line, tag)) => Err(FeatureSyntaxError::new(
                *line,
                1,
                format!("tag `{tag}` cannot be applied to {target}"),
            )),
            None => Ok(()),
        }
    }

    fn flush_description(&mut self) {
        if self.section != Section::FeatureDescription || self.description.is_empty() {
            return;
        }
        if let Some(feature) = &mut self.feature {
            feature.description = Some(self.description.join("\n"));
        }
        self.description.clear();
    }

    fn close_scenario(&mut self) -> Result<(), FeatureSyntaxError> {
        let Some(scenario) = self.scenario.take() else {
            return Ok(());
        };
        if scenario.outline {
            if scenario.examples.is_empty() {
                return Err(FeatureSyntaxError::new(
                    scenario.line,
                    1,
                    format!("scenario outline `{}` has no `Examples:`", scenario.name),
                ));
            }
            if let Some(empty) = scenario.examples.iter().find(|e| e.rows.is_empty()) {
                return Err(FeatureSyntaxError::new(empty.line, 1, "`Examples:` table has no data rows"));
            }
        }
        self.scenarios.push(scenario);
        Ok(())
    }

    fn finish(mut self, last_line: usize) -> Result<FeatureModel, FeatureSyntaxError> {
        if let Some(doc) = &self.doc {
            return Err(FeatureSyntaxError::new(doc.line, doc.column, "unterminated doc string"));
        }
        if self.feature.is_none() {
            return Err(FeatureSyntaxError::new(last_line.max(1), 1, "missing `Feature:` header"));
        }
        if let Some((line, tag)) = self.pending_tags.first() {
            return Err(FeatureSyntaxError::new(*line, 1, format!("tag `{tag}` is not followed by a scenario")));
        }
        self.flush_description();
        self.close_scenario()?;
        if self.scenarios.is_empty() {
            return Err(FeatureSyntaxError::new(self.feature_line, 1, "feature has no `Scenario:`"));
        }

        let mut feature = self.feature.take().unwrap_or_default();
        feature.background = self.background.take();
        feature.scenarios = std::mem::take(&mut self.scenarios);
        debug!(feature = %feature.name, scenarios = feature.scenarios.len(), "parsed feature");
        Ok(feature)
    }
}

fn scenario_header(trimmed: &str) -> Option<(bool, &str)> {
    const HEADERS: [(&str, bool); 4] = [
        ("Scenario Outline:", true),
        ("Scenario Template:", true),
        ("Scenario:", false),
        ("Example:", false),
    ];
    HEADERS
        .into_iter()
        .find_map(|(prefix, outline)| trimmed.strip_prefix(prefix).map(|name| (outline, name.trim())))
}

/// Drop up to `indent` leading whitespace characters.
fn strip_indent(raw: &str, indent: usize) -> String {
    let skip: usize = raw
        .chars()
        .take(indent)
        .take_while(|c| c.is_whitespace())
        .map(char::len_utf8)
        .sum();
    raw[skip..].trim_end().to_string()
}
