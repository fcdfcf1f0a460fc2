use std::borrow::Cow;

use tracing::info;

use super::converter::KarateConverter;
use super::file::KarateFeatureFile;
use super::model::FeatureModel;
use super::parser::KarateFeatureParser;
use crate::collections::ApiCollection;
use crate::engine::{ApiTestEngine, ApiTestRun, CancelSignal, Executable, NoopObserver, RunConfig, RunObserver, RunOrigin};
use crate::environment::ApiEnvironment;
use crate::error::FeatureSyntaxError;

impl Executable for FeatureModel {
    fn origin(&self) -> RunOrigin {
        RunOrigin::KarateFeature
    }

    fn to_collection(&self) -> Cow<'_, ApiCollection> {
        Cow::Owned(KarateConverter::new().to_collection(self))
    }
}

/// Karate-style tag expression.
///
/// Each entry is one group; a scenario must satisfy every group. Within a
/// group, comma-separated alternatives are OR-ed. `~@tag` negates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    groups: Vec<Vec<(bool, String)>>,
}

impl TagFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let groups = expressions
            .into_iter()
            .map(|expression| {
                expression
                    .as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|term| !term.is_empty())
                    .map(|term| match term.strip_prefix('~') {
                        Some(negated) => (false, normalize(negated)),
                        None => (true, normalize(term)),
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect();
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn matches(&self, tags: &[String]) -> bool {
        self.groups.iter().all(|group| {
            group
                .iter()
                .any(|(wanted, tag)| tags.iter().any(|t| t == tag) == *wanted)
        })
    }

    /// Keep the scenarios whose own tags plus the feature's tags match.
    pub fn apply(&self, feature: &FeatureModel) -> FeatureModel {
        if self.is_empty() {
            return feature.clone();
        }
        let mut filtered = feature.clone();
        filtered.scenarios.retain(|scenario| {
            let tags: Vec<String> = feature.tags.iter().chain(&scenario.tags).cloned().collect();
            self.matches(&tags)
        });
        filtered
    }
}

fn normalize(tag: &str) -> String {
    if tag.starts_with('@') { tag.to_string() } else { format!("@{tag}") }
}

/// Runs feature files through the same engine as native collections.
#[derive(Debug, Clone)]
pub struct KarateOrchestrator {
    engine: ApiTestEngine,
    parser: KarateFeatureParser,
}

impl KarateOrchestrator {
    pub fn new(engine: ApiTestEngine) -> Self {
        Self {
            engine,
            parser: KarateFeatureParser::new(),
        }
    }

    pub async fn run(
        &self,
        feature: &FeatureModel,
        environment: Option<&ApiEnvironment>,
        config: &RunConfig,
    ) -> ApiTestRun {
        self.run_with(feature, &TagFilter::all(), environment, config, &CancelSignal::never(), &NoopObserver)
            .await
    }

    pub async fn run_with(
        &self,
        feature: &FeatureModel,
        filter: &TagFilter,
        environment: Option<&ApiEnvironment>,
        config: &RunConfig,
        cancel: &CancelSignal,
        observer: &dyn RunObserver,
    ) -> ApiTestRun {
        let selected = filter.apply(feature);
        if selected.scenarios.len() != feature.scenarios.len() {
            info!(
                feature = %feature.name,
                selected = selected.scenarios.len(),
                total = feature.scenarios.len(),
                "scenarios filtered by tag"
            );
        }
        self.engine
            .run_with(&selected, environment, config, cancel, observer)
            .await
    }

    /// Parse then run. A syntax error aborts before any request is sent.
    pub async fn run_source(
        &self,
        text: &str,
        filter: &TagFilter,
        environment: Option<&ApiEnvironment>,
        config: &RunConfig,
    ) -> Result<ApiTestRun, FeatureSyntaxError> {
        let feature = self.parser.parse(text)?;
        Ok(self
            .run_with(&feature, filter, environment, config, &CancelSignal::never(), &NoopObserver)
            .await)
    }

    pub async fn run_file(
        &self,
        file: &KarateFeatureFile,
        filter: &TagFilter,
        environment: Option<&ApiEnvironment>,
        config: &RunConfig,
        cancel: &CancelSignal,
        observer: &dyn RunObserver,
    ) -> Result<ApiTestRun, FeatureSyntaxError> {
        let feature = file.parse()?;
        Ok(self
            .run_with(&feature, filter, environment, config, cancel, observer)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(TagFilter::all().matches(&[]));
        assert!(TagFilter::parse(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn groups_and_alternatives() {
        let filter = TagFilter::parse(["@smoke,@critical", "~@slow"]);
        assert!(filter.matches(&tags(&["@smoke"])));
        assert!(filter.matches(&tags(&["@critical", "@api"])));
        assert!(!filter.matches(&tags(&["@smoke", "@slow"])));
        assert!(!filter.matches(&tags(&["@api"])));
    }

    #[test]
    fn bare_names_get_at_prefix() {
        let filter = TagFilter::parse(["smoke"]);
        assert!(filter.matches(&tags(&["@smoke"])));
    }

    #[test]
    fn feature_tags_count_for_every_scenario() {
        let text = "@api\nFeature: f\n@slow\nScenario: a\n* method get\nScenario: b\n* method get\n";
        let feature = KarateFeatureParser::new().parse(text).unwrap();

        let only_api = TagFilter::parse(["@api"]).apply(&feature);
        assert_eq!(only_api.scenarios.len(), 2);

        let fast = TagFilter::parse(["~@slow"]).apply(&feature);
        assert_eq!(fast.scenarios.len(), 1);
        assert_eq!(fast.scenarios[0].name, "b");
    }

    #[test]
    fn feature_is_executable() {
        let feature = KarateFeatureParser::new()
            .parse("Feature: f\nScenario: a\n* url 'http://h'\n* method get\n* status 200\n")
            .unwrap();
        assert_eq!(feature.origin(), RunOrigin::KarateFeature);
        let collection = feature.to_collection();
        assert_eq!(collection.requests.len(), 1);
        assert_eq!(collection.requests[0].url, "http://h");
    }
}
