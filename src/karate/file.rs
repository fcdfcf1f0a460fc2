use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::converter::KarateConverter;
use super::model::FeatureModel;
use super::parser::KarateFeatureParser;
use crate::collections::ApiCollection;
use crate::error::FeatureSyntaxError;

/// Stored feature source plus metadata derived from its last good parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarateFeatureFile {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub feature_name: String,
    #[serde(default)]
    pub scenario_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Collection most recently produced from or rendered into this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_converted_collection_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KarateFeatureFile {
    /// Fails when `content` does not parse; nothing invalid gets stored.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Result<Self, FeatureSyntaxError> {
        let now = Utc::now();
        let mut file = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            content: content.into(),
            feature_name: String::new(),
            scenario_count: 0,
            tags: Vec::new(),
            last_converted_collection_id: None,
            created_at: now,
            updated_at: now,
        };
        file.refresh()?;
        Ok(file)
    }

    /// Render a collection as a new feature file linked back to it.
    pub fn from_collection(collection: &ApiCollection) -> Self {
        let model = KarateConverter::new().from_collection(collection);
        let now = Utc::now();
        let mut file = Self {
            id: Uuid::new_v4(),
            name: format!("{}.feature", collection.name),
            content: model.to_feature_text(),
            feature_name: String::new(),
            scenario_count: 0,
            tags: Vec::new(),
            last_converted_collection_id: Some(collection.id),
            created_at: now,
            updated_at: now,
        };
        file.absorb(&model);
        file
    }

    pub fn parse(&self) -> Result<FeatureModel, FeatureSyntaxError> {
        KarateFeatureParser::new().parse(&self.content)
    }

    /// Re-derive metadata from the content.
    pub fn refresh(&mut self) -> Result<FeatureModel, FeatureSyntaxError> {
        let model = self.parse()?;
        self.absorb(&model);
        Ok(model)
    }

    /// Replace the content. The old content is kept when the new one does
    /// not parse.
    pub fn set_content(&mut self, content: impl Into<String>) -> Result<FeatureModel, FeatureSyntaxError> {
        let content = content.into();
        let model = KarateFeatureParser::new().parse(&content)?;
        self.content = content;
        self.absorb(&model);
        self.updated_at = Utc::now();
        Ok(model)
    }

    /// Convert to a collection and remember which one.
    pub fn convert(&mut self) -> Result<ApiCollection, FeatureSyntaxError> {
        let model = self.refresh()?;
        let collection = KarateConverter::new().to_collection(&model);
        self.link_collection(collection.id);
        Ok(collection)
    }

    pub fn link_collection(&mut self, collection_id: Uuid) {
        self.last_converted_collection_id = Some(collection_id);
        self.updated_at = Utc::now();
    }

    fn absorb(&mut self, model: &FeatureModel) {
        self.feature_name = model.name.clone();
        self.scenario_count = model.scenarios.len();
        self.tags = model.all_tags();
    }
}
