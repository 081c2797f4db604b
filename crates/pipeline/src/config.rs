//! Declarative pipeline topologies and their serialization

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::backend::{Backend, PropertyValue};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::state::State;

/// Stage properties as a flexible key-value map
pub type StageProperties = BTreeMap<String, serde_json::Value>;

/// Complete pipeline topology
///
/// Validation is stricter than the linker: a link chain naming fewer than two
/// stages links nothing, so a file containing one is rejected as a mistake
/// even though [`Pipeline::link_by_name`] accepts it as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline (container) name
    pub name: String,
    #[serde(default)]
    pub options: PipelineOptions,
    /// Stage definitions, created in order
    pub stages: Vec<StageConfig>,
    /// Chains of stage names; each chain is linked pairwise in order
    #[serde(default)]
    pub links: Vec<Vec<String>>,
    /// State requested once everything is linked
    #[serde(default)]
    pub state: Option<State>,
}

/// Individual stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name within the pipeline
    pub name: String,
    /// Runtime stage type (element factory name)
    #[serde(rename = "type")]
    pub stage_type: String,
    /// Filter applied on the link where this stage is the source
    #[serde(default)]
    pub caps: Option<String>,
    #[serde(default)]
    pub properties: StageProperties,
}

impl PipelineConfig {
    /// Loads a topology from a YAML or JSON file, chosen by extension.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents)?,
            _ => Self::from_yaml_str(&contents)?,
        };
        info!("Loaded pipeline '{}' from {}", config.name, path.display());
        Ok(config)
    }

    pub fn from_yaml_str(s: &str) -> PipelineResult<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_yaml(&self) -> PipelineResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Validate the topology without touching a runtime
    pub fn validate(&self) -> PipelineResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("pipeline name cannot be empty"));
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(invalid("stage name cannot be empty"));
            }
            if stage.stage_type.trim().is_empty() {
                return Err(invalid(format!("stage '{}' has no type", stage.name)));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(invalid(format!("duplicate stage name '{}'", stage.name)));
            }
        }

        for (i, chain) in self.links.iter().enumerate() {
            if chain.len() < 2 {
                return Err(invalid(format!(
                    "link chain {} needs at least two stages",
                    i
                )));
            }
            if let Some(unknown) = chain.iter().find(|name| !names.contains(name.as_str())) {
                return Err(invalid(format!(
                    "link chain {} references unknown stage '{}'",
                    i, unknown
                )));
            }
        }

        Ok(())
    }

    /// Builds the topology on `backend`: creates every stage, applies its
    /// properties, links every chain and requests the configured state.
    pub fn build<B: Backend>(&self, backend: B) -> PipelineResult<Pipeline<B>> {
        self.validate()?;

        let mut pipeline = Pipeline::new(backend, &self.name, self.options)?;

        for stage in &self.stages {
            match &stage.caps {
                Some(caps) => {
                    pipeline.create_filtered_stage(&stage.stage_type, &stage.name, caps)?;
                }
                None => {
                    pipeline.create_stage(&stage.stage_type, &stage.name)?;
                }
            }
            for (property, value) in &stage.properties {
                let value = PropertyValue::try_from(value.clone()).map_err(|e| {
                    invalid(format!("property '{}.{}': {}", stage.name, property, e))
                })?;
                pipeline.set_property(&stage.name, property, value)?;
            }
        }

        for chain in &self.links {
            pipeline.link_by_name(chain.as_slice())?;
        }

        if let Some(state) = self.state {
            pipeline.set_state(state)?;
        }

        Ok(pipeline)
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfiguration {
        message: message.into(),
    }
}
