//! Workflow Selection and Binding
//!
//! A [`WorkflowSelection`] is what the configuration provider hands the
//! orchestrator (builder session, gallery, chosen agents/tools). Each
//! initiating request gets a fresh, immutable [`WorkflowBinding`] built from
//! the selection plus the prompt.

use serde::{Deserialize, Serialize};

use crate::error::BuilderError;

/// Workflow configuration chosen by the user
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSelection {
    /// Builder session identifier (also parameterizes the duplex path)
    pub builder_id: i64,
    /// Gallery bundle identifier
    pub gallery_id: i64,
    /// Agents picked for the workflow
    #[serde(default)]
    pub agents: Vec<String>,
    /// Tools picked for the workflow
    #[serde(default)]
    pub tools: Vec<String>,
    /// Knowledge base collection, if any
    #[serde(default)]
    pub knowledge_base: Option<String>,
}

impl WorkflowSelection {
    /// Create a selection for a builder session and gallery
    #[must_use]
    pub fn new(builder_id: i64, gallery_id: i64) -> Self {
        Self {
            builder_id,
            gallery_id,
            ..Default::default()
        }
    }

    /// Attach a knowledge base collection
    #[must_use]
    pub fn with_knowledge_base(mut self, name: impl Into<String>) -> Self {
        self.knowledge_base = Some(name.into());
        self
    }

    /// Bind a prompt to this selection
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Validation`] for an empty prompt.
    pub fn bind(&self, prompt: &str) -> Result<WorkflowBinding, BuilderError> {
        let prompt_text = validate_prompt(prompt)?;
        Ok(WorkflowBinding {
            builder_id: self.builder_id,
            gallery_id: self.gallery_id,
            prompt_text,
            knowledge_base: self.knowledge_base.clone(),
        })
    }
}

/// Configuration attached to one conversation-initiating request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowBinding {
    builder_id: i64,
    gallery_id: i64,
    prompt_text: String,
    knowledge_base: Option<String>,
}

impl WorkflowBinding {
    /// Builder session identifier
    #[must_use]
    pub fn builder_id(&self) -> i64 {
        self.builder_id
    }

    /// Gallery bundle identifier
    #[must_use]
    pub fn gallery_id(&self) -> i64 {
        self.gallery_id
    }

    /// Prompt text
    #[must_use]
    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    /// Form fields for the planning request
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("builder_id", self.builder_id.to_string()),
            ("gallery_id", self.gallery_id.to_string()),
            ("prompt", self.prompt_text.clone()),
        ];
        if let Some(ref kb) = self.knowledge_base {
            fields.push(("knowledge_base", kb.clone()));
        }
        fields
    }
}

/// Reject empty prompts before any network call
///
/// # Errors
///
/// Returns [`BuilderError::Validation`] when the text is blank.
pub fn validate_prompt(text: &str) -> Result<String, BuilderError> {
    if text.trim().is_empty() {
        return Err(BuilderError::Validation {
            field: "prompt",
            message: "prompt must not be empty".to_string(),
        });
    }
    Ok(text.to_string())
}
