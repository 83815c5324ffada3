//! HTML render node.
//!
//! Rendering HTML to an image is the job of an external collaborator; the
//! engine only defines the [`HtmlRenderer`] seam and a node that calls it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Descriptor, Node, NodeOutput, Port};
use crate::nodes::parse_config;

/// External HTML-to-image collaborator.
#[async_trait]
pub trait HtmlRenderer: Send + Sync {
    /// Renders the named template with `data`, returning a base64-encoded
    /// PNG.
    async fn render(&self, template: &str, data: &Value) -> Result<String, String>;
}

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "html_render",
    name: "HTML render",
    description: "Renders an HTML template to a base64 PNG",
    category: "action",
    inputs: &[],
    outputs: &[
        Port { name: "image_base64", label: "image_base64 - rendered PNG" },
        Port { name: "render_success", label: "render_success - outcome" },
        Port { name: "render_error", label: "render_error - failure message" },
    ],
};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HtmlRenderConfig {
    template: String,
    data: String,
}

/// Calls the configured [`HtmlRenderer`] with a template name and templated
/// JSON data.
pub struct HtmlRenderNode {
    config: HtmlRenderConfig,
}

impl HtmlRenderNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(HtmlRenderNode {
            config: parse_config(config),
        })
    }
}

#[async_trait]
impl Node for HtmlRenderNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let Some(renderer) = ctx.services.renderer.clone() else {
            return Ok(NodeOutput::advance()
                .with("render_success", false)
                .with("render_error", "no renderer configured"));
        };

        let data = if self.config.data.is_empty() {
            json!({})
        } else {
            let rendered = ctx.render_template(&self.config.data);
            serde_json::from_str(&rendered).unwrap_or(json!({}))
        };

        match renderer.render(&self.config.template, &data).await {
            Ok(image) => Ok(NodeOutput::advance()
                .with("image_base64", image)
                .with("render_success", true)
                .with("render_error", "")),
            Err(error) => Ok(NodeOutput::advance()
                .with("render_success", false)
                .with("render_error", error)),
        }
    }
}
