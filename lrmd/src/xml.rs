//! Read-only access to the XML fragments the DC sends with a request, and
//! to resource agent meta-data documents (spec §4.1, §4.2).

use std::collections::BTreeMap;

use roxmltree::Document;
use serde::{Deserialize, Serialize};

use crate::error::{LrmError, LrmResult};
use crate::op::ResourceDescriptor;

/// The parsed `<rsc_op>` fragment of an inbound request: its `CRM_meta_*`
/// and agent-instance parameters, the resource triple from the nested
/// `<primitive>` element, and the DC's transition key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFragment {
    pub params: BTreeMap<String, String>,
    pub transition_key: Option<String>,
    pub descriptor: Option<ResourceDescriptor>,
    /// The `operation` attribute of the `<rsc_op>` root (start, stop,
    /// monitor, ...), absent for envelope verbs that carry no op.
    pub operation: Option<String>,
}

impl RequestFragment {
    /// Parse a `<rsc_op>` element: its nested `<attributes>` children become
    /// `params`, its `<primitive>` child becomes `descriptor`, and
    /// `transition_key` is read from the `CRM_meta_transition_key`
    /// attribute if present.
    pub fn parse(xml: &str) -> LrmResult<Self> {
        let doc = Document::parse(xml).map_err(|e| LrmError::InvalidRequest(e.to_string()))?;
        let root = doc.root_element();

        let mut params = BTreeMap::new();
        for attrs_node in root.descendants().filter(|n| n.has_tag_name("attributes")) {
            for attr in attrs_node.attributes() {
                params.insert(attr.name().to_string(), attr.value().to_string());
            }
        }

        let descriptor = root
            .descendants()
            .find(|n| n.has_tag_name("primitive"))
            .and_then(|primitive| {
                let id = primitive.attribute("id")?;
                let class = primitive.attribute("class").unwrap_or("ocf");
                let agent_type = primitive.attribute("type")?;
                let provider = primitive.attribute("provider").map(str::to_string);
                Some(ResourceDescriptor::new(id, class, provider, agent_type))
            });

        let transition_key = params.get("CRM_meta_transition_key").cloned();
        let operation = root.attribute("operation").map(str::to_string);

        Ok(RequestFragment {
            params,
            transition_key,
            descriptor,
            operation,
        })
    }

    pub fn meta(&self, name: &str) -> Option<&str> {
        self.params
            .get(&format!("CRM_meta_{name}"))
            .map(String::as_str)
    }

    pub fn meta_i64(&self, name: &str) -> Option<i64> {
        self.meta(name).and_then(|v| v.parse().ok())
    }
}

/// A parsed agent meta-data document (the output of the agent's `meta-data`
/// action), used by the reload cache to decide which parameters are
/// `unique` and which actions the agent advertises (spec §4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentMetaData {
    /// Parameter name -> whether it is marked `unique="1"`.
    pub parameters: BTreeMap<String, bool>,
    /// Action names the agent's `<actions>` block advertises.
    pub actions: Vec<String>,
}

impl AgentMetaData {
    pub fn parse(xml: &str) -> LrmResult<Self> {
        let doc = Document::parse(xml).map_err(|e| LrmError::InvalidRequest(e.to_string()))?;
        let root = doc.root_element();

        let mut parameters = BTreeMap::new();
        for param in root.descendants().filter(|n| n.has_tag_name("parameter")) {
            let Some(name) = param.attribute("name") else {
                continue;
            };
            let unique = param.attribute("unique").map(|v| v == "1").unwrap_or(false);
            parameters.insert(name.to_string(), unique);
        }

        let mut actions = Vec::new();
        for action in root.descendants().filter(|n| n.has_tag_name("action")) {
            if let Some(name) = action.attribute("name") {
                actions.push(name.to_string());
            }
        }

        Ok(AgentMetaData { parameters, actions })
    }

    /// Parameters this agent marks non-reloadable (`unique="1"`); these are
    /// exactly the ones that, if changed, block a reload in favor of a
    /// restart (spec §4.2, §4.5).
    pub fn unique_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|(_, unique)| **unique)
            .map(|(name, _)| name.as_str())
    }

    pub fn supports_action(&self, name: &str) -> bool {
        self.actions.iter().any(|a| a == name)
    }
}
