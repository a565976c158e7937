use serde::Serialize;

use crate::config::BackendFlavor;

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// One entry of the backend's model list, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawModel {
    pub name: String,
    pub size_bytes: Option<u64>,
    pub parameter_size: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelCategory {
    Code,
    Chat,
}

impl ModelCategory {
    pub fn of(id: &str) -> Self {
        if id.contains("code") {
            ModelCategory::Code
        } else {
            ModelCategory::Chat
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub size: String,
    pub size_bytes: Option<u64>,
    pub parameters: String,
    pub description: String,
    pub category: ModelCategory,
    pub installed: bool,
}

impl ModelDescriptor {
    pub fn from_raw(raw: RawModel, flavor: BackendFlavor) -> Self {
        let category = ModelCategory::of(&raw.name);
        let description = format!("{} - {} model", raw.name, flavor_label(flavor));
        Self {
            id: raw.name.clone(),
            size: raw
                .size_bytes
                .map(format_bytes)
                .unwrap_or_else(|| "Unknown".to_string()),
            size_bytes: raw.size_bytes,
            parameters: raw
                .parameter_size
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            description,
            category,
            installed: true,
            name: raw.name,
        }
    }
}

fn flavor_label(flavor: BackendFlavor) -> &'static str {
    match flavor {
        BackendFlavor::Ollama => "Ollama",
        BackendFlavor::OpenAi => "OpenAI-compatible",
    }
}

/// Renders a byte count with base-1024 units and two decimals.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", SIZE_UNITS[unit])
}

struct Recommended {
    id: &'static str,
    name: &'static str,
    size: &'static str,
    parameters: &'static str,
    description: &'static str,
}

const RECOMMENDED: &[Recommended] = &[
    Recommended {
        id: "llama3.2",
        name: "Llama 3.2 3B",
        size: "2.0GB",
        parameters: "3B",
        description: "Latest Llama model optimized for coding and reasoning",
    },
    Recommended {
        id: "codellama",
        name: "CodeLlama 7B",
        size: "3.8GB",
        parameters: "7B",
        description: "Specialized for code generation and programming tasks",
    },
];

/// Installed models followed by recommended ones that are not installed yet.
///
/// A recommended id counts as installed when an installed model has the same
/// name or the same name with a `:tag` suffix.
pub fn catalog(installed: Vec<ModelDescriptor>) -> Vec<ModelDescriptor> {
    let missing: Vec<ModelDescriptor> = RECOMMENDED
        .iter()
        .filter(|rec| {
            !installed
                .iter()
                .any(|m| m.id == rec.id || m.id.split(':').next() == Some(rec.id))
        })
        .map(|rec| ModelDescriptor {
            id: rec.id.to_string(),
            name: rec.name.to_string(),
            size: rec.size.to_string(),
            size_bytes: None,
            parameters: rec.parameters.to_string(),
            description: rec.description.to_string(),
            category: ModelCategory::of(rec.id),
            installed: false,
        })
        .collect();

    let mut all = installed;
    all.extend(missing);
    all
}
