use std::collections::HashMap;

/// Last resort when a capability has neither a pool nor a built-in fallback.
pub const MOCK_TOOL: &str = "mock_tool";

fn fallback_for(capability: &str) -> Option<&'static str> {
    match capability {
        "ocr" => Some("tesseract"),
        "enrichment" => Some("vendor_db"),
        "erp_connector" => Some("mock_erp"),
        "db" => Some("sqlite"),
        "email" => Some("sendgrid"),
        _ => None,
    }
}

/// Chooses which external tool a stage should use for a capability.
///
/// The first entry of the configured pool wins; an empty or missing pool
/// falls back to a fixed default per capability.
#[derive(Debug, Clone, Default)]
pub struct ToolPicker {
    pools: HashMap<String, Vec<String>>,
}

impl ToolPicker {
    pub fn new(pools: HashMap<String, Vec<String>>) -> Self {
        Self { pools }
    }

    pub fn select(&self, capability: &str) -> String {
        self.pools
            .get(capability)
            .and_then(|pool| pool.iter().find(|t| !t.trim().is_empty()))
            .cloned()
            .or_else(|| fallback_for(capability).map(str::to_string))
            .unwrap_or_else(|| MOCK_TOOL.to_string())
    }
}
