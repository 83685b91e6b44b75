//! Inventory report produced by a reconciliation pass.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tool_store::{InventoryCheckId, SiteId};

use crate::registry::ToolSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReport {
    pub check_id: InventoryCheckId,
    pub site_id: SiteId,
    pub site_name: String,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub total: usize,
    pub found: Vec<ToolSummary>,
    pub missing: Vec<ToolSummary>,
}

impl InventoryReport {
    pub fn found_count(&self) -> usize {
        self.found.len()
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    /// Plain-text summary suitable for a chat message
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Inventory results for site '{}'", self.site_name);
        let _ = writeln!(
            out,
            "Performed by {} at {}",
            self.performed_by,
            self.performed_at.format("%Y-%m-%d %H:%M:%S")
        );
        out.push('\n');
        let _ = writeln!(out, "Total tools: {}", self.total);
        let _ = writeln!(out, "Found: {}", self.found_count());
        let _ = writeln!(out, "Lost: {}", self.missing_count());

        if !self.found.is_empty() {
            out.push_str("\nFound tools:\n");
            push_lines(&mut out, &self.found);
        }
        if !self.missing.is_empty() {
            out.push_str("\nLost tools:\n");
            push_lines(&mut out, &self.missing);
        }
        out
    }

    /// Structured export for the accounting handoff
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn push_lines(out: &mut String, tools: &[ToolSummary]) {
    for tool in tools {
        let _ = writeln!(out, "- {} (inv. #{})", tool.name, tool.inventory_number);
    }
}
