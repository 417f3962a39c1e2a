use serde::Serialize;

use crate::analysis::TaskReport;
use crate::error::Result;
use crate::ir::Key;
use crate::rules::Finding;
use crate::ScanReport;

/// One report-sink record.
#[derive(Serialize)]
struct RootLine<'a> {
    root_key: &'a Key,
    findings: &'a [Finding],
    /// Tasks with at least one extracted effect.
    task_findings: Vec<&'a TaskReport>,
}

/// Render one JSON object per root, in root order.
pub fn render(report: &ScanReport) -> Result<String> {
    let mut out = String::new();
    for root in &report.reports {
        let line = RootLine {
            root_key: &root.root_key,
            findings: &root.findings,
            task_findings: root.tasks.iter().filter(|t| !t.findings.is_empty()).collect(),
        };
        out.push_str(&serde_json::to_string(&line)?);
        out.push('\n');
    }
    Ok(out)
}
