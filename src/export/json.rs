use std::path::Path;

use crate::error::Result;
use crate::models::Issue;

/// The full nested records, pretty printed with a trailing newline.
pub fn render_json(issues: &[Issue]) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(issues)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Loads a previous JSON export for offline analysis.
pub fn read_json(path: &Path) -> Result<Vec<Issue>> {
    let contents = std::fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}
