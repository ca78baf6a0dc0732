//! Processing-order files.
//!
//! An order is a JSON document listing input products, the calibration
//! coefficient set, and output paths positionally aligned to the inputs.
//! Hand-edited orders are common, so `//` line comments and trailing
//! commas are tolerated.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::types::{HspError, HspResult};

/// One input product.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderInput {
    pub filename: String,
    /// True for Level-0 telemetry, false for a decoded raster.
    #[serde(default)]
    pub raw: bool,
}

/// Calibration coefficient paths. Absent keys stay empty; the driver only
/// builds the corrections whose coefficients are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoeffSet {
    #[serde(default)]
    pub dark_a: String,
    #[serde(default)]
    pub dark_b: String,
    #[serde(default)]
    pub rel_a: String,
    #[serde(default)]
    pub rel_b: String,
    #[serde(default)]
    pub etalon_a: String,
    #[serde(default)]
    pub etalon_b: String,
    #[serde(default)]
    pub badpixel: String,
}

/// A full processing order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub input: Vec<OrderInput>,
    #[serde(default)]
    pub coeff: CoeffSet,
    #[serde(default)]
    pub output: Vec<String>,
}

impl Order {
    /// Sanity checks before a batch starts: at least one input, no blank
    /// input names, and not more outputs than inputs (outputs align
    /// positionally; missing ones are derived by the driver).
    pub fn validate(&self) -> HspResult<()> {
        if self.input.is_empty() {
            return Err(HspError::InvalidArgument("order lists no inputs".into()));
        }
        if let Some(i) = self.input.iter().position(|input| input.filename.is_empty()) {
            return Err(HspError::InvalidArgument(format!(
                "order input {i} has an empty filename"
            )));
        }
        if self.output.len() > self.input.len() {
            return Err(HspError::InvalidArgument(format!(
                "order lists {} outputs for {} inputs",
                self.output.len(),
                self.input.len()
            )));
        }
        Ok(())
    }
}

/// Strip `//` line comments and trailing commas so the relaxed order
/// dialect parses as strict JSON.
fn strip_relaxed(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    while let Some(ch) = chars.next() {
        if in_string {
            cleaned.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                cleaned.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        cleaned.push('\n');
                        break;
                    }
                }
            }
            _ => cleaned.push(ch),
        }
    }

    // Drop commas whose next significant character closes a container.
    let mut out = String::with_capacity(cleaned.len());
    let chars: Vec<char> = cleaned.chars().collect();
    let mut in_string = false;
    let mut escaped = false;
    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Parse an order document.
pub fn parse_order(text: &str) -> HspResult<Order> {
    serde_json::from_str(&strip_relaxed(text))
        .map_err(|e| HspError::ParseFailed(format!("order: {e}")))
}

/// Read and parse an order file.
pub fn load_order<P: AsRef<Path>>(path: P) -> HspResult<Order> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|_| HspError::OpenFailed(path.display().to_string()))?;
    parse_order(&text)
}
