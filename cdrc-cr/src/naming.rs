//! Cluster names derived from a representative coredump report

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;

static EXCEPTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"exccause\s+0x[0-9a-fA-F]+\s+\(([^)]+)\)").expect("valid regex"));

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^#0\s+.*?in\s+([^(]+)\s+\(.*\)\s+at\s+(.+):(\d+)").expect("valid regex")
});

const REGISTERS_BANNER: &str = "CURRENT THREAD REGISTERS";
const STACK_BANNER: &str = "CURRENT THREAD STACK";

/// Length of the register digest kept in names
const HASH_LEN: usize = 10;

/// Crash signature pulled out of a decoded report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashSignature {
    pub exception: Option<String>,
    pub function: Option<String>,
    /// Base name of the source file of frame #0
    pub file: Option<String>,
    pub line: Option<u32>,
    pub register_hash: Option<String>,
}

impl CrashSignature {
    pub fn parse(report: &str) -> Self {
        let content = normalize_report(report);
        let mut signature = Self::default();

        if let Some(caps) = EXCEPTION_RE.captures(&content) {
            signature.exception = caps.get(1).map(|m| m.as_str().trim().to_string());
        }

        if let Some(caps) = FRAME_RE.captures(&content) {
            signature.function = caps.get(1).map(|m| m.as_str().trim().to_string());
            signature.file = caps.get(2).map(|m| {
                let path = m.as_str().trim();
                Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string())
            });
            signature.line = caps.get(3).and_then(|m| m.as_str().parse().ok());
        }

        signature.register_hash = register_block(&content).map(|block| short_digest(&block));
        signature
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `None` when nothing in the report was recognised
    pub fn name(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!(
            "{}_{}_{}_{}_REGS-{}",
            self.exception.as_deref().unwrap_or("UnknownException"),
            self.function.as_deref().unwrap_or("UnknownFunc"),
            self.file.as_deref().unwrap_or("UnknownFile"),
            self.line.unwrap_or(0),
            self.register_hash.as_deref().unwrap_or("NOHASH"),
        ))
    }
}

/// Trim every line and drop blank ones
fn normalize_report(report: &str) -> String {
    report
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lines strictly between the register and stack banners
fn register_block(content: &str) -> Option<String> {
    let mut lines = content.lines();
    lines.by_ref().find(|line| line.contains(REGISTERS_BANNER))?;

    let mut block = Vec::new();
    for line in lines {
        if line.contains(STACK_BANNER) {
            return Some(block.join("\n"));
        }
        block.push(line);
    }
    None
}

fn short_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(HASH_LEN);
    hex
}

/// Name for a cluster whose representative has no usable report
pub fn fallback_name(raw_stem: &str) -> String {
    format!("Cluster_{}", raw_stem)
}

/// Name for a label with no members
pub fn empty_label_name(label: &str, unix_ts: i64) -> String {
    format!("Cluster_Empty_{}_{}", label, unix_ts)
}

/// Name for a representative that could not be loaded
pub fn unexpected_name(unix_ts: i64) -> String {
    format!("Cluster_Unexpected_{}", unix_ts)
}

/// First of `base`, `base_2`, `base_3`, ... not already taken
pub fn unique_name(base: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2u32..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}
