//! Log sanitization for PHI and secrets.
//!
//! Applied line-by-line to formatted log output by [`SanitizingMakeWriter`].
//! Redacts:
//! - Lab values keyed by name (`serum_creatinine=1.5`, `"age": 55`, ...)
//! - Dates of birth keyed by name
//! - UUIDs, MRNs, SSN-like numbers and email addresses
//! - Key material (signing seeds, long hex/base64 tokens)
//!
//! The pipeline itself never logs raw lab values at `info`; this is the
//! fallback for debug output and third-party messages.
//!
//! # Performance
//!
//! Input is capped per call (see [`set_max_bytes`] and
//! `CKD_SANITIZE_MAX_BYTES`); anything beyond the cap is replaced with
//! `[TRUNCATED]`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use tracing_subscriber::fmt::MakeWriter;

static PHI_PATTERNS: OnceLock<PhiPatterns> = OnceLock::new();

/// 0 = not configured; fall back to the environment, then the default.
static MAX_BYTES: AtomicUsize = AtomicUsize::new(0);

const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

struct PhiPattern {
    regex: Regex,
    replacement: &'static str,
}

struct PhiPatterns {
    set: RegexSet,
    patterns: Vec<PhiPattern>,
}

/// Override the per-call byte cap (normally from `SentinelConfig`).
pub fn set_max_bytes(max_bytes: usize) {
    MAX_BYTES.store(max_bytes, Ordering::Relaxed);
}

fn max_sanitize_bytes() -> usize {
    match MAX_BYTES.load(Ordering::Relaxed) {
        0 => std::env::var("CKD_SANITIZE_MAX_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES),
        n => n,
    }
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn get_patterns() -> &'static PhiPatterns {
    PHI_PATTERNS.get_or_init(|| {
        // Order matters: keyed lab values go first so their numbers are gone
        // before the broader patterns run.
        let rules: Vec<(&'static str, &'static str)> = vec![
            (
                r#"(?i)\b(serum_creatinine|creatinine|scr|cystatin_c|cystatin|blood_pressure_systolic|blood_pressure_diastolic|bp_sys|bp_dia|systolic|diastolic|age|egfr|egfr_predicted|raw_egfr|reference_egfr)"?\s*[:=]\s*"?-?[0-9]+(?:\.[0-9]+)?(?:[eE][-+]?[0-9]+)?"?"#,
                "$1=[REDACTED-LAB]",
            ),
            (
                r"(?i)\b(?:dob|date_of_birth|birth_date|birthdate)\b\s*[:=]\s*\d{4}-\d{2}-\d{2}",
                "[REDACTED-DOB]",
            ),
            (
                r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
                "[REDACTED-UUID]",
            ),
            (r"\b\d{3}-\d{2}-\d{4}\b", "[REDACTED-SSN]"),
            (r"(?i)\bMRN[:\s]?\d{6,10}\b", "[REDACTED-MRN]"),
            (
                r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
                "[REDACTED-EMAIL]",
            ),
            (
                r"(?i)\b(?:private[_-]?key|secret|seed|signing[_-]?key|token)\b\s*[:=]\s*[A-Za-z0-9+/]{32,}={0,2}",
                "[REDACTED-SECRET]",
            ),
            (r"\b[0-9a-fA-F]{64,}\b", "[REDACTED-KEY]"),
        ];

        let set = RegexSet::new(rules.iter().map(|(p, _)| *p)).expect("Valid regex set");
        let patterns = rules
            .into_iter()
            .map(|(pattern, replacement)| PhiPattern {
                regex: Regex::new(pattern).expect("Valid regex"),
                replacement,
            })
            .collect();
        PhiPatterns { set, patterns }
    })
}

/// Redact PHI and secrets from a string.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let patterns = get_patterns();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    // Single scan for "any match" before running individual replacements.
    for idx in patterns.set.matches(prefix).into_iter() {
        let pattern = &patterns.patterns[idx];
        result = pattern
            .regex
            .replace_all(&result, pattern.replacement)
            .into_owned();
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
    }
    result
}

/// `MakeWriter` wrapper that sanitizes each formatted log line before it
/// reaches the inner sink.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

/// Flushes any unterminated tail on drop.
pub struct SanitizingWriter<W: std::io::Write> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W: std::io::Write> SanitizingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let sanitized = sanitize(&String::from_utf8_lossy(&line));
            self.inner.write_all(sanitized.as_bytes())?;
        }
        Ok(())
    }
}

impl<W: std::io::Write> std::io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A huge line with no newline must not buffer without bound.
        let hard_cap = max_sanitize_bytes().saturating_mul(2);
        if self.buffer.len() > hard_cap {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.buffer.clear();
            return Ok(buf.len());
        }

        self.flush_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_lines()?;
        if !self.buffer.is_empty() {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.buffer.clear();
        }
        self.inner.flush()
    }
}

impl<W: std::io::Write> Drop for SanitizingWriter<W> {
    fn drop(&mut self) {
        let _ = std::io::Write::flush(self);
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}
