//! Result log parser
//!
//! The external test host writes a TRX document per invocation: a
//! definitions section mapping case ids to qualified names, and a results
//! section with one entry per executed case. Real documents put the results
//! section first, so both sections are collected in a single pass and
//! resolved afterwards, preserving the document order of the results.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::common::{Error, Result};

const UNIT_TEST_TAG: &[u8] = b"UnitTest";
const TEST_METHOD_TAG: &[u8] = b"TestMethod";
const UNIT_TEST_RESULT_TAG: &[u8] = b"UnitTestResult";
const MESSAGE_TAG: &[u8] = b"Message";
const STACK_TRACE_TAG: &[u8] = b"StackTrace";
const STD_OUT_TAG: &[u8] = b"StdOut";

/// Extension the result log is written with
pub const RESULT_LOG_EXTENSION: &str = ".trx";

/// Normalized outcome of a single case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    NotExecuted,
    Skipped,
}

impl Outcome {
    /// Normalize the host's raw outcome string
    ///
    /// Unknown strings become [`Outcome::NotExecuted`] with a warning; they
    /// are never silently dropped.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "Passed" => Self::Passed,
            "Failed" => Self::Failed,
            "Skipped" => Self::Skipped,
            "NotExecuted" => Self::NotExecuted,
            other => {
                tracing::warn!(outcome = %other, "Unknown outcome string, treating as not executed");
                Self::NotExecuted
            }
        }
    }
}

/// One case outcome from the result log
#[derive(Debug, Clone)]
pub struct ParsedOutcome {
    pub qualified_name: String,
    pub display_name: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub std_out: Option<String>,
}

/// Which text element of an open result is being read
#[derive(Debug, Clone, Copy)]
enum TextTarget {
    Message,
    StackTrace,
    StdOut,
}

#[derive(Debug, Default)]
struct RawResult {
    test_id: Option<String>,
    display_name: String,
    outcome: String,
    duration: Option<String>,
    message: Option<String>,
    stack_trace: Option<String>,
    std_out: Option<String>,
}

/// Parse a result document into an ordered sequence of outcomes
pub fn parse_document(xml: &str) -> Result<Vec<ParsedOutcome>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    // id -> qualified name, from the definitions section
    let mut definitions: HashMap<String, String> = HashMap::new();
    // Results in document order, resolved after the pass
    let mut raw_results: Vec<RawResult> = Vec::new();
    // Stack of open result elements (data-driven cases nest)
    let mut open_results: Vec<RawResult> = Vec::new();
    let mut current_definition_id: Option<String> = None;
    let mut text_target: Option<TextTarget> = None;

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    UNIT_TEST_TAG => {
                        current_definition_id = attr(&e, b"id")?;
                    }
                    TEST_METHOD_TAG => {
                        if let Some(id) = current_definition_id.clone() {
                            let class = attr(&e, b"className")?.unwrap_or_default();
                            let method = attr(&e, b"name")?.unwrap_or_default();
                            let qualified = if class.is_empty() {
                                method
                            } else {
                                format!("{class}.{method}")
                            };
                            definitions.insert(id, qualified);
                        }
                    }
                    UNIT_TEST_RESULT_TAG => {
                        let result = RawResult {
                            test_id: attr(&e, b"testId")?,
                            display_name: attr(&e, b"testName")?.unwrap_or_default(),
                            outcome: attr(&e, b"outcome")?.unwrap_or_default(),
                            duration: attr(&e, b"duration")?,
                            ..RawResult::default()
                        };
                        open_results.push(result);
                    }
                    MESSAGE_TAG => text_target = Some(TextTarget::Message),
                    STACK_TRACE_TAG => text_target = Some(TextTarget::StackTrace),
                    STD_OUT_TAG => text_target = Some(TextTarget::StdOut),
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let (Some(target), Some(result)) = (text_target, open_results.last_mut()) {
                    let text = t.unescape().map_err(parse_error)?.into_owned();
                    let slot = match target {
                        TextTarget::Message => &mut result.message,
                        TextTarget::StackTrace => &mut result.stack_trace,
                        TextTarget::StdOut => &mut result.std_out,
                    };
                    match slot {
                        Some(existing) => existing.push_str(&text),
                        None => *slot = Some(text),
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                UNIT_TEST_RESULT_TAG => {
                    if let Some(result) = open_results.pop() {
                        raw_results.push(result);
                    }
                }
                UNIT_TEST_TAG => current_definition_id = None,
                MESSAGE_TAG | STACK_TRACE_TAG | STD_OUT_TAG => text_target = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    // Self-closing results never see an End event; fold any leftovers in
    raw_results.append(&mut open_results);

    let outcomes = raw_results
        .into_iter()
        .map(|raw| resolve(raw, &definitions))
        .collect();
    Ok(outcomes)
}

fn resolve(raw: RawResult, definitions: &HashMap<String, String>) -> ParsedOutcome {
    let qualified_name = match raw.test_id.as_deref().and_then(|id| definitions.get(id)) {
        Some(name) => name.clone(),
        None => {
            tracing::warn!(
                test = %raw.display_name,
                "Result has no matching definition, falling back to its display name"
            );
            raw.display_name.clone()
        }
    };

    ParsedOutcome {
        qualified_name,
        display_name: raw.display_name,
        outcome: Outcome::from_raw(&raw.outcome),
        duration_ms: raw.duration.as_deref().map_or(0, parse_duration_ms),
        error_message: raw.message,
        stack_trace: raw.stack_trace,
        std_out: raw.std_out,
    }
}

fn attr(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute.map_err(|e| Error::ResultLogParse(e.to_string()))?;
        if attribute.key.as_ref() == key {
            let value = attribute
                .unescape_value()
                .map_err(parse_error)?
                .into_owned();
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn parse_error(e: quick_xml::Error) -> Error {
    Error::ResultLogParse(e.to_string())
}

/// Parse an `HH:MM:SS.fffffff` duration into milliseconds
///
/// Malformed input yields 0.
pub fn parse_duration_ms(raw: &str) -> u64 {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 3 {
        return 0;
    }
    let hours: u64 = match parts[0].parse() {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let minutes: u64 = match parts[1].parse() {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let seconds: f64 = match parts[2].parse() {
        Ok(v) => v,
        Err(_) => return 0,
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return 0;
    }
    hours * 3_600_000 + minutes * 60_000 + (seconds * 1000.0).round() as u64
}

/// Locate the newest result log under `dir` matching the filename prefix
///
/// The host names its logs by convention; only the directory and prefix are
/// stable, so the newest match wins.
pub fn locate_result_log(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || !name.ends_with(RESULT_LOG_EXTENSION) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            newest = Some((modified, entry.path()));
        }
    }

    Ok(newest.map(|(_, path)| path))
}
