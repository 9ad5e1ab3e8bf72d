//! Collection of per-interaction results and the JUnit XML report built from them.

use crate::{
    error::{Error, FailureKind},
    executor::ReplayPhase,
    matching::Mismatch,
};
use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use quick_xml::{
    events::{BytesCData, BytesDecl, BytesEnd, BytesStart, Event},
    Writer,
};
use regex::Regex;
use std::{
    fs,
    io::Cursor,
    path::Path,
    sync::Mutex,
    time::{Duration, Instant},
};

lazy_static! {
    static ref ANSI_ESCAPE_REGEX: Regex = Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap();
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Passed => "passed",
            CaseStatus::Failed => "failed",
            CaseStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub diff: Vec<Mismatch>,
    /// Request and response text for diagnosis.
    pub context: String,
    /// Where the replay stopped.
    pub phase: ReplayPhase,
}

impl Failure {
    pub fn from_error(error: &Error, phase: ReplayPhase, context: String) -> Self {
        Self {
            kind: error.failure_kind(),
            message: error.to_string(),
            diff: error.mismatches().to_vec(),
            context,
            phase,
        }
    }

    fn details(&self) -> String {
        let mut details = format!("{}\nphase: {}\n", self.message, self.phase);
        for mismatch in &self.diff {
            details.push_str(&format!("  {}\n", mismatch));
        }
        if !self.context.is_empty() {
            details.push('\n');
            details.push_str(&self.context);
        }
        xml_text(&details)
    }
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub description: String,
    pub status: CaseStatus,
    pub duration: Duration,
    pub failure: Option<Failure>,
}

impl VerificationResult {
    pub fn passed<S: Into<String>>(description: S, duration: Duration) -> Self {
        Self {
            description: description.into(),
            status: CaseStatus::Passed,
            duration,
            failure: None,
        }
    }

    pub fn skipped<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
            status: CaseStatus::Skipped,
            duration: Duration::ZERO,
            failure: None,
        }
    }

    pub fn failed<S: Into<String>>(description: S, duration: Duration, failure: Failure) -> Self {
        Self {
            description: description.into(),
            status: CaseStatus::Failed,
            duration,
            failure: Some(failure),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == CaseStatus::Failed
    }
}

#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub name: String,
    pub results: Vec<VerificationResult>,
}

impl SuiteReport {
    fn count(&self, status: CaseStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    fn duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }
}

/// Append-only collector shared by concurrently running replays.
#[derive(Debug)]
pub struct Reporter {
    started: Instant,
    timestamp: DateTime<Utc>,
    suites: Mutex<Vec<SuiteReport>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            timestamp: Utc::now(),
            suites: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, suite: &str, result: VerificationResult) {
        tracing::debug!(
            suite,
            interaction = %result.description,
            status = result.status.as_str(),
            "recorded result"
        );

        let mut suites = self
            .suites
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match suites.iter_mut().find(|s| s.name == suite) {
            Some(existing) => existing.results.push(result),
            None => suites.push(SuiteReport {
                name: suite.to_string(),
                results: vec![result],
            }),
        }
    }

    /// Consumes the reporter, so a run produces exactly one report.
    pub fn finalize(self) -> Report {
        Report {
            timestamp: self.timestamp,
            duration: self.started.elapsed(),
            suites: self
                .suites
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub suites: Vec<SuiteReport>,
}

impl Report {
    pub fn total(&self) -> usize {
        self.suites.iter().map(|s| s.results.len()).sum()
    }

    pub fn failures(&self) -> usize {
        self.suites.iter().map(|s| s.count(CaseStatus::Failed)).sum()
    }

    pub fn skipped(&self) -> usize {
        self.suites.iter().map(|s| s.count(CaseStatus::Skipped)).sum()
    }

    pub fn passed(&self) -> usize {
        self.suites.iter().map(|s| s.count(CaseStatus::Passed)).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    pub fn results(&self) -> impl Iterator<Item = &VerificationResult> {
        self.suites.iter().flat_map(|s| s.results.iter())
    }

    pub fn to_junit_xml(&self) -> Result<String, Error> {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("testsuites");
        root.push_attribute(("name", "contract verification"));
        root.push_attribute(("tests", self.total().to_string().as_str()));
        root.push_attribute(("failures", self.failures().to_string().as_str()));
        root.push_attribute(("skipped", self.skipped().to_string().as_str()));
        root.push_attribute(("time", seconds(self.duration).as_str()));
        root.push_attribute(("timestamp", timestamp.as_str()));
        writer.write_event(Event::Start(root))?;

        for suite in &self.suites {
            let mut element = BytesStart::new("testsuite");
            element.push_attribute(("name", suite.name.as_str()));
            element.push_attribute(("tests", suite.results.len().to_string().as_str()));
            element.push_attribute(("failures", suite.count(CaseStatus::Failed).to_string().as_str()));
            element.push_attribute(("skipped", suite.count(CaseStatus::Skipped).to_string().as_str()));
            element.push_attribute(("time", seconds(suite.duration()).as_str()));
            element.push_attribute(("timestamp", timestamp.as_str()));
            writer.write_event(Event::Start(element))?;

            for result in &suite.results {
                write_case(&mut writer, &suite.name, result)?;
            }

            writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        let bytes = writer.into_inner().into_inner();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Writes the JUnit report, creating missing parent directories.
    pub fn write_junit<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_junit_xml()?)?;

        tracing::info!(path = %path.display(), "wrote junit report");
        Ok(())
    }
}

fn write_case(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    suite: &str,
    result: &VerificationResult,
) -> Result<(), Error> {
    let mut element = BytesStart::new("testcase");
    element.push_attribute(("classname", suite));
    element.push_attribute(("name", xml_text(&result.description).as_str()));
    element.push_attribute(("time", seconds(result.duration).as_str()));

    match (result.status, &result.failure) {
        (CaseStatus::Passed, _) => {
            writer.write_event(Event::Empty(element))?;
        }
        (CaseStatus::Skipped, _) => {
            writer.write_event(Event::Start(element))?;
            writer.write_event(Event::Empty(BytesStart::new("skipped")))?;
            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
        (CaseStatus::Failed, failure) => {
            writer.write_event(Event::Start(element))?;

            let mut failure_element = BytesStart::new("failure");
            match failure {
                Some(failure) => {
                    let message = xml_text(&failure.message);
                    failure_element.push_attribute(("message", message.as_str()));
                    failure_element.push_attribute(("type", failure.kind.as_str()));
                    writer.write_event(Event::Start(failure_element))?;
                    writer.write_event(Event::CData(BytesCData::new(cdata_safe(
                        &failure.details(),
                    ))))?;
                    writer.write_event(Event::End(BytesEnd::new("failure")))?;
                }
                None => {
                    failure_element.push_attribute(("type", FailureKind::Other.as_str()));
                    writer.write_event(Event::Empty(failure_element))?;
                }
            }

            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
    }

    Ok(())
}

fn seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// Strips ANSI colour codes and the characters XML 1.0 does not allow.
fn xml_text(text: &str) -> String {
    ANSI_ESCAPE_REGEX
        .replace_all(text, "")
        .chars()
        .filter(|c| match *c {
            '\t' | '\n' | '\r' => true,
            '\u{FFFE}' | '\u{FFFF}' => false,
            c => c >= ' ',
        })
        .collect()
}

// a CDATA section cannot contain its own terminator
fn cdata_safe(text: &str) -> String {
    text.replace("]]>", "]]]]><![CDATA[>")
}
