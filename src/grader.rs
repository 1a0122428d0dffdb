//! Grading pipeline
//!
//! Runs one submission against every case of a test bundle, in order, one
//! isolated worker per case. Faults are contained at the case boundary: a
//! failing, crashing, or timed-out case never aborts the remaining cases.
//! Verdicts come out in case order and fold left-to-right into the grade
//! report.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bundle::TestBundle;
use crate::executor::{ExecutionOutcome, Executor};
use crate::verifier::{normalize, truncate_output, verify};

/// Generic diagnostic for a content mismatch; the hidden expected value is
/// never named
const WRONG_OUTPUT_MESSAGE: &str = "wrong output";

/// Pass/fail outcome for one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseVerdict {
    pub case_index: usize,
    pub passed: bool,
    pub diagnostic: String,
}

/// Aggregate passed/total count for one exercise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeReport {
    pub exercise_id: String,
    pub passed_count: usize,
    pub total_count: usize,
}

/// Full result of one grading run, as published to the result channel
#[derive(Debug, Serialize, Deserialize)]
pub struct GradeResult {
    pub exercise_id: String,
    pub passed_count: usize,
    pub total_count: usize,
    pub verdicts: Vec<CaseVerdict>,
    /// Set when the run halted before grading (e.g. bundle fetch failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GradeResult {
    pub fn from_report(report: &GradeReport, verdicts: Vec<CaseVerdict>) -> Self {
        Self {
            exercise_id: report.exercise_id.clone(),
            passed_count: report.passed_count,
            total_count: report.total_count,
            verdicts,
            error_message: None,
        }
    }

    pub fn failed(exercise_id: &str, message: String) -> Self {
        Self {
            exercise_id: exercise_id.to_string(),
            passed_count: 0,
            total_count: 0,
            verdicts: vec![],
            error_message: Some(message),
        }
    }
}

/// Grade one submission against one bundle.
///
/// An `Err` means the executor itself could not run (worker spawn
/// failure); per-case faults and timeouts are folded into failing
/// verdicts instead.
pub async fn grade_submission(
    exercise_id: &str,
    code: &str,
    bundle: &TestBundle,
    executor: &dyn Executor,
    output_limit: usize,
) -> Result<(GradeReport, Vec<CaseVerdict>)> {
    let mut verdicts = Vec::with_capacity(bundle.cases.len());
    let mut passed_count = 0usize;

    for (case_index, case) in bundle.cases.iter().enumerate() {
        let outcome = executor.execute(code, &case.entrada).await?;

        let verdict = match outcome {
            ExecutionOutcome::Success { output } => {
                let mode = bundle.mode_for(case);
                let normalized = normalize(&output, mode);
                if verify(bundle.hash_alg, &normalized, &case.saida_hash) {
                    passed_count += 1;
                    CaseVerdict {
                        case_index,
                        passed: true,
                        diagnostic: String::new(),
                    }
                } else {
                    CaseVerdict {
                        case_index,
                        passed: false,
                        diagnostic: WRONG_OUTPUT_MESSAGE.to_string(),
                    }
                }
            }
            ExecutionOutcome::RuntimeFault { message } | ExecutionOutcome::TimedOut { message } => {
                CaseVerdict {
                    case_index,
                    passed: false,
                    diagnostic: truncate_output(&message, output_limit),
                }
            }
        };

        verdicts.push(verdict);
    }

    let report = GradeReport {
        exercise_id: exercise_id.to_string(),
        passed_count,
        total_count: bundle.cases.len(),
    };

    info!(
        "Graded exercise {}: {}/{} cases passed",
        report.exercise_id, report.passed_count, report.total_count
    );

    Ok((report, verdicts))
}

/// In-memory store of the latest grade report per exercise.
///
/// Explicit object passed by reference; writes are whole-value
/// replacements under the lock, reads see either the old or the new
/// report, never a partial one.
#[derive(Debug, Default)]
pub struct ReportStore {
    inner: RwLock<HashMap<String, GradeReport>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the report for its exercise
    pub fn insert(&self, report: GradeReport) {
        let mut map = self.inner.write().expect("report store lock poisoned");
        map.insert(report.exercise_id.clone(), report);
    }

    pub fn get(&self, exercise_id: &str) -> Option<GradeReport> {
        let map = self.inner.read().expect("report store lock poisoned");
        map.get(exercise_id).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, GradeReport> {
        let map = self.inner.read().expect("report store lock poisoned");
        map.clone()
    }

    /// Explicit reset action for one exercise; returns whether a report
    /// was present
    pub fn reset(&self, exercise_id: &str) -> bool {
        let mut map = self.inner.write().expect("report store lock poisoned");
        map.remove(exercise_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{HashAlg, NormalizationMode, TestCase};
    use crate::verifier::digest_hex;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Executor stub that replays a fixed outcome per case, in order
    struct ScriptedExecutor {
        outcomes: Mutex<Vec<ExecutionOutcome>>,
    }

    impl ScriptedExecutor {
        fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(&self, _source: &str, _input: &str) -> Result<ExecutionOutcome> {
            let mut outcomes = self.outcomes.lock().unwrap();
            Ok(outcomes.remove(0))
        }
    }

    fn case_expecting(text: &str, mode: Option<NormalizationMode>) -> TestCase {
        TestCase {
            entrada: String::new(),
            saida_hash: digest_hex(HashAlg::Sha256, text),
            normalizacao: mode,
        }
    }

    fn bundle_of(cases: Vec<TestCase>) -> TestBundle {
        TestBundle {
            cases,
            hash_alg: HashAlg::Sha256,
            normalizacao: NormalizationMode::Strip,
        }
    }

    fn success(output: &str) -> ExecutionOutcome {
        ExecutionOutcome::Success {
            output: output.to_string(),
        }
    }

    #[tokio::test]
    async fn test_three_of_five_pass() {
        let bundle = bundle_of(vec![
            case_expecting("7", None),
            case_expecting("8", None),
            case_expecting("9", None),
            case_expecting("10", None),
            case_expecting("11", None),
        ]);
        let executor = ScriptedExecutor::new(vec![
            success("7\n"),
            success("wrong\n"),
            success("9\n"),
            success("also wrong\n"),
            success("11\n"),
        ]);

        let (report, verdicts) = grade_submission("ex1", "", &bundle, &executor, 10_000)
            .await
            .unwrap();

        assert_eq!(report.passed_count, 3);
        assert_eq!(report.total_count, 5);
        let passes: Vec<bool> = verdicts.iter().map(|v| v.passed).collect();
        assert_eq!(passes, vec![true, false, true, false, true]);
        let indices: Vec<usize> = verdicts.iter().map(|v| v.case_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_fault_does_not_abort_remaining_cases() {
        let bundle = bundle_of(vec![
            case_expecting("a", None),
            case_expecting("b", None),
            case_expecting("c", None),
        ]);
        let executor = ScriptedExecutor::new(vec![
            ExecutionOutcome::RuntimeFault {
                message: "ValueError: boom".to_string(),
            },
            ExecutionOutcome::TimedOut {
                message: "time limit exceeded, possible infinite loop".to_string(),
            },
            success("c\n"),
        ]);

        let (report, verdicts) = grade_submission("ex2", "", &bundle, &executor, 10_000)
            .await
            .unwrap();

        assert_eq!(report.passed_count, 1);
        assert_eq!(report.total_count, 3);
        assert!(!verdicts[0].passed);
        assert!(verdicts[0].diagnostic.contains("ValueError"));
        assert!(!verdicts[1].passed);
        assert!(verdicts[1].diagnostic.contains("time limit exceeded"));
        assert!(verdicts[2].passed);
    }

    #[tokio::test]
    async fn test_mismatch_diagnostic_is_generic() {
        let bundle = bundle_of(vec![case_expecting("secret", None)]);
        let executor = ScriptedExecutor::new(vec![success("guess\n")]);

        let (_, verdicts) = grade_submission("ex3", "", &bundle, &executor, 10_000)
            .await
            .unwrap();

        assert_eq!(verdicts[0].diagnostic, WRONG_OUTPUT_MESSAGE);
        assert!(!verdicts[0].diagnostic.contains("secret"));
    }

    #[tokio::test]
    async fn test_per_case_mode_overrides_bundle_default() {
        // Bundle default strips; the second case demands raw
        let bundle = bundle_of(vec![
            case_expecting("7", None),
            case_expecting("7", Some(NormalizationMode::Raw)),
        ]);
        let executor = ScriptedExecutor::new(vec![success(" 7 \n"), success(" 7 \n")]);

        let (report, verdicts) = grade_submission("ex4", "", &bundle, &executor, 10_000)
            .await
            .unwrap();

        assert!(verdicts[0].passed);
        assert!(!verdicts[1].passed);
        assert_eq!(report.passed_count, 1);
    }

    #[tokio::test]
    async fn test_long_fault_diagnostic_is_truncated() {
        let bundle = bundle_of(vec![case_expecting("x", None)]);
        let executor = ScriptedExecutor::new(vec![ExecutionOutcome::RuntimeFault {
            message: "E".repeat(500),
        }]);

        let (_, verdicts) = grade_submission("ex5", "", &bundle, &executor, 100)
            .await
            .unwrap();

        assert!(verdicts[0]
            .diagnostic
            .ends_with(crate::verifier::TRUNCATION_MARKER));
    }

    #[test]
    fn test_report_store_replacement_and_reset() {
        let store = ReportStore::new();
        store.insert(GradeReport {
            exercise_id: "ex1".into(),
            passed_count: 1,
            total_count: 5,
        });
        store.insert(GradeReport {
            exercise_id: "ex1".into(),
            passed_count: 5,
            total_count: 5,
        });

        let report = store.get("ex1").unwrap();
        assert_eq!(report.passed_count, 5);
        assert_eq!(store.snapshot().len(), 1);

        assert!(store.reset("ex1"));
        assert!(!store.reset("ex1"));
        assert!(store.get("ex1").is_none());
    }
}
