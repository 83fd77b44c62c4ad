//! Selector resolution and test execution.
//!
//! A selection is the union of four optional lists of canonical names.
//! Resolution is all-or-nothing: one unknown name fails the whole request
//! and nothing runs. Execution is sequential in canonical-name order; each
//! test produces a [`TestReport`] with timestamps captured around the call.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::process::Command;

use serde_json::{json, Map, Value};

use crate::discovery::{LoadedSet, Registry};
use crate::manifest::{CommandSpec, Outcome, Presence, Probe};
use crate::report::{timestamp_now, TestReport, TEST_FAILED, TEST_INCONCLUSIVE, TEST_PASSED};

/// The four selector lists of a `GET /reports` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub packages: Vec<String>,
    pub modules: Vec<String>,
    pub test_sets: Vec<String>,
    pub tests: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
            && self.modules.is_empty()
            && self.test_sets.is_empty()
            && self.tests.is_empty()
    }
}

/// A canonical name that matched nothing installed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity '{0}'")]
pub struct UnknownEntity(pub String);

/// The resolved work of one request: per set, which tests run.
///
/// `None` means the whole set; `Some(names)` a filtered subset. Iteration
/// order is canonical because the map is ordered by set name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    selected: BTreeMap<String, Option<BTreeSet<String>>>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    fn select_all(&mut self, set: &str) {
        self.selected.insert(set.to_string(), None);
    }

    fn select_test(&mut self, set: &str, test: &str) {
        match self.selected.entry(set.to_string()).or_insert_with(|| {
            Some(BTreeSet::new())
        }) {
            Some(filtered) => {
                filtered.insert(test.to_string());
            }
            None => {} // The whole set is already selected.
        }
    }
}

impl Registry {
    /// Resolves a selection against this snapshot.
    ///
    /// An empty selection selects every installed test. Any name that does
    /// not resolve aborts resolution with [`UnknownEntity`].
    pub fn plan(&self, selection: &Selection) -> Result<ExecutionPlan, UnknownEntity> {
        let mut plan = ExecutionPlan::default();

        if selection.is_empty() {
            for canonical in self.sets().keys() {
                plan.select_all(canonical);
            }
            return Ok(plan);
        }

        for package in &selection.packages {
            if !self.package_names().contains(package) {
                return Err(UnknownEntity(package.clone()));
            }
            let prefix = format!("{package}.");
            for canonical in self.sets().keys() {
                if canonical.starts_with(&prefix) {
                    plan.select_all(canonical);
                }
            }
        }

        for module in &selection.modules {
            if !self.module_names().contains(module) {
                return Err(UnknownEntity(module.clone()));
            }
            let prefix = format!("{module}.");
            for canonical in self.sets().keys() {
                // Sets live directly inside a module, so only one more
                // segment may follow the prefix.
                if let Some(rest) = canonical.strip_prefix(&prefix) {
                    if !rest.contains('.') {
                        plan.select_all(canonical);
                    }
                }
            }
        }

        for set in &selection.test_sets {
            if !self.sets().contains_key(set) {
                return Err(UnknownEntity(set.clone()));
            }
            plan.select_all(set);
        }

        for test in &selection.tests {
            let (set, name) = match test.rsplit_once('.') {
                Some(parts) => parts,
                None => return Err(UnknownEntity(test.clone())),
            };
            let loaded = self.sets().get(set).ok_or_else(|| UnknownEntity(test.clone()))?;
            if !loaded.tests.iter().any(|t| t.name == name) {
                return Err(UnknownEntity(test.clone()));
            }
            plan.select_test(set, name);
        }

        Ok(plan)
    }

    /// Executes a plan sequentially and collects the reports.
    ///
    /// Blocking: probes may spawn processes. Callers on an async runtime
    /// run this on a blocking thread.
    pub fn run(&self, plan: &ExecutionPlan) -> Vec<TestReport> {
        let mut reports = Vec::new();
        for (canonical, filter) in &plan.selected {
            let set = match self.sets().get(canonical) {
                Some(set) => set,
                None => continue, // Snapshot changed under the plan; nothing to run.
            };
            run_set(set, filter.as_ref(), &mut reports);
        }
        reports
    }
}

fn run_set(set: &LoadedSet, filter: Option<&BTreeSet<String>>, reports: &mut Vec<TestReport>) {
    let selected: Vec<_> = set
        .tests
        .iter()
        .filter(|t| filter.is_none_or(|names| names.contains(&t.name)))
        .collect();
    if selected.is_empty() {
        return;
    }

    if let Some(setup) = &set.setup {
        if let Err(error) = run_fixture(setup) {
            // A failed setup leaves every selected test unexecuted but
            // accounted for.
            for test in selected {
                let now = timestamp_now();
                reports.push(TestReport {
                    test_name: format!("{}.{}", set.canonical, test.name),
                    test_description: test.description.clone(),
                    result_code: TEST_INCONCLUSIVE,
                    timestamp_start: now.clone(),
                    timestamp_end: now,
                    additional_info: Some(info_map(json!({
                        "error": format!("test set setup failed: {error}")
                    }))),
                });
            }
            return;
        }
    }

    for test in selected {
        let timestamp_start = timestamp_now();
        let (result_code, additional_info) = execute_probe(&test.probe);
        reports.push(TestReport {
            test_name: format!("{}.{}", set.canonical, test.name),
            test_description: test.description.clone(),
            result_code,
            timestamp_start,
            timestamp_end: timestamp_now(),
            additional_info,
        });
    }

    if let Some(teardown) = &set.teardown {
        if let Err(error) = run_fixture(teardown) {
            let now = timestamp_now();
            reports.push(TestReport {
                test_name: format!("{}.teardown", set.canonical),
                test_description: set.description.clone(),
                result_code: TEST_INCONCLUSIVE,
                timestamp_start: now.clone(),
                timestamp_end: now,
                additional_info: Some(info_map(json!({
                    "error": format!("test set teardown failed: {error}")
                }))),
            });
        }
    }
}

fn run_fixture(spec: &CommandSpec) -> Result<(), String> {
    match Command::new(&spec.program).args(&spec.args).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(format!("'{}' exited with {}", spec.program, output.status)),
        Err(e) => Err(format!("'{}' could not be spawned: {e}", spec.program)),
    }
}

/// Executes a probe, yielding the result code and optional extra evidence.
fn execute_probe(probe: &Probe) -> (i32, Option<Map<String, Value>>) {
    match probe {
        Probe::Command {
            program,
            args,
            expect,
        } => match Command::new(program).args(args).output() {
            Ok(output) => {
                let succeeded = output.status.success();
                let passed = match expect {
                    Outcome::Success => succeeded,
                    Outcome::Failure => !succeeded,
                };
                let code = if passed { TEST_PASSED } else { TEST_FAILED };
                let info = (!passed).then(|| {
                    info_map(json!({
                        "exit_status": output.status.code(),
                        "stderr": String::from_utf8_lossy(&output.stderr).trim(),
                    }))
                });
                (code, info)
            }
            Err(e) => (
                TEST_INCONCLUSIVE,
                Some(info_map(json!({
                    "error": format!("'{program}' could not be spawned: {e}")
                }))),
            ),
        },
        Probe::PathExists { path, expect } => {
            let present = std::path::Path::new(path).exists();
            (presence_code(present, *expect), None)
        }
        Probe::EnvVar { name, expect } => {
            let present = std::env::var_os(name).is_some();
            (presence_code(present, *expect), None)
        }
    }
}

fn presence_code(present: bool, expect: Presence) -> i32 {
    let passed = match expect {
        Presence::Present => present,
        Presence::Absent => !present,
    };
    if passed {
        TEST_PASSED
    } else {
        TEST_FAILED
    }
}

fn info_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("additional_info is always built from an object literal"),
    }
}
