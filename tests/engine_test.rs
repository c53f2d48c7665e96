mod common;

use tempfile::TempDir;

use common::{app_with_locales, fat_binary, slice_bytes, ARM64, I386, X86_64};
use slimmac::executor::{self, CancelToken, Executor, ExecutorOptions, NoProgress, RunState};
use slimmac::planner::{self, KeepSet, PlanOptions, RemovalAction, RemovalPlan, VetoReason};
use slimmac::scanner::macho;
use slimmac::scanner::targets::{CandidateKind, RootTarget};
use slimmac::scanner::{ScanOptions, Scanner};

fn keep(langs: &[&str], archs: &[&str]) -> KeepSet {
    KeepSet::new(
        langs.iter().map(|s| s.to_string()),
        Vec::new(),
        archs.iter().map(|s| s.to_string()),
    )
}

fn scan_and_plan(root: &std::path::Path, keep: &KeepSet) -> RemovalPlan {
    let roots = vec![RootTarget::new(root)];
    let results = Scanner::new(ScanOptions::default()).scan_all(&roots).unwrap();
    planner::plan(results.candidates, keep, &PlanOptions::default())
}

fn execute(plan: &RemovalPlan) -> executor::ExecutionSummary {
    Executor::new(ExecutorOptions::default()).execute(plan, &NoProgress, &CancelToken::new())
}

// ─── Localizations ────────────────────────────────────────────────────────────

#[test]
fn test_french_and_german_removed_exact_bytes() {
    let dir = TempDir::new().unwrap();
    let app = app_with_locales(dir.path(), "App.app", &[("en", 100), ("fr", 120), ("de", 80)]);

    let plan = scan_and_plan(dir.path(), &keep(&["en"], &[]));
    assert_eq!(plan.len(), 2);
    assert_eq!(plan.reclaimable_bytes, 200);
    assert!(plan.vetoes.is_empty());

    let summary = execute(&plan);
    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.bytes_reclaimed, 200);

    let resources = app.join("Contents/Resources");
    assert!(resources.join("en.lproj").exists());
    assert!(!resources.join("fr.lproj").exists());
    assert!(!resources.join("de.lproj").exists());
}

#[test]
fn test_fallback_locale_survives() {
    let dir = TempDir::new().unwrap();
    let app = app_with_locales(dir.path(), "App.app", &[("de", 10), ("en", 10), ("fr", 10)]);

    // Keep nothing present in the bundle: English is the fallback
    let plan = scan_and_plan(dir.path(), &keep(&["ja"], &[]));
    assert_eq!(plan.len(), 2);
    assert_eq!(plan.vetoes.len(), 1);
    assert_eq!(plan.vetoes[0].tag, "en");
    assert_eq!(plan.vetoes[0].reason, VetoReason::LastLocalization);

    let summary = execute(&plan);
    assert_eq!(summary.skipped, 1);
    assert!(app.join("Contents/Resources/en.lproj").exists());
}

#[test]
fn test_missing_directory_is_skipped_not_failed() {
    let dir = TempDir::new().unwrap();
    let app = app_with_locales(dir.path(), "App.app", &[("en", 10), ("fr", 10), ("it", 10)]);
    let plan = scan_and_plan(dir.path(), &keep(&["en"], &[]));

    std::fs::remove_dir_all(app.join("Contents/Resources/fr.lproj")).unwrap();
    let summary = execute(&plan);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.details.len(), 1);
    assert_eq!(summary.details[0].tags, "fr");
}

#[test]
fn test_overlapping_roots_reclaim_once() {
    let dir = TempDir::new().unwrap();
    let app = app_with_locales(dir.path(), "Foo.app", &[("en", 10), ("fr", 100)]);
    let roots = vec![RootTarget::new(dir.path()), RootTarget::new(&app)];
    let results = Scanner::new(ScanOptions::default()).scan_all(&roots).unwrap();
    assert_eq!(results.candidates.len(), 4);

    let plan = planner::plan(results.candidates, &keep(&["en"], &[]), &PlanOptions::default());
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.actions[0].root(), 0);
    assert_eq!(plan.reclaimable_bytes, 100);

    let summary = execute(&plan);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.bytes_reclaimed, 100);
}

#[test]
fn test_unwritable_bundle_fails_and_run_continues() {
    use std::os::unix::fs::PermissionsExt;
    // root writes through any mode
    if slimmac::common::permissions::current_uid() == 0 {
        return;
    }
    let dir = TempDir::new().unwrap();
    let locked = app_with_locales(dir.path(), "A.app", &[("en", 1), ("fr", 10)]);
    let open = app_with_locales(dir.path(), "B.app", &[("en", 1), ("fr", 20)]);
    let plan = scan_and_plan(dir.path(), &keep(&["en"], &[]));
    assert_eq!(plan.len(), 2);

    let resources = locked.join("Contents/Resources");
    std::fs::set_permissions(&resources, std::fs::Permissions::from_mode(0o555)).unwrap();
    let summary = execute(&plan);
    std::fs::set_permissions(&resources, std::fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.bytes_reclaimed, 20);
    assert_eq!(summary.details[0].path, resources.join("fr.lproj"));
    assert!(resources.join("fr.lproj").exists());
    assert!(!open.join("Contents/Resources/fr.lproj").exists());
}

// ─── Architectures ────────────────────────────────────────────────────────────

#[test]
fn test_thin_keeps_arm64_bytes_identical() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("Tool.app/Contents/MacOS/Tool");
    let original = fat_binary(&binary, &[(X86_64, 6000, b'x'), (ARM64, 5000, b'a')]);
    let arm64_before = slice_bytes(&binary, &original[1]);

    let plan = scan_and_plan(dir.path(), &keep(&[], &["arm64"]));
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.reclaimable_bytes, 6000);
    match &plan.actions[0] {
        RemovalAction::ThinBinary { remove, keep, .. } => {
            assert_eq!(remove.len(), 1);
            assert_eq!(remove[0].tag, "x86_64");
            assert_eq!(keep[0].tag, "arm64");
        }
        other => panic!("unexpected action {:?}", other),
    }

    let summary = execute(&plan);
    assert_eq!(summary.succeeded, 1);

    let header = macho::read_fat_header(&binary).unwrap().unwrap();
    assert!(!header.is_64);
    assert_eq!(header.arches.len(), 1);
    assert_eq!(header.arches[0].arch_name(), "arm64");
    assert_eq!(header.arches[0].offset % 4096, 0);
    assert_eq!(slice_bytes(&binary, &header.arches[0]), arm64_before);
}

#[test]
fn test_keeping_no_architecture_vetoes_binary() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("Tool");
    fat_binary(&binary, &[(X86_64, 100, 1), (ARM64, 100, 2)]);
    let before = std::fs::read(&binary).unwrap();

    let plan = scan_and_plan(dir.path(), &keep(&[], &[]));
    assert!(plan.is_empty());
    assert_eq!(plan.vetoes.len(), 1);
    assert_eq!(plan.vetoes[0].reason, VetoReason::AllArchitectures);
    assert_eq!(plan.vetoes[0].kind, CandidateKind::ArchitectureSlice);
    assert_eq!(plan.vetoes[0].tag, "x86_64, arm64");

    let summary = execute(&plan);
    assert_eq!(summary.skipped, 1);
    assert!(summary.details.iter().all(|d| matches!(
        &d.outcome,
        executor::ActionOutcome::Skipped { reason } if reason == "would remove all architectures"
    )));
    assert_eq!(std::fs::read(&binary).unwrap(), before);
}

#[test]
fn test_three_slices_thinned_to_one() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("tool");
    fat_binary(&binary, &[(I386, 300, 1), (X86_64, 400, 2), (ARM64, 500, 3)]);

    let plan = scan_and_plan(dir.path(), &keep(&[], &["x86_64"]));
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.reclaimable_bytes, 800);

    execute(&plan);
    let header = macho::read_fat_header(&binary).unwrap().unwrap();
    let names: Vec<String> = header.arches.iter().map(|s| s.arch_name()).collect();
    assert_eq!(names, vec!["x86_64"]);
    assert!(slice_bytes(&binary, &header.arches[0]).iter().all(|b| *b == 2));
}

#[test]
fn test_binary_changed_after_scan_is_skipped() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("tool");
    fat_binary(&binary, &[(X86_64, 300, 1), (ARM64, 300, 2)]);
    let plan = scan_and_plan(dir.path(), &keep(&[], &["arm64"]));

    // Rebuilt with different slice sizes between scan and execution
    fat_binary(&binary, &[(X86_64, 900, 1), (ARM64, 900, 2)]);
    let rebuilt = std::fs::read(&binary).unwrap();

    let summary = execute(&plan);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(std::fs::read(&binary).unwrap(), rebuilt);
}

// ─── Whole-cycle properties ───────────────────────────────────────────────────

#[test]
fn test_second_cycle_is_empty() {
    let dir = TempDir::new().unwrap();
    app_with_locales(dir.path(), "A.app", &[("en", 10), ("fr", 10), ("pt_BR", 10)]);
    app_with_locales(dir.path(), "B.app", &[("de", 10), ("ja", 10)]);
    fat_binary(
        &dir.path().join("A.app/Contents/MacOS/A"),
        &[(X86_64, 100, 1), (ARM64, 100, 2)],
    );
    let keep = keep(&["en"], &["arm64"]);

    let first = scan_and_plan(dir.path(), &keep);
    assert!(!first.is_empty());
    let summary = execute(&first);
    assert_eq!(summary.failed, 0);

    let second = scan_and_plan(dir.path(), &keep);
    assert!(second.is_empty(), "second plan not empty: {:?}", second.actions);
}

#[test]
fn test_plans_are_deterministic() {
    let dir = TempDir::new().unwrap();
    for app in ["Zeta.app", "Alpha.app", "Mid.app"] {
        app_with_locales(dir.path(), app, &[("en", 5), ("fr", 7), ("ko", 9)]);
    }
    fat_binary(&dir.path().join("Mid.app/Contents/MacOS/Mid"), &[(X86_64, 64, 1), (ARM64, 64, 2)]);
    let keep = keep(&["en"], &["arm64"]);

    let first = serde_json::to_string(&scan_and_plan(dir.path(), &keep)).unwrap();
    let second = serde_json::to_string(&scan_and_plan(dir.path(), &keep)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_cancelled_run_leaves_remaining_actions() {
    let dir = TempDir::new().unwrap();
    let app = app_with_locales(dir.path(), "App.app", &[("en", 1), ("fr", 1), ("de", 1), ("it", 1)]);
    let plan = scan_and_plan(dir.path(), &keep(&["en"], &[]));

    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = Executor::new(ExecutorOptions::default()).execute(&plan, &NoProgress, &cancel);
    assert_eq!(summary.state, RunState::Cancelled);
    assert_eq!(summary.not_started, 3);
    assert_eq!(common::tree(&app).len(), 10);
}

#[test]
fn test_spawned_run_streams_progress_in_order() {
    let dir = TempDir::new().unwrap();
    app_with_locales(dir.path(), "App.app", &[("en", 1), ("fr", 1), ("de", 1), ("it", 1)]);
    let plan = scan_and_plan(dir.path(), &keep(&["en"], &[]));
    let expected: Vec<_> = plan.actions.iter().map(|a| a.path().to_path_buf()).collect();

    let handle = executor::spawn(Executor::new(ExecutorOptions::default()), plan);
    let events: Vec<_> = handle.events.iter().collect();
    let summary = handle.wait().unwrap();

    assert_eq!(summary.succeeded, 3);
    assert_eq!(events.iter().map(|e| e.path.clone()).collect::<Vec<_>>(), expected);
    assert!(events.iter().enumerate().all(|(i, e)| e.action_index == i && e.total == 3));
}
