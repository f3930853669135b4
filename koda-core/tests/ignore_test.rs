//! Ignore-filter behavior against real pattern files on disk.

use std::path::Path;

use koda_core::utils::ignore::{IgnoreFilter, IgnoreOptions};

#[test]
fn loads_both_pattern_files_from_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".gitignore"), "target/\n*.log\n").unwrap();
    std::fs::write(dir.path().join(".kodaignore"), "secrets.txt\n!debug.log\n").unwrap();
    std::fs::create_dir(dir.path().join("target")).unwrap();
    std::fs::write(dir.path().join("target").join("out.o"), "x").unwrap();

    let filter = IgnoreFilter::load(dir.path());
    assert!(filter.has_patterns());

    let opts = IgnoreOptions::default();
    assert!(filter.should_ignore(&dir.path().join("target").join("out.o"), opts));
    assert!(filter.should_ignore(&dir.path().join("trace.log"), opts));
    assert!(filter.should_ignore(&dir.path().join("secrets.txt"), opts));
    // The project file re-includes debug.log after the VCS file ignored *.log.
    assert!(!filter.should_ignore(&dir.path().join("debug.log"), opts));
    assert!(!filter.should_ignore(&dir.path().join("src.rs"), opts));
}

#[test]
fn missing_files_mean_nothing_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let filter = IgnoreFilter::load(dir.path());
    assert!(!filter.has_patterns());
    assert!(!filter.should_ignore(Path::new("anything"), IgnoreOptions::default()));
}

#[test]
fn pattern_set_is_immutable_after_load() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".gitignore"), "before\n").unwrap();
    let filter = IgnoreFilter::load(dir.path());

    // Rewriting the file after load changes nothing for this session.
    std::fs::write(dir.path().join(".gitignore"), "after\n").unwrap();
    let opts = IgnoreOptions::default();
    assert!(filter.should_ignore(&dir.path().join("before"), opts));
    assert!(!filter.should_ignore(&dir.path().join("after"), opts));
}
