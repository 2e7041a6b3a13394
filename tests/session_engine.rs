//! Session engine scenarios: bounded tails, manual refresh, close semantics,
//! directory listings and vanished sources.

mod common;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{Receiver, unbounded};
use filetime::FileTime;

use bfxdiag::core::config::{Config, RefreshConfig};
use bfxdiag::session::manager::{SessionManager, TickApplied};
use bfxdiag::session::scheduler::{TickReport, TickSink};
use bfxdiag::text::highlight::{HighlightRules, SharedRules, Style};
use bfxdiag::text::search::Layer;

const WAIT: Duration = Duration::from_secs(5);

fn manager(refresh: RefreshConfig) -> (SessionManager, Receiver<TickReport>) {
    let fx = common::fixture();
    let (tx, rx) = unbounded();
    let sink: TickSink = Arc::new(move |report: TickReport| {
        let _ = tx.send(report);
    });
    let rules = SharedRules::new(HighlightRules::from_config(&Config::default().highlight));
    (SessionManager::new(fx.dispatcher, rules, refresh, sink), rx)
}

fn fast() -> RefreshConfig {
    RefreshConfig {
        file_interval_ms: 50,
        directory_interval_ms: 50,
        ..RefreshConfig::default()
    }
}

fn slow() -> RefreshConfig {
    RefreshConfig {
        file_interval_ms: 60_000,
        directory_interval_ms: 60_000,
        ..RefreshConfig::default()
    }
}

#[test]
fn long_file_keeps_last_hundred_lines() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("BESClient.log");
    let body: String = (1..=250).map(|i| format!("line {i}\n")).collect();
    fs::write(&file, body).unwrap();

    let (mut mgr, rx) = manager(slow());
    let id = mgr.open_file(file.to_str().unwrap()).unwrap();
    let report = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(mgr.apply_tick(report), TickApplied::Updated);

    let view = mgr.view(id).unwrap();
    assert_eq!(view.lines().len(), 100);
    assert_eq!(view.lines()[0].text, "line 151");
    assert_eq!(view.lines()[99].text, "line 250");
}

#[test]
fn trailing_blank_lines_count_toward_the_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("blank-tail.log");
    let mut body: String = (1..=247).map(|i| format!("line {i}\n")).collect();
    body.push_str("\n\n\n");
    fs::write(&file, body).unwrap();

    let (mut mgr, rx) = manager(slow());
    let id = mgr.open_file(file.to_str().unwrap()).unwrap();
    assert_eq!(mgr.apply_tick(rx.recv_timeout(WAIT).unwrap()), TickApplied::Updated);
    let lines = mgr.view(id).unwrap().lines();
    assert_eq!(lines.len(), 100);
    assert_eq!(lines[0].text, "line 151");
    assert_eq!(lines[96].text, "line 247");
    assert!(lines[97..].iter().all(|l| l.text.is_empty()));

    let single = dir.path().join("newline-only.log");
    fs::write(&single, "\n").unwrap();
    let id = mgr.open_file(single.to_str().unwrap()).unwrap();
    assert_eq!(mgr.apply_tick(rx.recv_timeout(WAIT).unwrap()), TickApplied::Updated);
    assert_eq!(mgr.view(id).unwrap().lines().len(), 1);
}

#[test]
fn manual_refresh_works_with_auto_refresh_off() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.log");
    fs::write(&file, "first\n").unwrap();

    let (mut mgr, rx) = manager(RefreshConfig {
        auto_refresh: false,
        ..fast()
    });
    let id = mgr.open_file(file.to_str().unwrap()).unwrap();
    let initial = rx.recv_timeout(WAIT).unwrap();
    assert!(initial.forced);
    mgr.apply_tick(initial);

    let mut f = OpenOptions::new().append(true).open(&file).unwrap();
    writeln!(f, "ERROR second").unwrap();
    drop(f);

    // Several periods pass without a tick.
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(mgr.view(id).unwrap().text(), "first");

    mgr.refresh_now().unwrap();
    let report = rx.recv_timeout(WAIT).unwrap();
    assert!(report.forced);
    assert_eq!(mgr.apply_tick(report), TickApplied::Updated);
    let view = mgr.view(id).unwrap();
    assert_eq!(view.text(), "first\nERROR second");
    assert_eq!(view.lines()[1].style, Some(Style::new("red")));
}

#[test]
fn resuming_auto_refresh_forces_a_tick() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.log");
    fs::write(&file, "x\n").unwrap();

    let (mut mgr, rx) = manager(RefreshConfig {
        auto_refresh: false,
        ..slow()
    });
    mgr.open_file(file.to_str().unwrap()).unwrap();
    rx.recv_timeout(WAIT).unwrap();

    mgr.set_auto_refresh(true).unwrap();
    assert!(mgr.auto_refresh());
    assert!(rx.recv_timeout(WAIT).unwrap().forced);
}

#[test]
fn closed_session_never_updates() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.log");
    fs::write(&file, "x\n").unwrap();

    let (mut mgr, rx) = manager(fast());
    let id = mgr.open_file(file.to_str().unwrap()).unwrap();
    rx.recv_timeout(WAIT).unwrap();
    mgr.close(id).unwrap();

    // Anything still in flight is discarded; the ticker goes quiet.
    while let Ok(report) = rx.recv_timeout(Duration::from_millis(300)) {
        assert_eq!(mgr.apply_tick(report), TickApplied::Discarded);
    }
    assert!(mgr.view(id).is_none());
    assert!(mgr.list_open().is_empty());
}

#[test]
fn directory_lists_ten_newest_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    let base = SystemTime::now() - Duration::from_secs(10_000);
    for i in 0..12_u64 {
        let sub = dir.path().join(format!("site{i:02}"));
        fs::create_dir(&sub).unwrap();
        let t = FileTime::from_system_time(base + Duration::from_secs(i * 60));
        filetime::set_file_mtime(&sub, t).unwrap();
    }
    fs::write(dir.path().join("not-a-dir.txt"), "").unwrap();

    let (mut mgr, rx) = manager(slow());
    let id = mgr.open_directory(dir.path().to_str().unwrap()).unwrap();
    let report = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(mgr.apply_tick(report), TickApplied::Updated);

    let lines = mgr.view(id).unwrap().lines();
    assert_eq!(lines.len(), 10);
    assert!(lines[0].text.starts_with("site11 - Last Modified: "));
    assert!(lines[9].text.starts_with("site02 - Last Modified: "));
}

#[test]
fn vanished_file_stops_ticker_until_manual_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.log");
    fs::write(&file, "x\n").unwrap();

    let (mut mgr, rx) = manager(fast());
    let id = mgr.open_file(file.to_str().unwrap()).unwrap();
    mgr.apply_tick(rx.recv_timeout(WAIT).unwrap());
    fs::remove_file(&file).unwrap();

    let failed = loop {
        let report = rx.recv_timeout(WAIT).unwrap();
        if let TickApplied::Failed { rearmed, .. } = mgr.apply_tick(report) {
            break rearmed;
        }
    };
    assert!(!failed);
    assert!(mgr.view(id).unwrap().last_error().is_some());
    assert_eq!(mgr.view(id).unwrap().text(), "x");
    assert!(common::wait_until(WAIT, || !mgr.is_live(id)));

    fs::write(&file, "back\n").unwrap();
    mgr.refresh_now().unwrap();
    let report = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(mgr.apply_tick(report), TickApplied::Updated);
    assert_eq!(mgr.view(id).unwrap().text(), "back");
    assert!(mgr.view(id).unwrap().last_error().is_none());
}

#[test]
fn refresh_right_after_vanish_is_never_lost() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("flaky.log");
    let (mut mgr, rx) = manager(fast());

    for round in 0..40 {
        fs::write(&file, "x\n").unwrap();
        let id = mgr.open_file(file.to_str().unwrap()).unwrap();
        mgr.apply_tick(rx.recv_timeout(WAIT).unwrap());
        fs::remove_file(&file).unwrap();
        loop {
            let report = rx.recv_timeout(WAIT).unwrap();
            if let TickApplied::Failed { rearmed: false, .. } = mgr.apply_tick(report) {
                break;
            }
        }

        // No wait for the ticker thread to exit before asking again.
        fs::write(&file, format!("round {round}\n")).unwrap();
        mgr.refresh_now().unwrap();
        let updated = loop {
            let report = rx.recv_timeout(WAIT).unwrap_or_else(|_| panic!("round {round}: refresh lost"));
            match mgr.apply_tick(report) {
                TickApplied::Updated => break true,
                TickApplied::Discarded => {}
                TickApplied::Failed { .. } => break false,
            }
        };
        assert!(updated, "round {round}");
        assert_eq!(mgr.view(id).unwrap().text(), format!("round {round}"));
        mgr.close(id).unwrap();
        while rx.try_recv().is_ok() {}
    }
}

#[test]
fn search_and_filter_are_independent_and_save_writes_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.log");
    fs::write(&file, "Download complete\nRelay select\nDOWNLOAD failed\n").unwrap();

    let (mut mgr, rx) = manager(slow());
    let id = mgr.open_file(file.to_str().unwrap()).unwrap();
    mgr.apply_tick(rx.recv_timeout(WAIT).unwrap());

    assert_eq!(mgr.search("download").unwrap(), 2);
    assert_eq!(mgr.filter("relay").unwrap(), 1);
    let view = mgr.view(id).unwrap();
    assert_eq!(view.spans(Layer::Search).len(), 2);
    assert_eq!(view.spans(Layer::Filter)[0].line, 1);

    assert_eq!(mgr.search("").unwrap(), 0);
    assert_eq!(mgr.view(id).unwrap().spans(Layer::Filter).len(), 1);

    let out = dir.path().join("saved.txt");
    mgr.save(&out).unwrap();
    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "Download complete\nRelay select\nDOWNLOAD failed\n"
    );

    mgr.clear().unwrap();
    assert!(mgr.view(id).unwrap().lines().is_empty());
}
